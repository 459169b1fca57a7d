//! Trove CLI
//!
//! Submits code and data for an attested run, verifies stored runs, and
//! manages the service signing key.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, bail};
use console::style;
use trove_bag::inspect_archive;
use trove_certify::{
    Attestor, Evidence, OpensslVerifier, PublicKey, Rfc3161Authority, Signer, TsaCertificates,
    Verifier,
};
use trove_core::{ImageSettings, ServiceConfig};
use trove_pipeline::{Orchestrator, RunOutputs, RunRequest, stored_runs};
use trove_runtime::{ChownCommand, DockerCli, Submission};

use crate::progress::ProgressView;

const DEFAULT_LOG_FILTER: &str = "trove=info";

#[derive(Parser)]
#[command(name = "trove")]
#[command(about = "Trove - isolated execution with signed, timestamped provenance", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct GlobalArgs {
    /// Service configuration file (JSON)
    #[arg(long, global = true, env = "TROVE_CONFIG")]
    config: Option<PathBuf>,
    /// Directory holding declarations, signatures, tokens and archives
    #[arg(long, global = true, env = "TROVE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,
    /// Root for per-run scratch directories
    #[arg(long, global = true, env = "TROVE_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,
    /// Signing key file
    #[arg(long, global = true, env = "TROVE_SIGNING_KEY")]
    signing_key: Option<PathBuf>,
    /// RFC 3161 timestamp authority URL
    #[arg(long, global = true, env = "TROVE_TSA_URL")]
    tsa_url: Option<String>,
    /// Emit logs as JSON
    #[arg(long, global = true, env = "TROVE_LOG_JSON")]
    log_json: bool,
}

impl GlobalArgs {
    fn load_config(&self) -> Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::load(path)?,
            None => ServiceConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut ServiceConfig) {
        if let Some(dir) = &self.storage_dir {
            config.storage_dir.clone_from(dir);
        }
        if let Some(dir) = &self.scratch_dir {
            config.scratch_dir.clone_from(dir);
        }
        if let Some(path) = &self.signing_key {
            config.signing_key_path.clone_from(path);
        }
        if let Some(url) = &self.tsa_url {
            config.timestamp.url.clone_from(url);
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build, run and attest a submission
    Run {
        /// Zip payload
        #[arg(required_unless_present = "direct", conflicts_with = "direct")]
        payload: Option<PathBuf>,
        /// Submit a directory as-is instead of a zip payload
        #[arg(long)]
        direct: Option<PathBuf>,
        #[command(flatten)]
        settings: SettingsArgs,
        /// Do not echo container logs
        #[arg(short, long)]
        quiet: bool,
    },
    /// Verify a stored run
    Verify {
        /// Run name (the stored files' base name)
        run: String,
        /// Result archive; defaults to the stored one when present
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Armored public key to trust instead of the service signing key
        #[arg(long)]
        pinned_key: Option<PathBuf>,
    },
    /// Show the bag metadata of a result archive
    Inspect {
        /// Result archive
        archive: PathBuf,
    },
    /// Generate the signing key
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },
    /// List stored runs
    List,
}

#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// Script run with `sh` inside the container
    #[arg(long)]
    entrypoint: Option<String>,
    /// User executing the entrypoint
    #[arg(long)]
    container_user: Option<String>,
    /// Directory the run directory is mounted at
    #[arg(long)]
    target_repo_dir: Option<String>,
    /// Allow network access during the run
    #[arg(long)]
    enable_network: bool,
    /// Extra image builder flags, whitespace separated
    #[arg(long, allow_hyphen_values = true)]
    extra_args: Option<String>,
}

impl SettingsArgs {
    fn into_settings(self) -> ImageSettings {
        let mut settings = ImageSettings::default().with_network(self.enable_network);
        if let Some(entrypoint) = self.entrypoint {
            settings.entrypoint = entrypoint;
        }
        if let Some(user) = self.container_user {
            settings.container_user = user;
        }
        if let Some(dir) = self.target_repo_dir {
            settings.target_repo_dir = dir;
        }
        if let Some(extra) = self.extra_args {
            settings.extra_args = extra.split_whitespace().map(str::to_string).collect();
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.global.log_json);
    let config = cli.global.load_config()?;

    match cli.command {
        Commands::Run {
            payload,
            direct,
            settings,
            quiet,
        } => {
            let submission = match (payload, direct) {
                (_, Some(dir)) => Submission::Directory(dir),
                (Some(zip), None) => Submission::Archive(zip),
                (None, None) => bail!("either a payload or --direct is required"),
            };
            run(config, submission, settings.into_settings(), !quiet).await
        }
        Commands::Verify {
            run,
            archive,
            pinned_key,
        } => verify(&config, &run, archive, pinned_key.as_deref()).await,
        Commands::Inspect { archive } => {
            let info = inspect_archive(&archive)
                .wrap_err_with(|| format!("inspect {}", archive.display()))?;
            for (key, value) in info.iter() {
                println!("{}: {}", style(key).bold(), value);
            }
            Ok(())
        }
        Commands::Keygen { force } => {
            let key = keygen(&config.signing_key_path, force)?;
            println!("Key written to {}", config.signing_key_path.display());
            println!("Fingerprint: {}", key.fingerprint());
            println!("{}", key.to_armored());
            Ok(())
        }
        Commands::List => {
            for line in list(&config.storage_dir)? {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(
    config: ServiceConfig,
    submission: Submission,
    settings: ImageSettings,
    show_logs: bool,
) -> Result<()> {
    let signer = Signer::from_key_file(&config.signing_key_path).wrap_err_with(|| {
        format!(
            "load signing key {} (run `trove keygen` first)",
            config.signing_key_path.display()
        )
    })?;
    let authority = Rfc3161Authority::from_config(&config.timestamp)?;
    let engine = Arc::new(DockerCli::from_config(&config.engine));
    let attestor = Attestor::new(Arc::new(signer), Arc::new(authority));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(config),
        engine,
        Arc::new(ChownCommand::default()),
        attestor,
    ));

    let mut handle = orchestrator.submit(RunRequest {
        submission,
        settings,
    });
    tracing::debug!(run_id = %handle.run_id, "run submitted");
    let view = ProgressView::new(show_logs);
    while let Some(event) = handle.events.recv().await {
        view.show(&event);
    }
    let summary = handle.finish().await?;
    println!(
        "{} artifacts, run {}",
        summary.artifacts,
        summary.run_id.basename()
    );
    Ok(())
}

async fn verify(
    config: &ServiceConfig,
    run: &str,
    archive: Option<PathBuf>,
    pinned_key: Option<&Path>,
) -> Result<()> {
    let outputs = RunOutputs::new(&config.storage_dir, run);
    let evidence = Evidence::load(&outputs.declaration, &outputs.signature, &outputs.token)?;
    let archive = archive.or_else(|| outputs.archive.is_file().then(|| outputs.archive.clone()));

    let certificates = TsaCertificates::ensure(&config.timestamp)
        .await
        .wrap_err("fetch timestamp authority certificates")?;
    let mut verifier = Verifier::new(Arc::new(OpensslVerifier::new(
        config.timestamp.openssl.clone(),
        certificates,
    )));
    if let Some(key) = trusted_key(config, pinned_key).await? {
        tracing::debug!(fingerprint = %key.fingerprint(), "trusted key");
        verifier = verifier.with_pinned_key(key);
    }

    let report = verifier.verify(&evidence, archive.as_deref()).await;
    for check in report.checks() {
        match &check.failure {
            None => println!("{} {}", style("✓").green(), check.check),
            Some(failure) => println!("{} {}", style("✗").red(), failure),
        }
    }
    if archive.is_none() {
        println!("{} bag (no archive)", style("-").dim());
    }
    println!("{}", report.summary());
    if !report.passed() {
        bail!("run {run} failed verification");
    }
    Ok(())
}

/// The `--pinned-key` file when given, otherwise the public half of the
/// service signing key. `None` when there is no service key to read.
async fn trusted_key(config: &ServiceConfig, pinned_key: Option<&Path>) -> Result<Option<PublicKey>> {
    if let Some(path) = pinned_key {
        let text = tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("read {}", path.display()))?;
        return Ok(Some(PublicKey::from_armored(&text)?));
    }
    match Signer::from_key_file(&config.signing_key_path) {
        Ok(signer) => Ok(Some(signer.public_key())),
        Err(e) => {
            tracing::warn!(
                path = %config.signing_key_path.display(),
                error = %e,
                "no service key to trust; pass --pinned-key"
            );
            Ok(None)
        }
    }
}

fn keygen(path: &Path, force: bool) -> Result<PublicKey> {
    if path.exists() {
        if !force {
            bail!("{} already exists; pass --force to replace it", path.display());
        }
        std::fs::remove_file(path).wrap_err_with(|| format!("remove {}", path.display()))?;
    }
    let signer = Signer::generate();
    signer.write_key_file(path)?;
    Ok(signer.public_key())
}

fn list(storage: &Path) -> Result<Vec<String>> {
    let runs = match stored_runs(storage) {
        Ok(runs) => runs,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e).wrap_err_with(|| format!("list {}", storage.display())),
    };
    Ok(runs
        .iter()
        .map(|run| {
            let status = if run.is_complete() { "complete" } else { "incomplete" };
            format!("{}\t{}", run.basename, status)
        })
        .collect())
}
