//! Token verification with `openssl ts -verify` against pinned certificates.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use trove_core::TimestampConfig;

use crate::timestamp::{TimestampError, TimestampResult, TimestampToken, TimestampVerifier};

/// CA and TSA certificates trusted for token verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsaCertificates {
    /// CA bundle (PEM)
    pub ca_file: PathBuf,
    /// TSA signing certificate (PEM)
    pub tsa_cert: PathBuf,
}

impl TsaCertificates {
    /// Certificates at the configured paths, without touching the network
    #[must_use]
    pub fn pinned(config: &TimestampConfig) -> Self {
        Self {
            ca_file: config.ca_file.clone(),
            tsa_cert: config.tsa_cert.clone(),
        }
    }

    /// Certificates at the configured paths, fetching any that are missing
    /// from their configured URLs first
    ///
    /// # Errors
    ///
    /// Returns error if a missing certificate cannot be fetched or stored
    pub async fn ensure(config: &TimestampConfig) -> TimestampResult<Self> {
        let pinned = Self::pinned(config);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        for (path, url) in [
            (&pinned.ca_file, &config.ca_url),
            (&pinned.tsa_cert, &config.tsa_cert_url),
        ] {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                continue;
            }
            fetch(&client, url, path).await?;
        }
        Ok(pinned)
    }
}

async fn fetch(client: &reqwest::Client, url: &str, path: &Path) -> TimestampResult<()> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(TimestampError::Status {
            status: status.as_u16(),
        });
    }
    let body = response.bytes().await?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TimestampError::io(format!("create {}", parent.display()), e))?;
    }
    let partial = path.with_extension("partial");
    tokio::fs::write(&partial, &body)
        .await
        .map_err(|e| TimestampError::io(format!("write {}", partial.display()), e))?;
    tokio::fs::rename(&partial, path)
        .await
        .map_err(|e| TimestampError::io(format!("rename {}", path.display()), e))?;
    tracing::info!(url, path = %path.display(), "fetched certificate");
    Ok(())
}

/// Verifies tokens by running `openssl ts -verify`
#[derive(Debug, Clone)]
pub struct OpensslVerifier {
    openssl: PathBuf,
    certificates: TsaCertificates,
}

impl OpensslVerifier {
    /// Verifier using `openssl` and `certificates`
    #[must_use]
    pub fn new(openssl: impl Into<PathBuf>, certificates: TsaCertificates) -> Self {
        Self {
            openssl: openssl.into(),
            certificates,
        }
    }

    /// Arguments verifying the response at `token` over the file `data`
    #[must_use]
    pub fn args(&self, data: &Path, token: &Path) -> Vec<OsString> {
        vec![
            "ts".into(),
            "-verify".into(),
            "-data".into(),
            data.into(),
            "-in".into(),
            token.into(),
            "-CAfile".into(),
            self.certificates.ca_file.clone().into(),
            "-untrusted".into(),
            self.certificates.tsa_cert.clone().into(),
        ]
    }
}

#[async_trait]
impl TimestampVerifier for OpensslVerifier {
    async fn verify(&self, token: &TimestampToken, data: &[u8]) -> TimestampResult<()> {
        let dir = tempfile::tempdir().map_err(|e| TimestampError::io("create temp dir", e))?;
        let data_path = dir.path().join("data");
        let token_path = dir.path().join("token.tsr");
        tokio::fs::write(&data_path, data)
            .await
            .map_err(|e| TimestampError::io("write verification data", e))?;
        tokio::fs::write(&token_path, token.as_bytes())
            .await
            .map_err(|e| TimestampError::io("write token", e))?;

        let args = self.args(&data_path, &token_path);
        tracing::debug!(program = %self.openssl.display(), ?args, "verifying timestamp");
        let output = tokio::process::Command::new(&self.openssl)
            .args(&args)
            .output()
            .await
            .map_err(|e| TimestampError::io(format!("run {}", self.openssl.display()), e))?;
        if output.status.success() {
            return Ok(());
        }
        let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim());
        }
        Err(TimestampError::Verification(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::tests::serve_once;

    fn config(dir: &Path, base: &str) -> TimestampConfig {
        TimestampConfig {
            ca_file: dir.join("certs").join("cacert.pem"),
            tsa_cert: dir.join("certs").join("tsa.crt"),
            ca_url: format!("{base}/cacert.pem"),
            tsa_cert_url: format!("{base}/tsa.crt"),
            timeout_secs: 5,
            ..TimestampConfig::default()
        }
    }

    #[tokio::test]
    async fn test_existing_certificates_are_not_fetched() {
        let dir = tempfile::tempdir().unwrap();
        // unroutable: any fetch attempt would fail
        let config = config(dir.path(), "http://127.0.0.1:9");
        std::fs::create_dir_all(dir.path().join("certs")).unwrap();
        std::fs::write(&config.ca_file, "ca").unwrap();
        std::fs::write(&config.tsa_cert, "tsa").unwrap();

        let certs = TsaCertificates::ensure(&config).await.unwrap();
        assert_eq!(certs, TsaCertificates::pinned(&config));
    }

    #[tokio::test]
    async fn test_missing_certificate_is_fetched_once() {
        let dir = tempfile::tempdir().unwrap();
        let (url, server) = serve_once("200 OK", b"-----BEGIN CERTIFICATE-----\n".to_vec()).await;
        let base = url.trim_end_matches("/tsr").to_string();
        let config = config(dir.path(), &base);
        std::fs::create_dir_all(dir.path().join("certs")).unwrap();
        std::fs::write(&config.ca_file, "ca").unwrap();

        TsaCertificates::ensure(&config).await.unwrap();
        let request = server.await.unwrap();
        assert!(String::from_utf8_lossy(&request).starts_with("GET /tsa.crt"));
        assert_eq!(
            std::fs::read(&config.tsa_cert).unwrap(),
            b"-----BEGIN CERTIFICATE-----\n"
        );
        assert_eq!(std::fs::read(&config.ca_file).unwrap(), b"ca");
        assert!(!config.tsa_cert.with_extension("partial").exists());
    }

    #[test]
    fn test_verify_args() {
        let certs = TsaCertificates {
            ca_file: PathBuf::from("/pin/ca.pem"),
            tsa_cert: PathBuf::from("/pin/tsa.crt"),
        };
        let verifier = OpensslVerifier::new("openssl", certs);
        let args = verifier.args(Path::new("/tmp/data"), Path::new("/tmp/run.tsr"));
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "ts", "-verify", "-data", "/tmp/data", "-in", "/tmp/run.tsr", "-CAfile",
                "/pin/ca.pem", "-untrusted", "/pin/tsa.crt"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let certs = TsaCertificates {
            ca_file: PathBuf::from("ca.pem"),
            tsa_cert: PathBuf::from("tsa.crt"),
        };
        let verifier = OpensslVerifier::new("/nonexistent/openssl", certs);
        let token = TimestampToken::from_response(crate::testing::granted_response(&[0; 64])).unwrap();
        assert!(matches!(
            verifier.verify(&token, b"data").await,
            Err(TimestampError::Io { .. })
        ));
    }
}
