//! Service and per-run configuration.
//!
//! `ServiceConfig` is loaded once at process start and passed, immutable,
//! to the orchestrator and every component that needs it. `ImageSettings`
//! describes one submission.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// Per-submission image and isolation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    /// Script run with `sh` inside the container
    pub entrypoint: String,
    /// Directory the run directory is mounted at (also the working directory)
    pub target_repo_dir: String,
    /// User executing the entrypoint
    pub container_user: String,
    /// Extra flags passed to the image builder
    pub extra_args: Vec<String>,
    /// Allow network access during the run. Off unless explicitly requested.
    pub network_enabled: bool,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            entrypoint: "run.sh".to_string(),
            target_repo_dir: "/home/jovyan/work".to_string(),
            container_user: "jovyan".to_string(),
            extra_args: Vec::new(),
            network_enabled: false,
        }
    }
}

impl ImageSettings {
    /// Set the entrypoint
    #[must_use]
    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = entrypoint.into();
        self
    }

    /// Opt in to network access
    #[must_use]
    pub fn with_network(mut self, enabled: bool) -> Self {
        self.network_enabled = enabled;
        self
    }

    /// Reject settings that cannot produce a meaningful run
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` naming the offending field
    pub fn validate(&self) -> CoreResult<()> {
        if self.entrypoint.trim().is_empty() {
            return Err(CoreError::Config {
                field: "entrypoint".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if !self.target_repo_dir.starts_with('/') {
            return Err(CoreError::Config {
                field: "target_repo_dir".to_string(),
                reason: "must be an absolute path inside the container".to_string(),
            });
        }
        if self.container_user.trim().is_empty() {
            return Err(CoreError::Config {
                field: "container_user".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Identity and claims of the trusted research system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrsIdentity {
    /// Base IRI of the system; archive ids are derived from it
    pub id: String,
    /// Human readable description placed on the system node
    pub comment: String,
    /// Free-form claims copied into every bag's metadata
    pub claims: BTreeMap<String, String>,
}

impl Default for TrsIdentity {
    fn default() -> Self {
        let mut claims = BTreeMap::new();
        claims.insert("Platform".to_string(), "trove".to_string());
        claims.insert("ProvidedBy".to_string(), "Trove Contributors".to_string());
        claims.insert(
            "Features".to_string(),
            "Isolated build and execution with signed, timestamped declarations".to_string(),
        );
        Self {
            id: "https://trs.trove.invalid/".to_string(),
            comment: "TRS Prototype".to_string(),
            claims,
        }
    }
}

/// External repository-to-image builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Image containing the builder
    pub image: String,
    /// Builder configuration file path inside the builder image
    pub config_path: String,
    /// Container engine control socket on the host
    pub engine_socket: String,
    /// Numeric user id the built image runs as
    pub user_id: u32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            image: "wholetale/repo2docker_wholetale:latest".to_string(),
            config_path: "/wholetale/repo2docker_config.py".to_string(),
            engine_socket: "/var/run/docker.sock".to_string(),
            user_id: 1000,
        }
    }
}

/// Container engine client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine command-line client
    pub binary: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("docker"),
        }
    }
}

/// Remote timestamp authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// RFC 3161 endpoint
    pub url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Pinned CA certificate (PEM) used to verify tokens
    pub ca_file: PathBuf,
    /// Pinned TSA certificate (PEM) used to verify tokens
    pub tsa_cert: PathBuf,
    /// Where the pinned certificates are fetched from when missing
    pub ca_url: String,
    /// Where the TSA certificate is fetched from when missing
    pub tsa_cert_url: String,
    /// `openssl` binary used for token verification
    pub openssl: PathBuf,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            url: "https://freetsa.org/tsr".to_string(),
            timeout_secs: 30,
            ca_file: PathBuf::from("certs/cacert.pem"),
            tsa_cert: PathBuf::from("certs/tsa.crt"),
            ca_url: "https://freetsa.org/files/cacert.pem".to_string(),
            tsa_cert_url: "https://freetsa.org/files/tsa.crt".to_string(),
            openssl: PathBuf::from("openssl"),
        }
    }
}

/// Owner applied recursively to unpacked submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipConfig {
    /// Owner user id
    pub uid: u32,
    /// Owner group id
    pub gid: u32,
}

/// Process-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Where payloads, declarations, signatures, tokens and archives are kept
    pub storage_dir: PathBuf,
    /// Root for per-run working directories
    pub scratch_dir: PathBuf,
    /// Scratch root as seen by the builder container (host path)
    pub host_scratch_dir: Option<PathBuf>,
    /// Signing key file (hex-encoded Ed25519 seed)
    pub signing_key_path: PathBuf,
    /// Recursive ownership applied to submissions, skipped when unset
    pub ownership: Option<OwnershipConfig>,
    /// System identity and claims
    pub trs: TrsIdentity,
    /// Image builder
    pub builder: BuilderConfig,
    /// Container engine client
    pub engine: EngineConfig,
    /// Timestamp authority
    pub timestamp: TimestampConfig,
    /// Capacity of a run's progress channel
    pub event_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("volumes/storage"),
            scratch_dir: std::env::temp_dir().join("trove"),
            host_scratch_dir: None,
            signing_key_path: PathBuf::from("volumes/keys/trs.key"),
            ownership: Some(OwnershipConfig {
                uid: 1000,
                gid: 1000,
            }),
            trs: TrsIdentity::default(),
            builder: BuilderConfig::default(),
            engine: EngineConfig::default(),
            timestamp: TimestampConfig::default(),
            event_buffer: 256,
        }
    }
}

impl ServiceConfig {
    /// Load from a JSON file; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed, or fails validation
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::io(format!("read config {}", path.display()), &e))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| CoreError::Config {
            field: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` naming the offending field
    pub fn validate(&self) -> CoreResult<()> {
        if self.event_buffer == 0 {
            return Err(CoreError::Config {
                field: "event_buffer".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.trs.id.ends_with('/') {
            return Err(CoreError::Config {
                field: "trs.id".to_string(),
                reason: "must end with '/'".to_string(),
            });
        }
        if self.timestamp.url.is_empty() {
            return Err(CoreError::Config {
                field: "timestamp.url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Scratch root as mounted into the builder container
    #[must_use]
    pub fn builder_scratch_dir(&self) -> &Path {
        self.host_scratch_dir.as_deref().unwrap_or(&self.scratch_dir)
    }

    /// Translate a path under `scratch_dir` to the engine host's view of it.
    /// Paths outside the scratch root are returned unchanged.
    #[must_use]
    pub fn host_path(&self, local: &Path) -> PathBuf {
        match (&self.host_scratch_dir, local.strip_prefix(&self.scratch_dir)) {
            (Some(host), Ok(rest)) => host.join(rest),
            _ => local.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_settings_defaults() {
        let settings = ImageSettings::default();
        assert_eq!(settings.entrypoint, "run.sh");
        assert_eq!(settings.target_repo_dir, "/home/jovyan/work");
        assert_eq!(settings.container_user, "jovyan");
        assert!(settings.extra_args.is_empty());
        assert!(!settings.network_enabled);
    }

    #[test]
    fn test_network_stays_disabled_when_omitted() {
        let settings: ImageSettings = serde_json::from_str(r#"{"entrypoint": "go.sh"}"#).unwrap();
        assert_eq!(settings.entrypoint, "go.sh");
        assert!(!settings.network_enabled);
    }

    #[test]
    fn test_image_settings_validation() {
        assert!(ImageSettings::default().validate().is_ok());
        assert!(ImageSettings::default().with_entrypoint(" ").validate().is_err());
        let relative = ImageSettings {
            target_repo_dir: "work".to_string(),
            ..ImageSettings::default()
        };
        assert!(relative.validate().is_err());
    }

    #[test]
    fn test_service_config_load_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trove.json");
        std::fs::write(
            &path,
            r#"{"storage_dir": "/srv/trove", "trs": {"id": "https://trs.example/"}}"#,
        )
        .unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/srv/trove"));
        assert_eq!(config.trs.id, "https://trs.example/");
        // untouched sections keep their defaults
        assert_eq!(config.trs.comment, "TRS Prototype");
        assert_eq!(config.builder, BuilderConfig::default());
    }

    #[test]
    fn test_service_config_rejects_bad_trs_id() {
        let config = ServiceConfig {
            trs: TrsIdentity {
                id: "https://trs.example".to_string(),
                ..TrsIdentity::default()
            },
            ..ServiceConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn test_builder_scratch_dir_fallback() {
        let mut config = ServiceConfig::default();
        assert_eq!(config.builder_scratch_dir(), config.scratch_dir.as_path());
        config.host_scratch_dir = Some(PathBuf::from("/host/tmp"));
        assert_eq!(config.builder_scratch_dir(), Path::new("/host/tmp"));
    }

    #[test]
    fn test_host_path_maps_scratch_only() {
        let config = ServiceConfig {
            scratch_dir: PathBuf::from("/srv/scratch"),
            host_scratch_dir: Some(PathBuf::from("/host/tmp")),
            ..ServiceConfig::default()
        };
        assert_eq!(
            config.host_path(Path::new("/srv/scratch/run/workspace")),
            PathBuf::from("/host/tmp/run/workspace")
        );
        assert_eq!(
            config.host_path(Path::new("/elsewhere")),
            PathBuf::from("/elsewhere")
        );
    }
}
