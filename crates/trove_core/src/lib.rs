//! Trove Core Types
//!
//! Pure types shared by every stage of an attested run: identifiers,
//! content digests, canonical JSON, configuration, run states and the
//! progress events a run streams to its caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod config;
pub mod error;
pub mod event;
pub mod hash;
pub mod id;
pub mod state;
pub mod time;

// Re-exports
pub use canonical::{CanonicalError, to_canonical_bytes, to_canonical_string};
pub use config::{
    BuilderConfig, EngineConfig, ImageSettings, OwnershipConfig, ServiceConfig, TimestampConfig,
    TrsIdentity,
};
pub use error::{CoreError, CoreResult};
pub use event::{EventKind, EventSink, LogSource, ProgressEvent};
pub use hash::{HashAlgorithm, HashError, Sha256Digest, Sha512Digest, composition_fingerprint};
pub use id::{ArchiveId, ImageTag, RunId};
pub use state::RunState;
pub use time::Timestamp;
