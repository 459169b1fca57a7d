//! Trove Bags
//!
//! Checksummed directory bags with multi-algorithm manifests, the
//! arrangements recorded from them, and the zip archives runs are
//! published as. All operations are synchronous filesystem work.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod arrangement;
pub mod bag;
pub mod error;
pub mod fs;
pub mod manifest;
pub mod validate;

pub use archive::{Packager, inspect_archive, unpack_archive};
pub use arrangement::{Arrangement, ArrangementEntry, ArrangementRecorder};
pub use bag::{Bag, BagInfo};
pub use error::{BagError, BagResult};
pub use manifest::{Manifest, ManifestEntry, ManifestKind};
pub use validate::{BagProblem, BagValidator, ValidationSummary};
