//! Identifiers for runs, archives and built images.
//!
//! Run IDs are random UUIDs. Archive IDs are name-derived (UUIDv5) so that
//! a declaration's base identifier can be recomputed from the archive
//! file name alone.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Run identifier - identifies a single submission and everything it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse from the hyphenated form used as the run's file basename
    ///
    /// # Errors
    ///
    /// Returns error if the string is not a UUID
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CoreError::InvalidId {
                reason: format!("{s}: {e}"),
            })
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Basename shared by every file the run stores
    #[must_use]
    pub fn basename(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Name-derived identifier of a result archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveId(Uuid);

impl ArchiveId {
    /// Suffix appended to the run basename to form the archive file name
    pub const ARCHIVE_SUFFIX: &'static str = "_run.zip";

    /// Derive from the system identifier and run basename.
    ///
    /// Computes UUIDv5 in the URL namespace over
    /// `<trs_id><basename>_run.zip`.
    #[must_use]
    pub fn derive(trs_id: &str, basename: &str) -> Self {
        let name = format!("{trs_id}{basename}{}", Self::ARCHIVE_SUFFIX);
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Base IRI for the declaration graph
    #[must_use]
    pub fn base_iri(&self) -> String {
        format!("arcp://uuid,{}/", self.0.hyphenated())
    }
}

impl std::fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Tag of an image built for a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageTag(String);

impl ImageTag {
    /// Tag derived from the run id, unique per submission
    #[must_use]
    pub fn for_run(run_id: &RunId) -> Self {
        Self(format!("local/trove-{}", run_id.as_uuid().simple()))
    }

    /// Use an explicit tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Tag as string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_parse_roundtrip() {
        let id = RunId::new();
        let parsed = RunId::parse(&id.basename()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.to_string(), id.basename());
    }

    #[test]
    fn test_run_id_parse_rejects_garbage() {
        assert!(matches!(
            RunId::parse("not-a-uuid"),
            Err(CoreError::InvalidId { .. })
        ));
    }

    #[test]
    fn test_archive_id_is_name_derived() {
        let a = ArchiveId::derive("https://trs.example/", "run-1");
        let b = ArchiveId::derive("https://trs.example/", "run-1");
        let c = ArchiveId::derive("https://trs.example/", "run-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_uuid().get_version_num(), 5);
    }

    #[test]
    fn test_archive_id_matches_uuid5_of_archive_url() {
        let id = ArchiveId::derive("https://trs.example/", "abc");
        let expected = Uuid::new_v5(&Uuid::NAMESPACE_URL, b"https://trs.example/abc_run.zip");
        assert_eq!(id.as_uuid(), expected);
        assert_eq!(id.base_iri(), format!("arcp://uuid,{}/", expected));
    }

    #[test]
    fn test_image_tag_unique_per_run() {
        let a = ImageTag::for_run(&RunId::new());
        let b = ImageTag::for_run(&RunId::new());
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("local/trove-"));
        assert_eq!(a.as_str(), a.as_str().to_lowercase());
    }
}
