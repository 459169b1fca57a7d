//! Independent verification of a produced run.
//!
//! Three checks run over the stored files and none of them writes anything
//! outside a private scratch directory:
//! - the result bag's manifests against its payload
//! - the signature against the declaration bytes as stored, under a key
//!   trusted by the caller
//! - the timestamp token against the rebuilt digest object
//!
//! Every check is reported on its own; one failing does not skip the rest.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use trove_bag::{Bag, BagError, BagValidator, unpack_archive};
use trove_declaration::Declaration;

use crate::signature::{PublicKey, Signature, SignatureVerifier};
use crate::timestamp::{DigestObject, TimestampToken, TimestampVerifier};

/// A verification check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Check {
    /// Bag fixity
    Bag,
    /// Declaration signature
    Signature,
    /// Timestamp token
    Timestamp,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bag => "bag",
            Self::Signature => "signature",
            Self::Timestamp => "timestamp",
        })
    }
}

/// Why a check failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyFailure {
    /// Manifests do not match the payload
    #[error("bag invalid: {0}")]
    BagInvalid(String),
    /// Signature does not verify
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),
    /// Token does not cover the declaration and signature
    #[error("timestamp invalid: {0}")]
    TimestampInvalid(String),
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Which check
    pub check: Check,
    /// Failure, if any
    pub failure: Option<VerifyFailure>,
}

impl CheckResult {
    /// Whether the check passed
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Per-check verification results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    checks: Vec<CheckResult>,
}

impl VerificationReport {
    fn record(&mut self, check: Check, outcome: Result<(), VerifyFailure>) {
        match &outcome {
            Ok(()) => tracing::info!(%check, "check passed"),
            Err(failure) => tracing::warn!(%check, %failure, "check failed"),
        }
        self.checks.push(CheckResult {
            check,
            failure: outcome.err(),
        });
    }

    /// Whether every performed check passed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(CheckResult::passed)
    }

    /// All checks, in the order performed
    #[must_use]
    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    /// Result of `check`, if it was performed
    #[must_use]
    pub fn get(&self, check: Check) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == check)
    }

    /// Failed checks
    #[must_use]
    pub fn failures(&self) -> Vec<&VerifyFailure> {
        self.checks.iter().filter_map(|c| c.failure.as_ref()).collect()
    }

    /// Get summary
    #[must_use]
    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed()).count();
        format!(
            "Verification {}: {}/{} checks passed",
            if self.passed() { "PASSED" } else { "FAILED" },
            passed,
            self.checks.len()
        )
    }
}

/// Error reading evidence files
#[derive(Debug, thiserror::Error)]
#[error("cannot read {path}: {source}")]
pub struct EvidenceError {
    /// File that could not be read
    pub path: PathBuf,
    /// Underlying error
    #[source]
    pub source: std::io::Error,
}

/// The stored files of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    /// `.jsonld` contents
    pub declaration: Vec<u8>,
    /// `.sig` contents
    pub signature: Vec<u8>,
    /// `.tsr` contents
    pub token: Vec<u8>,
}

impl Evidence {
    /// Read the three files
    ///
    /// # Errors
    ///
    /// Returns `EvidenceError` naming the first unreadable file
    pub fn load(declaration: &Path, signature: &Path, token: &Path) -> Result<Self, EvidenceError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| EvidenceError {
                path: path.to_path_buf(),
                source,
            })
        };
        Ok(Self {
            declaration: read(declaration)?,
            signature: read(signature)?,
            token: read(token)?,
        })
    }
}

/// Verifies produced runs
#[derive(Clone)]
pub struct Verifier {
    timestamps: Arc<dyn TimestampVerifier>,
    pinned_key: Option<PublicKey>,
}

impl Verifier {
    /// Verifier checking tokens with `timestamps`
    #[must_use]
    pub fn new(timestamps: Arc<dyn TimestampVerifier>) -> Self {
        Self {
            timestamps,
            pinned_key: None,
        }
    }

    /// Trust `key`. The declaration must embed it and the signature must
    /// verify under it. Without a trusted key the signature check fails.
    #[must_use]
    pub fn with_pinned_key(mut self, key: PublicKey) -> Self {
        self.pinned_key = Some(key);
        self
    }

    /// Check `evidence`, and the bag inside `archive` when given
    #[tracing::instrument(skip_all)]
    pub async fn verify(&self, evidence: &Evidence, archive: Option<&Path>) -> VerificationReport {
        let mut report = VerificationReport::default();
        if let Some(archive) = archive {
            report.record(Check::Bag, check_archive(archive));
        }
        report.record(Check::Signature, self.check_signature(evidence));
        report.record(Check::Timestamp, self.check_timestamp(evidence).await);
        report
    }

    /// Check the bag rooted at `root`
    #[must_use]
    pub fn verify_bag(root: &Path) -> VerificationReport {
        let mut report = VerificationReport::default();
        report.record(Check::Bag, check_bag(root));
        report
    }

    fn check_signature(&self, evidence: &Evidence) -> Result<(), VerifyFailure> {
        let invalid = |reason: String| VerifyFailure::SignatureInvalid(reason);
        let declaration = Declaration::from_slice(&evidence.declaration)
            .map_err(|e| invalid(e.to_string()))?;
        let embedded = declaration
            .public_key()
            .map_err(|e| invalid(e.to_string()))
            .and_then(|text| PublicKey::from_armored(text).map_err(|e| invalid(e.to_string())))?;
        let trusted = self
            .pinned_key
            .ok_or_else(|| invalid("no trusted key".to_string()))?;
        if trusted != embedded {
            return Err(invalid(format!(
                "declaration key {} is not the trusted key {}",
                embedded.fingerprint(),
                trusted.fingerprint()
            )));
        }
        let text = std::str::from_utf8(&evidence.signature)
            .map_err(|_| invalid("signature file is not text".to_string()))?;
        let signature = Signature::from_armored(text).map_err(|e| invalid(e.to_string()))?;
        SignatureVerifier::new(trusted)
            .and_then(|v| v.verify(&evidence.declaration, &signature))
            .map_err(|e| invalid(e.to_string()))
    }

    async fn check_timestamp(&self, evidence: &Evidence) -> Result<(), VerifyFailure> {
        let invalid = |reason: String| VerifyFailure::TimestampInvalid(reason);
        let token =
            TimestampToken::from_response(evidence.token.clone()).map_err(|e| invalid(e.to_string()))?;
        let data = DigestObject::from_parts(&evidence.declaration, &evidence.signature)
            .canonical_bytes()
            .map_err(|e| invalid(e.to_string()))?;
        self.timestamps
            .verify(&token, &data)
            .await
            .map_err(|e| invalid(e.to_string()))
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("pinned_key", &self.pinned_key.map(|k| k.fingerprint()))
            .finish_non_exhaustive()
    }
}

fn check_archive(archive: &Path) -> Result<(), VerifyFailure> {
    let scratch = tempfile::tempdir().map_err(|e| VerifyFailure::BagInvalid(e.to_string()))?;
    unpack_archive(archive, scratch.path()).map_err(|e| VerifyFailure::BagInvalid(e.to_string()))?;
    check_bag(scratch.path())
}

fn check_bag(root: &Path) -> Result<(), VerifyFailure> {
    let bag = Bag::open(root).map_err(|e| VerifyFailure::BagInvalid(e.to_string()))?;
    match BagValidator::new().validate(&bag) {
        Ok(summary) => {
            tracing::debug!(files = summary.files, octets = summary.octets, "bag valid");
            Ok(())
        }
        Err(BagError::Invalid { problems }) => Err(VerifyFailure::BagInvalid(
            problems
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )),
        Err(e) => Err(VerifyFailure::BagInvalid(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestor::Attestor;
    use crate::signature::Signer;
    use crate::testing::{InProcessAuthority, InProcessVerifier};
    use trove_bag::{BagInfo, Packager};
    use trove_core::{Sha256Digest, Timestamp, TrsIdentity};
    use trove_declaration::{Composition, DeclarationBuilder, Performance};

    struct Fixture {
        _dir: tempfile::TempDir,
        bag_root: PathBuf,
        archive: PathBuf,
        evidence: Evidence,
        key: PublicKey,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bag_root = dir.path().join("final");
        std::fs::create_dir(&bag_root).unwrap();
        std::fs::write(bag_root.join("out.txt"), "hello\n").unwrap();
        let bag = Bag::create(&bag_root, &BagInfo::new()).unwrap();
        let archive = Packager::new().package(&bag, &dir.path().join("run_run.zip")).unwrap();

        let signer = Arc::new(Signer::generate());
        let key = signer.public_key();
        let attestor = Attestor::new(signer, Arc::new(InProcessAuthority::new()));
        let composition = Composition::assemble(
            vec![(1, Sha256Digest::compute(b"hello\n"), "data/out.txt".to_string())],
            |_, _| Ok("text/plain".to_string()),
        )
        .unwrap();
        let now = Timestamp::now();
        let declaration = DeclarationBuilder::new(TrsIdentity::default(), key.to_armored()).build(
            "run",
            &composition,
            &Performance {
                started_at: now,
                ended_at: now,
                network_enabled: false,
            },
        );
        let signed = attestor.sign(&declaration).unwrap();
        let token = attestor.timestamp(&signed).await.unwrap();

        Fixture {
            _dir: dir,
            bag_root,
            archive,
            evidence: Evidence {
                declaration: signed.declaration_bytes().to_vec(),
                signature: signed.signature_text().as_bytes().to_vec(),
                token: token.as_bytes().to_vec(),
            },
            key,
        }
    }

    fn verifier() -> Verifier {
        Verifier::new(Arc::new(InProcessVerifier))
    }

    #[tokio::test]
    async fn test_untampered_run_passes() {
        let f = fixture().await;
        let report = verifier()
            .with_pinned_key(f.key)
            .verify(&f.evidence, Some(&f.archive))
            .await;
        assert!(report.passed(), "{:?}", report.failures());
        assert_eq!(report.checks().len(), 3);
        assert_eq!(report.summary(), "Verification PASSED: 3/3 checks passed");
    }

    #[tokio::test]
    async fn test_corrupted_declaration_fails_signature_and_timestamp() {
        let mut f = fixture().await;
        // flip a byte inside a string value so the text still parses
        let at = f
            .evidence
            .declaration
            .windows(12)
            .position(|w| w == b"TRS Prototyp")
            .unwrap();
        f.evidence.declaration[at] = b'X';

        let report = verifier()
            .with_pinned_key(f.key)
            .verify(&f.evidence, Some(&f.archive))
            .await;
        assert!(report.get(Check::Bag).unwrap().passed());
        assert!(matches!(
            report.get(Check::Signature).unwrap().failure,
            Some(VerifyFailure::SignatureInvalid(_))
        ));
        assert!(matches!(
            report.get(Check::Timestamp).unwrap().failure,
            Some(VerifyFailure::TimestampInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_pinned_key_must_match() {
        let f = fixture().await;
        let report = verifier()
            .with_pinned_key(Signer::generate().public_key())
            .verify(&f.evidence, None)
            .await;
        assert!(report.get(Check::Bag).is_none());
        assert!(!report.get(Check::Signature).unwrap().passed());
        // timestamp does not depend on which key is trusted
        assert!(report.get(Check::Timestamp).unwrap().passed());
    }

    #[tokio::test]
    async fn test_garbage_token_fails_only_timestamp() {
        let mut f = fixture().await;
        f.evidence.token = b"not der".to_vec();
        let report = verifier().with_pinned_key(f.key).verify(&f.evidence, None).await;
        assert!(report.get(Check::Signature).unwrap().passed());
        assert!(!report.get(Check::Timestamp).unwrap().passed());
        assert_eq!(report.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_self_signed_declaration_needs_a_trusted_key() {
        // the fixture's key is fresh, so nobody trusts it unless pinned
        let f = fixture().await;
        let report = verifier().verify(&f.evidence, None).await;
        assert_eq!(
            report.get(Check::Signature).unwrap().failure,
            Some(VerifyFailure::SignatureInvalid("no trusted key".to_string()))
        );
        assert!(report.get(Check::Timestamp).unwrap().passed());

        let service = Signer::generate().public_key();
        let report = verifier().with_pinned_key(service).verify(&f.evidence, None).await;
        match &report.get(Check::Signature).unwrap().failure {
            Some(VerifyFailure::SignatureInvalid(reason)) => {
                assert!(reason.contains(&service.fingerprint()));
            }
            other => panic!("expected signature failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tampered_payload_is_bag_invalid() {
        let f = fixture().await;
        std::fs::write(f.bag_root.join("data").join("out.txt"), "jello\n").unwrap();
        let report = Verifier::verify_bag(&f.bag_root);
        match &report.get(Check::Bag).unwrap().failure {
            Some(VerifyFailure::BagInvalid(reason)) => assert!(reason.contains("out.txt")),
            other => panic!("expected bag failure, got {other:?}"),
        }
    }

    #[test]
    fn test_evidence_load_names_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let decl = dir.path().join("run.jsonld");
        std::fs::write(&decl, "{}").unwrap();
        let err = Evidence::load(&decl, &dir.path().join("run.sig"), &dir.path().join("run.tsr"))
            .unwrap_err();
        assert!(err.path.ends_with("run.sig"));
    }
}
