//! Trove Attestation
//!
//! Signs canonical declarations with the service's Ed25519 key, binds
//! declaration and signature under an RFC 3161 timestamp, and verifies the
//! stored results of a run independently of the process that produced them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attestor;
mod der;
pub mod openssl;
pub mod signature;
pub mod timestamp;
pub mod verifier;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use attestor::{AttestError, AttestResult, Attestor, SignedDeclaration};
pub use der::DerError;
pub use openssl::{OpensslVerifier, TsaCertificates};
pub use signature::{PublicKey, Signature, SignatureError, SignatureVerifier, Signer};
pub use timestamp::{
    DigestObject, Rfc3161Authority, TimestampAuthority, TimestampError, TimestampRequest,
    TimestampResult, TimestampToken, TimestampVerifier,
};
pub use verifier::{
    Check, CheckResult, Evidence, EvidenceError, VerificationReport, Verifier, VerifyFailure,
};
