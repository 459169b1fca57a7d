//! Signing and timestamping of built declarations.
//!
//! The two steps are separate so the caller can persist the declaration and
//! signature before the timestamp is requested, and discard both if it
//! fails.

use std::sync::Arc;

use trove_declaration::{Declaration, DeclarationError};

use crate::signature::{PublicKey, SignatureError, Signer};
use crate::timestamp::{
    DigestObject, TimestampAuthority, TimestampError, TimestampRequest, TimestampToken,
};

/// Result type for attestation
pub type AttestResult<T> = Result<T, AttestError>;

/// Attestation failure
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    /// Declaration could not be canonicalized
    #[error(transparent)]
    Declaration(#[from] DeclarationError),
    /// Declaration names a key other than the signer's
    #[error("declaration embeds a public key other than the signing key")]
    KeyMismatch,
    /// Embedded key could not be read
    #[error(transparent)]
    Signature(#[from] SignatureError),
    /// Timestamp authority failed or refused
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

/// Canonical declaration bytes with their armored signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDeclaration {
    declaration: Vec<u8>,
    signature: String,
}

impl SignedDeclaration {
    /// Contents of the `.jsonld` file
    #[must_use]
    pub fn declaration_bytes(&self) -> &[u8] {
        &self.declaration
    }

    /// Contents of the `.sig` file
    #[must_use]
    pub fn signature_text(&self) -> &str {
        &self.signature
    }

    /// Digest object binding both files
    #[must_use]
    pub fn digest_object(&self) -> DigestObject {
        DigestObject::from_parts(&self.declaration, self.signature.as_bytes())
    }
}

/// Signs with the service key and timestamps through an authority
#[derive(Clone)]
pub struct Attestor {
    signer: Arc<Signer>,
    authority: Arc<dyn TimestampAuthority>,
}

impl Attestor {
    /// Attestor with `signer` and `authority`
    #[must_use]
    pub fn new(signer: Arc<Signer>, authority: Arc<dyn TimestampAuthority>) -> Self {
        Self { signer, authority }
    }

    /// Key that declarations must embed
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.signer.public_key()
    }

    /// Detached signature over the canonical bytes of `declaration`
    ///
    /// # Errors
    ///
    /// Returns `AttestError::KeyMismatch` if the declaration embeds another
    /// key, or the canonicalization error
    pub fn sign(&self, declaration: &Declaration) -> AttestResult<SignedDeclaration> {
        let embedded = PublicKey::from_armored(declaration.public_key()?)?;
        if embedded != self.signer.public_key() {
            return Err(AttestError::KeyMismatch);
        }
        let bytes = declaration.canonical_bytes()?;
        let signature = self.signer.sign(&bytes).to_armored();
        tracing::debug!(len = bytes.len(), "declaration signed");
        Ok(SignedDeclaration {
            declaration: bytes,
            signature,
        })
    }

    /// Timestamp the digest object of `signed`
    ///
    /// # Errors
    ///
    /// Returns `AttestError::Timestamp` if the authority is unreachable or
    /// refuses
    pub async fn timestamp(&self, signed: &SignedDeclaration) -> AttestResult<TimestampToken> {
        let data = signed.digest_object().canonical_bytes()?;
        let request = TimestampRequest::for_data(&data);
        let token = self.authority.timestamp(&request).await?;
        tracing::debug!(status = token.status(), "declaration timestamped");
        Ok(token)
    }
}

impl std::fmt::Debug for Attestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attestor")
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}
