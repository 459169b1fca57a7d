//! Ed25519 signatures over canonical declaration bytes.
//!
//! Keys and signatures travel as armored text: a `BEGIN` line naming the
//! kind, the hex encoding wrapped at 64 columns, and a matching `END` line.
//! The secret key lives in a file holding the hex-encoded 32-byte seed.

use std::io::Write as _;
use std::path::Path;

use ed25519_dalek::Signature as DalekSignature;
use ed25519_dalek::Signer as DalekSigner;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use trove_core::Sha256Digest;
use zeroize::Zeroizing;

const PUBLIC_KEY_LABEL: &str = "TROVE ED25519 PUBLIC KEY";
const SIGNATURE_LABEL: &str = "TROVE ED25519 SIGNATURE";
const ARMOR_WIDTH: usize = 64;

/// A detached signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Get the signature bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Armored text, as stored in `.sig` files
    #[must_use]
    pub fn to_armored(&self) -> String {
        armor(SIGNATURE_LABEL, &self.0)
    }

    /// Parse armored text
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::Armor` or `SignatureError::InvalidSignature`
    pub fn from_armored(text: &str) -> Result<Self, SignatureError> {
        let bytes = dearmor(SIGNATURE_LABEL, text)?;
        let arr: [u8; 64] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SignatureError::InvalidSignature)?;
        Ok(Self(arr))
    }
}

/// Public half of the signing key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Get the underlying bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// SHA-256 of the key bytes, recorded in bag metadata
    #[must_use]
    pub fn fingerprint(&self) -> String {
        Sha256Digest::compute(&self.0).to_hex()
    }

    /// Armored text, as embedded in declarations
    #[must_use]
    pub fn to_armored(&self) -> String {
        armor(PUBLIC_KEY_LABEL, &self.0)
    }

    /// Parse armored text
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::Armor` or `SignatureError::InvalidPublicKey`
    pub fn from_armored(text: &str) -> Result<Self, SignatureError> {
        let bytes = dearmor(PUBLIC_KEY_LABEL, text)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(Self(arr))
    }
}

/// Holds the service's signing key
pub struct Signer {
    signing_key: SigningKey,
}

impl Signer {
    /// Signer with a fresh random key
    #[must_use]
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut *seed);
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Signer from a hex-encoded seed
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::InvalidSecretKey` unless the secret decodes
    /// to exactly 32 bytes
    pub fn from_secret(secret: &SecretString) -> Result<Self, SignatureError> {
        let bytes = Zeroizing::new(
            hex::decode(secret.expose_secret().trim())
                .map_err(|_| SignatureError::InvalidSecretKey)?,
        );
        if bytes.len() != 32 {
            return Err(SignatureError::InvalidSecretKey);
        }
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&bytes);
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Load the key file at `path`
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::KeyFile` if the file cannot be read, or
    /// `SignatureError::InvalidSecretKey` if it does not hold a seed
    pub fn from_key_file(path: &Path) -> Result<Self, SignatureError> {
        let text = std::fs::read_to_string(path).map_err(|source| SignatureError::KeyFile {
            path: path.display().to_string(),
            source,
        })?;
        let signer = Self::from_secret(&SecretString::from(text))?;
        tracing::debug!(
            path = %path.display(),
            fingerprint = %signer.public_key().fingerprint(),
            "signing key loaded"
        );
        Ok(signer)
    }

    /// Write the seed to a new file at `path`, readable only by its owner
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::KeyFile` if the file exists or cannot be
    /// written
    pub fn write_key_file(&self, path: &Path) -> Result<(), SignatureError> {
        let key_file_error = |source: std::io::Error| SignatureError::KeyFile {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(key_file_error)?;
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path).map_err(key_file_error)?;
        let text = Zeroizing::new(format!("{}\n", hex::encode(self.signing_key.to_bytes())));
        file.write_all(text.as_bytes()).map_err(key_file_error)?;
        file.sync_all().map_err(key_file_error)
    }

    /// Get the public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// Checks signatures against one public key
#[derive(Debug)]
pub struct SignatureVerifier {
    verifying_key: VerifyingKey,
}

impl SignatureVerifier {
    /// Create a verifier from a public key
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::InvalidPublicKey` if the bytes are not a
    /// curve point
    pub fn new(public_key: PublicKey) -> Result<Self, SignatureError> {
        let verifying_key = VerifyingKey::from_bytes(&public_key.0)
            .map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// Verify a signature on a message
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::VerificationFailed` if the signature does
    /// not match
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        let sig = DalekSignature::from_bytes(&signature.0);
        self.verifying_key
            .verify_strict(message, &sig)
            .map_err(|_| SignatureError::VerificationFailed)
    }
}

fn armor(label: &str, bytes: &[u8]) -> String {
    let encoded = hex::encode(bytes);
    let mut out = format!("-----BEGIN {label}-----\n");
    for line in encoded.as_bytes().chunks(ARMOR_WIDTH) {
        // hex output is ASCII
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

fn dearmor(label: &str, text: &str) -> Result<Vec<u8>, SignatureError> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let mut lines = text.lines().map(str::trim).skip_while(|l| l.is_empty());
    if lines.next() != Some(begin.as_str()) {
        return Err(SignatureError::Armor(format!("missing {begin}")));
    }
    let mut body = String::new();
    for line in lines.by_ref() {
        if line == end {
            return hex::decode(&body).map_err(|_| SignatureError::Armor("invalid hex".to_string()));
        }
        body.push_str(line);
    }
    Err(SignatureError::Armor(format!("missing {end}")))
}

/// Signature-related errors
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// Invalid secret key
    #[error("invalid secret key")]
    InvalidSecretKey,
    /// Invalid public key
    #[error("invalid public key")]
    InvalidPublicKey,
    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,
    /// Armored text is malformed
    #[error("malformed armor: {0}")]
    Armor(String),
    /// Key file could not be read or written
    #[error("key file {path}: {source}")]
    KeyFile {
        /// Key file path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// Verification failed
    #[error("signature verification failed")]
    VerificationFailed,
}
