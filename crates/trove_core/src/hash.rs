//! Content digests for artifacts, manifests and attestation.
//!
//! Artifacts are identified by SHA-256. Bag manifests additionally carry
//! MD5, and the timestamp imprint is SHA-512.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::digest::DynDigest;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Read buffer used for streaming file digests
const READ_CHUNK: usize = 64 * 1024;

/// Hash algorithms understood by manifests and attestation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5 (fixity only, never identity)
    Md5,
    /// SHA-256
    Sha256,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Algorithms every bag manifest is written with
    pub const MANIFEST: [HashAlgorithm; 2] = [HashAlgorithm::Md5, HashAlgorithm::Sha256];

    /// Name as used in manifest file names (`manifest-<name>.txt`)
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex digest
    #[must_use]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    fn hasher(&self) -> Box<dyn DynDigest> {
        match self {
            Self::Md5 => Box::new(md5::Md5::new()),
            Self::Sha256 => Box::new(Sha256::new()),
            Self::Sha512 => Box::new(Sha512::new()),
        }
    }

    /// Hex digest of in-memory data
    #[must_use]
    pub fn digest_hex(&self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Hex digests of one reader for several algorithms in a single pass
    ///
    /// # Errors
    ///
    /// Returns the underlying read error
    pub fn digest_reader_multi<R: Read>(
        algorithms: &[HashAlgorithm],
        mut reader: R,
    ) -> std::io::Result<Vec<(HashAlgorithm, String)>> {
        let mut hashers: Vec<_> = algorithms.iter().map(|alg| (*alg, alg.hasher())).collect();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            for (_, hasher) in &mut hashers {
                hasher.update(&buf[..n]);
            }
        }
        Ok(hashers
            .into_iter()
            .map(|(alg, hasher)| (alg, hex::encode(hasher.finalize())))
            .collect())
    }

    /// Hex digests of a file for several algorithms in a single pass
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub fn digest_file_multi(
        algorithms: &[HashAlgorithm],
        path: &Path,
    ) -> std::io::Result<Vec<(HashAlgorithm, String)>> {
        let file = std::fs::File::open(path)?;
        Self::digest_reader_multi(algorithms, std::io::BufReader::new(file))
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(HashError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// A SHA-256 digest (artifact identity)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Digest([u8; 32]);

impl Sha256Digest {
    /// The number of bytes in a digest
    pub const LEN: usize = 32;

    /// Compute the digest of data
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(data));
        Self(out)
    }

    /// Create from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    ///
    /// # Errors
    ///
    /// Returns error if hex is invalid or not 32 bytes
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(hex).map_err(|_| HashError::InvalidHex)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength {
                expected: Self::LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Digest({})", self.to_hex())
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Sha256Digest {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Sha256Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A SHA-512 digest (timestamp imprint inputs)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha512Digest([u8; 64]);

impl Sha512Digest {
    /// The number of bytes in a digest
    pub const LEN: usize = 64;

    /// Compute the digest of data
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let mut out = [0u8; 64];
        out.copy_from_slice(&Sha512::digest(data));
        Self(out)
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Lowercase hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Sha512Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha512Digest({})", self.to_hex())
    }
}

impl fmt::Display for Sha512Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Composition fingerprint: SHA-256 over the hex digests sorted ascending
/// and concatenated without a delimiter.
#[must_use]
pub fn composition_fingerprint<'a, I>(digests: I) -> Sha256Digest
where
    I: IntoIterator<Item = &'a Sha256Digest>,
{
    let mut hexes: Vec<String> = digests.into_iter().map(Sha256Digest::to_hex).collect();
    hexes.sort_unstable();
    Sha256Digest::compute(hexes.concat().as_bytes())
}

/// Hash-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// Invalid hex encoding
    #[error("invalid hex encoding")]
    InvalidHex,
    /// Wrong digest length
    #[error("invalid digest length: {actual} bytes (expected {expected})")]
    InvalidLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        actual: usize,
    },
    /// Algorithm name not recognized
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            HashAlgorithm::Sha256.digest_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(
            HashAlgorithm::Md5.digest_hex(b"hello"),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(HashAlgorithm::Sha512.digest_hex(b"").len(), 128);
    }

    #[test]
    fn test_multi_digest_matches_single() {
        let data = vec![7u8; READ_CHUNK * 2 + 3];
        let all = HashAlgorithm::digest_reader_multi(&HashAlgorithm::MANIFEST, data.as_slice())
            .unwrap();
        assert_eq!(all.len(), 2);
        for (alg, hex) in all {
            assert_eq!(hex, alg.digest_hex(&data));
        }
    }

    #[test]
    fn test_sha256_hex_roundtrip() {
        let digest = Sha256Digest::compute(b"artifact");
        let restored: Sha256Digest = digest.to_hex().parse().unwrap();
        assert_eq!(digest, restored);
    }

    #[test]
    fn test_sha256_from_hex_rejects_short() {
        assert_eq!(
            Sha256Digest::from_hex("abcd"),
            Err(HashError::InvalidLength {
                expected: 32,
                actual: 2
            })
        );
        assert_eq!(Sha256Digest::from_hex("zz"), Err(HashError::InvalidHex));
    }

    #[test]
    fn test_sha256_serializes_as_hex() {
        let digest = Sha256Digest::compute(b"x");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", digest.to_hex()));
        let back: Sha256Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }

    #[test]
    fn test_algorithm_names() {
        for alg in [HashAlgorithm::Md5, HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            assert_eq!(alg.as_str().parse::<HashAlgorithm>().unwrap(), alg);
            assert_eq!(alg.digest_hex(b"abc").len(), alg.hex_len());
        }
        assert!("sha1".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_fingerprint_matches_manual_concatenation() {
        let a = Sha256Digest::compute(b"a");
        let b = Sha256Digest::compute(b"b");
        let mut hexes = vec![a.to_hex(), b.to_hex()];
        hexes.sort();
        let expected = Sha256Digest::compute(hexes.concat().as_bytes());
        assert_eq!(composition_fingerprint([&b, &a]), expected);
    }

    proptest! {
        #[test]
        fn prop_fingerprint_order_independent(
            contents in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..32), 1..16),
            seed in any::<u64>(),
        ) {
            let digests: Vec<Sha256Digest> = contents.iter().map(|c| Sha256Digest::compute(c)).collect();
            let mut shuffled = digests.clone();
            // deterministic rotation + reversal as a permutation
            let k = (seed as usize) % shuffled.len();
            shuffled.rotate_left(k);
            if seed % 2 == 0 {
                shuffled.reverse();
            }
            prop_assert_eq!(composition_fingerprint(&digests), composition_fingerprint(&shuffled));
        }
    }
}
