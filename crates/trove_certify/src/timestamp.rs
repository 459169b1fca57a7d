//! RFC 3161 timestamping of a signed declaration.
//!
//! The timestamped data is the canonical JSON of a digest object holding
//! the SHA-512 of the canonical declaration and of the armored signature
//! text. The authority sees only the SHA-512 of that object. Responses are
//! kept verbatim; verifying them is left to a [`TimestampVerifier`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trove_core::{CanonicalError, Sha512Digest, TimestampConfig, to_canonical_bytes};

use crate::der::{self, DerError};

/// DER of the SHA-512 `AlgorithmIdentifier` (OID 2.16.840.1.101.3.4.2.3, NULL
/// parameters)
const SHA512_ALGORITHM: [u8; 15] = [
    0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03, 0x05, 0x00,
];

const QUERY_CONTENT_TYPE: &str = "application/timestamp-query";
const REPLY_CONTENT_TYPE: &str = "application/timestamp-reply";

/// Result type for timestamp operations
pub type TimestampResult<T> = Result<T, TimestampError>;

/// Timestamp errors
#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    /// Digest object could not be serialized
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    /// Authority unreachable or transfer failed
    #[error("timestamp authority request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Authority answered with a non-success HTTP status
    #[error("timestamp authority returned HTTP {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },
    /// Response could not be parsed
    #[error("malformed timestamp response: {0}")]
    Malformed(#[from] DerError),
    /// Authority refused the request
    #[error(
        "timestamp not granted (status {status}): {}",
        .text.as_deref().unwrap_or("no status text")
    )]
    Rejected {
        /// `PKIStatus` value
        status: u64,
        /// First status string, if any
        text: Option<String>,
    },
    /// Granted response without a token
    #[error("timestamp response carries no token")]
    MissingToken,
    /// Token does not cover the data
    #[error("timestamp verification failed: {0}")]
    Verification(String),
    /// Local file or process failure
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl TimestampError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Digests bound together by the timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestObject {
    /// SHA-512 hex of the canonical declaration bytes
    pub tro_declaration: String,
    /// SHA-512 hex of the armored signature text
    pub trs_signature: String,
}

impl DigestObject {
    /// Digest object for a declaration and its signature file contents
    #[must_use]
    pub fn from_parts(declaration: &[u8], signature: &[u8]) -> Self {
        Self {
            tro_declaration: Sha512Digest::compute(declaration).to_hex(),
            trs_signature: Sha512Digest::compute(signature).to_hex(),
        }
    }

    /// The bytes a token attests to
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn canonical_bytes(&self) -> TimestampResult<Vec<u8>> {
        Ok(to_canonical_bytes(self)?)
    }
}

/// A `TimeStampReq` for one SHA-512 imprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRequest {
    imprint: Sha512Digest,
    nonce: Option<u64>,
}

impl TimestampRequest {
    /// Request over the SHA-512 of `data`
    #[must_use]
    pub fn for_data(data: &[u8]) -> Self {
        Self {
            imprint: Sha512Digest::compute(data),
            nonce: None,
        }
    }

    /// Include a nonce
    #[must_use]
    pub const fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// The message imprint
    #[must_use]
    pub const fn imprint(&self) -> &Sha512Digest {
        &self.imprint
    }

    /// DER encoding, version 1 with `certReq` set
    #[must_use]
    pub fn to_der(&self) -> Vec<u8> {
        let mut imprint = SHA512_ALGORITHM.to_vec();
        imprint.extend(der::tlv(der::OCTET_STRING, self.imprint.as_bytes()));

        let mut body = der::unsigned(1);
        body.extend(der::tlv(der::SEQUENCE, &imprint));
        if let Some(nonce) = self.nonce {
            body.extend(der::unsigned(nonce));
        }
        body.extend(der::tlv(der::BOOLEAN, &[0xff]));
        der::tlv(der::SEQUENCE, &body)
    }
}

/// A granted `TimeStampResp`, stored verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampToken {
    response: Vec<u8>,
    status: u64,
}

impl TimestampToken {
    /// Accept a response if it was granted and carries a token
    ///
    /// # Errors
    ///
    /// Returns `TimestampError::Rejected` for a refused request,
    /// `TimestampError::MissingToken` if no token follows a granted status,
    /// or `TimestampError::Malformed`
    pub fn from_response(response: Vec<u8>) -> TimestampResult<Self> {
        let (body, _) = der::expect(&response, der::SEQUENCE)?;
        let (status_info, rest) = der::expect(body, der::SEQUENCE)?;
        let (status, details) = der::expect(status_info, der::INTEGER)?;
        let status = der::to_unsigned(status)?;
        if status > 1 {
            return Err(TimestampError::Rejected {
                status,
                text: status_text(details),
            });
        }
        match der::read(rest) {
            Ok((der::SEQUENCE, _, _)) => {}
            Ok(_) => return Err(DerError("token is not a ContentInfo").into()),
            Err(_) if rest.is_empty() => return Err(TimestampError::MissingToken),
            Err(e) => return Err(e.into()),
        }
        Ok(Self { response, status })
    }

    /// Response bytes, as stored in `.tsr` files
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.response
    }

    /// `PKIStatus`: 0 granted, 1 granted with modifications
    #[must_use]
    pub const fn status(&self) -> u64 {
        self.status
    }
}

fn status_text(details: &[u8]) -> Option<String> {
    // statusString is a SEQUENCE OF UTF8String; failInfo is a BIT STRING
    let (strings, _) = der::expect(details, der::SEQUENCE).ok()?;
    let (text, _) = der::expect(strings, der::UTF8_STRING).ok()?;
    String::from_utf8(text.to_vec()).ok()
}

/// Issues timestamp tokens
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    /// Timestamp `request`
    async fn timestamp(&self, request: &TimestampRequest) -> TimestampResult<TimestampToken>;
}

/// Checks that a token covers some data
#[async_trait]
pub trait TimestampVerifier: Send + Sync {
    /// Verify `token` against `data`
    async fn verify(&self, token: &TimestampToken, data: &[u8]) -> TimestampResult<()>;
}

/// RFC 3161 authority reached over HTTP
#[derive(Debug, Clone)]
pub struct Rfc3161Authority {
    client: reqwest::Client,
    url: String,
}

impl Rfc3161Authority {
    /// Authority at `url`
    ///
    /// # Errors
    ///
    /// Returns `TimestampError::Http` if the client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> TimestampResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Authority from service configuration
    ///
    /// # Errors
    ///
    /// Returns `TimestampError::Http` if the client cannot be built
    pub fn from_config(config: &TimestampConfig) -> TimestampResult<Self> {
        Self::new(config.url.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl TimestampAuthority for Rfc3161Authority {
    #[tracing::instrument(skip_all, fields(url = %self.url))]
    async fn timestamp(&self, request: &TimestampRequest) -> TimestampResult<TimestampToken> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, QUERY_CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, REPLY_CONTENT_TYPE)
            .body(request.to_der())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TimestampError::Status {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        let token = TimestampToken::from_response(body.to_vec())?;
        tracing::debug!(status = token.status(), len = token.as_bytes().len(), "timestamp granted");
        Ok(token)
    }
}
