//! In-process timestamp authority and verifier.
//!
//! Tokens are minimal `TimeStampResp` structures whose content is the raw
//! imprint; the verifier accepts a token when it ends with the SHA-512 of
//! the data. Nothing here is a real RFC 3161 signature.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use trove_core::Sha512Digest;

use crate::der;
use crate::timestamp::{
    TimestampAuthority, TimestampError, TimestampRequest, TimestampResult, TimestampToken,
    TimestampVerifier,
};

/// A granted response whose token content is `imprint`
#[must_use]
pub fn granted_response(imprint: &[u8]) -> Vec<u8> {
    let status = der::tlv(der::SEQUENCE, &der::unsigned(0));
    let token = der::tlv(der::SEQUENCE, &der::tlv(der::OCTET_STRING, imprint));
    der::tlv(der::SEQUENCE, &[status, token].concat())
}

/// A rejection response (`PKIStatus` 2) with `text`
#[must_use]
pub fn rejected_response(text: &str) -> Vec<u8> {
    let strings = der::tlv(der::SEQUENCE, &der::tlv(der::UTF8_STRING, text.as_bytes()));
    let status = der::tlv(der::SEQUENCE, &[der::unsigned(2), strings].concat());
    der::tlv(der::SEQUENCE, &status)
}

/// Grants (or refuses) every request without leaving the process
#[derive(Debug, Default)]
pub struct InProcessAuthority {
    rejecting: bool,
    issued: AtomicUsize,
}

impl InProcessAuthority {
    /// Authority granting every request
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Authority refusing every request
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            rejecting: true,
            issued: AtomicUsize::new(0),
        }
    }

    /// Number of tokens granted so far
    #[must_use]
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimestampAuthority for InProcessAuthority {
    async fn timestamp(&self, request: &TimestampRequest) -> TimestampResult<TimestampToken> {
        if self.rejecting {
            return TimestampToken::from_response(rejected_response("request refused"));
        }
        let token = TimestampToken::from_response(granted_response(request.imprint().as_bytes()))?;
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }
}

/// Accepts tokens issued by [`InProcessAuthority`] for the same data
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessVerifier;

#[async_trait]
impl TimestampVerifier for InProcessVerifier {
    async fn verify(&self, token: &TimestampToken, data: &[u8]) -> TimestampResult<()> {
        let imprint = Sha512Digest::compute(data);
        if token.as_bytes().ends_with(imprint.as_bytes()) {
            Ok(())
        } else {
            Err(TimestampError::Verification(
                "message imprint does not match data".to_string(),
            ))
        }
    }
}
