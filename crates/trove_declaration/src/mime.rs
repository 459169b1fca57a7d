//! Content-based media type detection.

use std::io::Read;
use std::path::Path;

/// Media type of empty files
pub const EMPTY: &str = "inode/x-empty";
/// Media type of valid UTF-8 without a recognized signature
pub const TEXT: &str = "text/plain";
/// Media type of anything else
pub const BINARY: &str = "application/octet-stream";

const SNIFF_LEN: usize = 8 * 1024;

/// Detects a file's media type from its content
pub trait MimeSniffer: Send + Sync {
    /// Media type of the file at `path`
    ///
    /// # Errors
    ///
    /// Returns the read error if the file cannot be opened
    fn sniff(&self, path: &Path) -> std::io::Result<String>;
}

/// Magic-byte detection with text and empty-file fallbacks
#[derive(Debug, Clone, Copy, Default)]
pub struct InferSniffer;

impl MimeSniffer for InferSniffer {
    fn sniff(&self, path: &Path) -> std::io::Result<String> {
        let mut head = Vec::with_capacity(SNIFF_LEN);
        std::fs::File::open(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;
        Ok(sniff_bytes(&head).to_string())
    }
}

/// Media type of a file whose first bytes are `head`
#[must_use]
pub fn sniff_bytes(head: &[u8]) -> &'static str {
    if head.is_empty() {
        return EMPTY;
    }
    if let Some(kind) = infer::get(head) {
        return kind.mime_type();
    }
    match std::str::from_utf8(head) {
        Ok(_) => TEXT,
        // a multi-byte character cut off by the sniff window is still text
        Err(e) if e.error_len().is_none() && head.len() == SNIFF_LEN => TEXT,
        Err(_) => BINARY,
    }
}
