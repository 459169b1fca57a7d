//! Just enough DER to build timestamp requests and read response status.

/// `SEQUENCE`
pub const SEQUENCE: u8 = 0x30;
/// `INTEGER`
pub const INTEGER: u8 = 0x02;
/// `OCTET STRING`
pub const OCTET_STRING: u8 = 0x04;
/// `BOOLEAN`
pub const BOOLEAN: u8 = 0x01;
/// `UTF8String`
pub const UTF8_STRING: u8 = 0x0c;

/// Malformed DER input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed DER: {0}")]
pub struct DerError(pub &'static str);

/// Encode one tag-length-value
#[must_use]
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// Encode a non-negative `INTEGER`
#[must_use]
pub fn unsigned(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    let mut content = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    tlv(INTEGER, &content)
}

/// Split the first element off `input`: `(tag, content, rest)`
///
/// # Errors
///
/// Returns `DerError` for truncated input, high tag numbers, or indefinite
/// lengths
pub fn read(input: &[u8]) -> Result<(u8, &[u8], &[u8]), DerError> {
    let (&tag, rest) = input.split_first().ok_or(DerError("unexpected end"))?;
    if tag & 0x1f == 0x1f {
        return Err(DerError("high tag number"));
    }
    let (&first, rest) = rest.split_first().ok_or(DerError("missing length"))?;
    let (len, rest) = if first < 0x80 {
        (usize::from(first), rest)
    } else {
        let n = usize::from(first & 0x7f);
        if n == 0 {
            return Err(DerError("indefinite length"));
        }
        if n > 4 || rest.len() < n {
            return Err(DerError("bad length"));
        }
        let len = rest[..n]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        (len, &rest[n..])
    };
    if rest.len() < len {
        return Err(DerError("content truncated"));
    }
    Ok((tag, &rest[..len], &rest[len..]))
}

/// Read an element that must carry `tag`
///
/// # Errors
///
/// Returns `DerError` if the element is malformed or has another tag
pub fn expect(input: &[u8], tag: u8) -> Result<(&[u8], &[u8]), DerError> {
    match read(input)? {
        (t, content, rest) if t == tag => Ok((content, rest)),
        _ => Err(DerError("unexpected tag")),
    }
}

/// Decode the content of a small non-negative `INTEGER`
///
/// # Errors
///
/// Returns `DerError` if the value does not fit in a `u64` or is negative
pub fn to_unsigned(content: &[u8]) -> Result<u64, DerError> {
    let content = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        [first, ..] if first & 0x80 != 0 => return Err(DerError("negative integer")),
        [] => return Err(DerError("empty integer")),
        other => other,
    };
    if content.len() > 8 {
        return Err(DerError("integer too large"));
    }
    Ok(content.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}
