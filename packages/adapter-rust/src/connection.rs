//! Connection URI credential escaping.
//!
//! User and password segments are percent-encoded exactly once: existing
//! `%XX` escapes are decoded first, so escaping an escaped URI is a no-op.
//! Multi-host URIs are returned untouched.

/// Bytes left as-is in credentials (RFC 3986 unreserved set).
fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Decodes valid `%XX` escapes; a `%` not followed by two hex digits is kept.
fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).copied().and_then(hex_value),
                bytes.get(i + 2).copied().and_then(hex_value),
            ) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn percent_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        if is_unreserved(byte) {
            out.push(char::from(byte));
        } else {
            out.push('%');
            out.push(char::from(HEX[usize::from(byte >> 4)]));
            out.push(char::from(HEX[usize::from(byte & 0x0F)]));
        }
    }
    out
}

/// Escapes one credential segment, idempotently.
#[must_use]
pub fn escape_credential(segment: &str) -> String {
    percent_encode(&percent_decode(segment))
}

/// Host list of everything after the credentials separator.
fn host_list(tail: &str) -> &str {
    tail.split(['/', '?']).next().unwrap_or(tail)
}

/// Whether the URI names more than one host (a replica set or a seed list).
/// Credentials may contain any character, so hosts start after the last `@`.
#[must_use]
pub fn is_multi_host(uri: &str) -> bool {
    let Some((_, rest)) = uri.split_once("://") else {
        return false;
    };
    let tail = rest.rsplit_once('@').map_or(rest, |(_, tail)| tail);
    host_list(tail).contains(',')
}

/// Percent-encodes the user and password of `uri`.
///
/// URIs without a scheme, without credentials, or naming several hosts pass
/// through byte-for-byte. `escape_uri(escape_uri(u)) == escape_uri(u)`.
#[must_use]
pub fn escape_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let Some((userinfo, tail)) = rest.rsplit_once('@') else {
        return uri.to_string();
    };
    if host_list(tail).contains(',') {
        return uri.to_string();
    }
    let credentials = match userinfo.split_once(':') {
        Some((user, password)) => format!("{}:{}", escape_credential(user), escape_credential(password)),
        None => escape_credential(userinfo),
    };
    format!("{scheme}://{credentials}@{tail}")
}
