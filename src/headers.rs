use base64::prelude::*;
use http::header::{HeaderValue, CONTENT_LENGTH};
use http::HeaderMap;

pub(super) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

pub(super) fn connection_close(value: &HeaderValue) -> bool {
    connection_has(value, "close")
}

fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    if let Ok(s) = value.to_str() {
        for val in s.split(',') {
            if val.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

/// Parses every `Content-Length` value in the map, requiring agreement.
///
/// Returns `None` when any value is malformed or two values disagree.
pub(super) fn content_length_parse_all(headers: &HeaderMap) -> Option<u64> {
    let mut content_length: Option<u64> = None;
    for h in headers.get_all(CONTENT_LENGTH) {
        if let Ok(line) = h.to_str() {
            for v in line.split(',') {
                if let Some(n) = from_digits(v.trim().as_bytes()) {
                    if content_length.is_none() {
                        content_length = Some(n)
                    } else if content_length != Some(n) {
                        return None;
                    }
                } else {
                    return None;
                }
            }
        } else {
            return None;
        }
    }

    content_length
}

fn from_digits(bytes: &[u8]) -> Option<u64> {
    // cannot use FromStr for u64, since it allows a signed prefix
    let mut result = 0u64;
    const RADIX: u64 = 10;

    if bytes.is_empty() {
        return None;
    }

    for &b in bytes {
        match b {
            b'0'..=b'9' => {
                result = result.checked_mul(RADIX)?;
                result = result.checked_add((b - b'0') as u64)?;
            }
            _ => {
                // not a DIGIT, get outta here!
                return None;
            }
        }
    }

    Some(result)
}

/// Encodes a `Basic` authorization value from credentials.
///
/// The credentials are joined with a colon and taken as their ISO-8859-1
/// bytes; code points outside that repertoire are substituted the way a
/// lossy latin-1 encoder would substitute them.
pub(super) fn basic_auth_value(user: &str, pass: &str) -> HeaderValue {
    let mut raw = Vec::with_capacity(user.len() + pass.len() + 1);
    latin1_bytes(user, &mut raw);
    raw.push(b':');
    latin1_bytes(pass, &mut raw);

    let mut value = String::from("Basic ");
    BASE64_STANDARD.encode_string(&raw, &mut value);

    // base64 output is always a valid header value
    HeaderValue::from_str(&value).expect("base64 value is valid")
}

fn latin1_bytes(s: &str, dst: &mut Vec<u8>) {
    for c in s.chars() {
        let code = c as u32;
        dst.push(if code <= 0xFF { code as u8 } else { b'?' });
    }
}
