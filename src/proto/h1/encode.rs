use std::fmt::Write as _;

use bytes::{BufMut, BytesMut};
use http::{HeaderMap, Method};

/// End of a chunked request body: the zero-size chunk and the empty trailer
/// section.
pub(crate) const CHUNKED_END: &[u8] = b"0\r\n\r\n";

pub(crate) const CRLF: &[u8] = b"\r\n";

/// Encodes a request head into its wire bytes.
///
/// The caller has already decided the final header set; nothing is added or
/// removed here.
pub(crate) fn request_head(method: &Method, target: &str, headers: &HeaderMap) -> BytesMut {
    let mut dst = BytesMut::with_capacity(init_head_capacity(method, target, headers));

    dst.put_slice(method.as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(target.as_bytes());
    dst.put_slice(b" HTTP/1.1\r\n");

    for (name, value) in headers.iter() {
        dst.put_slice(name.as_str().as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(CRLF);
    }

    dst.put_slice(CRLF);
    dst
}

fn init_head_capacity(method: &Method, target: &str, headers: &HeaderMap) -> usize {
    let mut len = method.as_str().len() + target.len() + 12;
    for (name, value) in headers.iter() {
        len += name.as_str().len() + value.len() + 4;
    }
    len + 2
}

/// Encodes the size line that precedes one chunk of a chunked body.
pub(crate) fn chunk_size(len: usize) -> BytesMut {
    debug_assert!(len > 0, "zero-size chunks terminate the body");
    let mut dst = BytesMut::with_capacity(18);
    // usize in hex is at most 16 digits; the write cannot fail.
    let _ = write!(HexWriter(&mut dst), "{:X}", len);
    dst.put_slice(CRLF);
    dst
}

struct HexWriter<'a>(&'a mut BytesMut);

impl std::fmt::Write for HexWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.put_slice(s.as_bytes());
        Ok(())
    }
}
