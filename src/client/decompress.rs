//! Response body decompression.
//!
//! When enabled in the request configuration, a response whose
//! `Content-Encoding` names a coding we understand gets an [`Inflater`]
//! inserted on the chunk path, upstream of the caller. The exposed head
//! then drops `Content-Encoding` and `Content-Length`, since the decoded
//! length differs from the wire length.

use bytes::Bytes;
use flate2::{Crc, Decompress, FlushDecompress, Status};
use http::header::HeaderValue;

/// A content coding the client can decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Coding {
    Gzip,
    /// RFC 9110 `deflate`: a zlib-wrapped deflate stream.
    Deflate,
}

impl Coding {
    /// Recognizes a `Content-Encoding` value; `None` for codings that are
    /// passed through untouched.
    pub(crate) fn recognize(value: &HeaderValue) -> Option<Coding> {
        match value.to_str().ok()?.trim() {
            v if v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip") => {
                Some(Coding::Gzip)
            }
            v if v.eq_ignore_ascii_case("deflate") => Some(Coding::Deflate),
            _ => None,
        }
    }
}

/// Streaming inflater for one response body.
///
/// Wire chunks go in, decoded chunks come out; chunk boundaries on the
/// decoded side carry no meaning. For gzip the member header and trailer
/// are handled here, around a raw deflate stream, and the trailer's CRC
/// and length are verified. A single member is accepted; bytes after it
/// are an error.
pub(crate) struct Inflater {
    state: State,
    raw: Decompress,
    // deflate decodes through the zlib wrapper; gzip decodes a raw deflate
    // stream and checks the member CRC itself
    zlib: bool,
    crc: Crc,
    pending: Vec<u8>,
}

#[derive(Debug, PartialEq)]
enum State {
    GzipHeader,
    Data,
    GzipTrailer,
    Done,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_CM_DEFLATE: u8 = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

impl Inflater {
    pub(crate) fn new(coding: Coding) -> Inflater {
        let zlib = coding == Coding::Deflate;
        Inflater {
            state: if zlib { State::Data } else { State::GzipHeader },
            raw: Decompress::new(zlib),
            zlib,
            crc: Crc::new(),
            pending: Vec::new(),
        }
    }

    /// Feeds one wire chunk through, returning the decoded bytes.
    ///
    /// May legitimately return an empty buffer, e.g. for a chunk that only
    /// advanced the gzip header.
    pub(crate) fn inflate(&mut self, chunk: &[u8]) -> crate::Result<Bytes> {
        let mut input = chunk;
        let mut out = Vec::new();

        loop {
            match self.state {
                State::GzipHeader => {
                    self.pending.extend_from_slice(input);
                    input = &[];
                    match gzip_header_len(&self.pending)? {
                        Some(header_len) => {
                            let carried = self.pending.split_off(header_len);
                            self.pending.clear();
                            self.state = State::Data;
                            self.decode(&carried, &mut out)?;
                        }
                        None => break,
                    }
                }
                State::Data => {
                    if input.is_empty() {
                        break;
                    }
                    let taken = std::mem::take(&mut input);
                    self.decode(taken, &mut out)?;
                }
                State::GzipTrailer => {
                    let need = 8 - self.pending.len();
                    let take = usize::min(need, input.len());
                    self.pending.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    if self.pending.len() == 8 {
                        self.verify_gzip_trailer()?;
                        self.state = State::Done;
                    } else {
                        break;
                    }
                }
                State::Done => {
                    if input.is_empty() {
                        break;
                    }
                    return Err(crate::Error::new_body(
                        "unexpected data after compressed stream end",
                    ));
                }
            }
        }

        Ok(Bytes::from(out))
    }

    /// Verifies that the compressed stream ended cleanly; a body that ends
    /// mid-stream is reported as incomplete.
    pub(crate) fn finish(&self) -> crate::Result<()> {
        if self.state == State::Done {
            Ok(())
        } else {
            Err(crate::Error::new_incomplete())
        }
    }

    fn decode(&mut self, mut input: &[u8], out: &mut Vec<u8>) -> crate::Result<()> {
        while !input.is_empty() {
            if out.capacity() - out.len() < 64 {
                out.reserve(usize::max(input.len().saturating_mul(2), 1024));
            }
            let before_in = self.raw.total_in();
            let before_out = out.len();
            let status = self
                .raw
                .decompress_vec(input, out, FlushDecompress::None)
                .map_err(crate::Error::new_body)?;
            let consumed = (self.raw.total_in() - before_in) as usize;
            input = &input[consumed..];
            if !self.zlib {
                self.crc.update(&out[before_out..]);
            }

            match status {
                Status::StreamEnd => {
                    if self.zlib {
                        self.state = State::Done;
                        if !input.is_empty() {
                            return Err(crate::Error::new_body(
                                "unexpected data after compressed stream end",
                            ));
                        }
                    } else {
                        self.state = State::GzipTrailer;
                        self.pending.clear();
                        if input.len() > 8 {
                            return Err(crate::Error::new_body(
                                "unexpected data after compressed stream end",
                            ));
                        }
                        self.pending.extend_from_slice(input);
                        if self.pending.len() == 8 {
                            self.verify_gzip_trailer()?;
                            self.state = State::Done;
                        }
                    }
                    return Ok(());
                }
                Status::Ok | Status::BufError => {
                    // Loop: either more input remains, or we are done for
                    // this chunk.
                    if consumed == 0 && out.len() == before_out {
                        // No progress; the output buffer must grow.
                        out.reserve(usize::max(out.capacity(), 1024));
                    }
                }
            }
        }
        Ok(())
    }

    fn verify_gzip_trailer(&mut self) -> crate::Result<()> {
        let expect_crc = u32::from_le_bytes([
            self.pending[0],
            self.pending[1],
            self.pending[2],
            self.pending[3],
        ]);
        let expect_len = u32::from_le_bytes([
            self.pending[4],
            self.pending[5],
            self.pending[6],
            self.pending[7],
        ]);
        if self.crc.sum() != expect_crc || self.crc.amount() != expect_len {
            return Err(crate::Error::new_body("gzip crc mismatch"));
        }
        self.pending.clear();
        Ok(())
    }
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("state", &self.state)
            .field("zlib", &self.zlib)
            .finish()
    }
}

/// Returns the length of a complete gzip member header at the start of
/// `buf`, or `None` when more bytes are needed.
fn gzip_header_len(buf: &[u8]) -> crate::Result<Option<usize>> {
    if buf.len() < 10 {
        return Ok(None);
    }
    if buf[0..2] != GZIP_MAGIC || buf[2] != GZIP_CM_DEFLATE {
        return Err(crate::Error::new_body("not a gzip stream"));
    }
    let flags = buf[3];
    let mut at = 10usize;

    if flags & FEXTRA != 0 {
        if buf.len() < at + 2 {
            return Ok(None);
        }
        let extra = u16::from_le_bytes([buf[at], buf[at + 1]]) as usize;
        at += 2 + extra;
        if buf.len() < at {
            return Ok(None);
        }
    }
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            match buf[at..].iter().position(|&b| b == 0) {
                Some(idx) => at += idx + 1,
                None => return Ok(None),
            }
        }
    }
    if flags & FHCRC != 0 {
        at += 2;
        if buf.len() < at {
            return Ok(None);
        }
    }
    Ok(Some(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn gzip_round_trip_whole() {
        let wire = gzip(b"hello gzip world");
        let mut inflater = Inflater::new(Coding::Gzip);

        let out = inflater.inflate(&wire).unwrap();
        assert_eq!(&out[..], b"hello gzip world");
        inflater.finish().unwrap();
    }

    #[test]
    fn gzip_round_trip_byte_at_a_time() {
        let body: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let wire = gzip(&body);
        let mut inflater = Inflater::new(Coding::Gzip);

        let mut out = Vec::new();
        for byte in wire {
            out.extend_from_slice(&inflater.inflate(&[byte]).unwrap());
        }
        assert_eq!(out, body);
        inflater.finish().unwrap();
    }

    #[test]
    fn gzip_detects_truncation() {
        let wire = gzip(b"truncated body");
        let mut inflater = Inflater::new(Coding::Gzip);

        inflater.inflate(&wire[..wire.len() - 4]).unwrap();
        let err = inflater.finish().unwrap_err();
        assert!(err.is_incomplete_message());
    }

    #[test]
    fn gzip_detects_corrupt_crc() {
        let mut wire = gzip(b"crc checked");
        let crc_at = wire.len() - 8;
        wire[crc_at] ^= 0xff;
        let mut inflater = Inflater::new(Coding::Gzip);

        let mut result = inflater.inflate(&wire);
        if result.is_ok() {
            result = inflater.finish().map(|()| Bytes::new());
        }
        assert!(result.is_err());
    }

    #[test]
    fn deflate_is_zlib_wrapped() {
        let wire = zlib(b"deflate body");
        let mut inflater = Inflater::new(Coding::Deflate);

        let out = inflater.inflate(&wire).unwrap();
        assert_eq!(&out[..], b"deflate body");
        inflater.finish().unwrap();
    }

    #[test]
    fn raw_deflate_is_rejected() {
        // Raw deflate without the zlib wrapper is not the RFC 9110
        // `deflate` coding.
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"raw deflate").unwrap();
        let wire = enc.finish().unwrap();

        let mut inflater = Inflater::new(Coding::Deflate);
        assert!(inflater.inflate(&wire).is_err());
    }

    #[test]
    fn recognizes_codings() {
        let value = HeaderValue::from_static("gzip");
        assert_eq!(Coding::recognize(&value), Some(Coding::Gzip));
        let value = HeaderValue::from_static("x-gzip");
        assert_eq!(Coding::recognize(&value), Some(Coding::Gzip));
        let value = HeaderValue::from_static("deflate");
        assert_eq!(Coding::recognize(&value), Some(Coding::Deflate));
        let value = HeaderValue::from_static("br");
        assert_eq!(Coding::recognize(&value), None);
    }
}
