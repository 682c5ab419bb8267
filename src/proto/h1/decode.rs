use bytes::{Buf, Bytes, BytesMut};

use crate::body::DecodedLength;
use crate::error::Parse;

/// Decoders to handle different Transfer-Encodings.
///
/// If a message body does not include a Transfer-Encoding, it *should*
/// include a Content-Length header.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Decoder {
    kind: Kind,
}

#[derive(Clone, Debug, PartialEq)]
enum Kind {
    /// A reader of a body with exactly this many remaining bytes.
    Length(u64),
    /// A reader of chunked transfer framing.
    Chunked {
        state: ChunkedState,
        remaining: u64,
    },
    /// A reader of data until the connection closes.
    Eof,
    /// The body has been fully decoded.
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ChunkedState {
    Size,
    SizeRest,
    SizeExt,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    EndOrTrailer,
    Trailer,
    TrailerLf,
    EndLf,
    End,
}

/// One step of decoding.
#[derive(Debug, PartialEq)]
pub(crate) enum Decoded {
    /// A chunk of body data, at most the requested size.
    Data(Bytes),
    /// The body is complete; any bytes left in the buffer belong to the
    /// next message.
    Complete,
    /// More transport bytes are required to make progress.
    NeedMore,
}

impl Decoder {
    pub(crate) fn length(x: u64) -> Decoder {
        Decoder {
            kind: Kind::Length(x),
        }
    }

    pub(crate) fn chunked() -> Decoder {
        Decoder {
            kind: Kind::Chunked {
                state: ChunkedState::Size,
                remaining: 0,
            },
        }
    }

    pub(crate) fn eof() -> Decoder {
        Decoder { kind: Kind::Eof }
    }

    pub(crate) fn remaining(&self) -> DecodedLength {
        match self.kind {
            Kind::Length(n) => DecodedLength::new(n),
            Kind::Chunked { .. } => DecodedLength::CHUNKED,
            Kind::Eof => DecodedLength::CLOSE_DELIMITED,
            Kind::Done => DecodedLength::ZERO,
        }
    }

    /// Decodes at most one chunk of at most `max_chunk` bytes out of `buf`.
    pub(crate) fn decode(
        &mut self,
        buf: &mut BytesMut,
        max_chunk: usize,
    ) -> crate::Result<Decoded> {
        debug_assert!(max_chunk > 0);
        match self.kind {
            Kind::Length(ref mut remaining) => {
                if *remaining == 0 {
                    self.kind = Kind::Done;
                    return Ok(Decoded::Complete);
                }
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let take = cmp_min(*remaining, buf.len(), max_chunk);
                let chunk = buf.split_to(take).freeze();
                *remaining -= take as u64;
                if *remaining == 0 {
                    self.kind = Kind::Done;
                }
                Ok(Decoded::Data(chunk))
            }
            Kind::Chunked {
                ref mut state,
                ref mut remaining,
            } => {
                loop {
                    if *state == ChunkedState::Body {
                        if buf.is_empty() {
                            return Ok(Decoded::NeedMore);
                        }
                        let take = cmp_min(*remaining, buf.len(), max_chunk);
                        let chunk = buf.split_to(take).freeze();
                        *remaining -= take as u64;
                        if *remaining == 0 {
                            *state = ChunkedState::BodyCr;
                        }
                        return Ok(Decoded::Data(chunk));
                    }

                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let byte = buf[0];
                    buf.advance(1);

                    *state = match *state {
                        ChunkedState::Size => match hex_digit(byte) {
                            Some(d) => {
                                *remaining = d as u64;
                                ChunkedState::SizeRest
                            }
                            None => return Err(Parse::Chunk.into()),
                        },
                        ChunkedState::SizeRest => match byte {
                            b';' => ChunkedState::SizeExt,
                            b'\r' => ChunkedState::SizeLf,
                            b => match hex_digit(b) {
                                Some(d) => {
                                    // Chunk sizes must stay below the sentinel range.
                                    if *remaining > (u64::MAX - 16) / 16 {
                                        return Err(Parse::Chunk.into());
                                    }
                                    *remaining = *remaining * 16 + d as u64;
                                    ChunkedState::SizeRest
                                }
                                None => return Err(Parse::Chunk.into()),
                            },
                        },
                        ChunkedState::SizeExt => match byte {
                            b'\r' => ChunkedState::SizeLf,
                            _ => ChunkedState::SizeExt,
                        },
                        ChunkedState::SizeLf => match byte {
                            b'\n' if *remaining > 0 => ChunkedState::Body,
                            b'\n' => ChunkedState::EndOrTrailer,
                            _ => return Err(Parse::Chunk.into()),
                        },
                        ChunkedState::BodyCr => match byte {
                            b'\r' => ChunkedState::BodyLf,
                            _ => return Err(Parse::Chunk.into()),
                        },
                        ChunkedState::BodyLf => match byte {
                            b'\n' => ChunkedState::Size,
                            _ => return Err(Parse::Chunk.into()),
                        },
                        // Trailer fields after the last chunk are consumed
                        // and ignored.
                        ChunkedState::EndOrTrailer => match byte {
                            b'\r' => ChunkedState::EndLf,
                            _ => ChunkedState::Trailer,
                        },
                        ChunkedState::Trailer => match byte {
                            b'\r' => ChunkedState::TrailerLf,
                            _ => ChunkedState::Trailer,
                        },
                        ChunkedState::TrailerLf => match byte {
                            b'\n' => ChunkedState::EndOrTrailer,
                            _ => return Err(Parse::Chunk.into()),
                        },
                        ChunkedState::EndLf => match byte {
                            b'\n' => ChunkedState::End,
                            _ => return Err(Parse::Chunk.into()),
                        },
                        ChunkedState::Body | ChunkedState::End => {
                            unreachable!("handled outside the byte loop")
                        }
                    };

                    if *state == ChunkedState::End {
                        break;
                    }
                }

                self.kind = Kind::Done;
                Ok(Decoded::Complete)
            }
            Kind::Eof => {
                if buf.is_empty() {
                    Ok(Decoded::NeedMore)
                } else {
                    let take = usize::min(buf.len(), max_chunk);
                    Ok(Decoded::Data(buf.split_to(take).freeze()))
                }
            }
            Kind::Done => Ok(Decoded::Complete),
        }
    }

    /// Signals that the transport reached EOF while the body was incomplete.
    ///
    /// Only a close-delimited body may legally end this way.
    pub(crate) fn decode_eof(&mut self) -> crate::Result<Decoded> {
        match self.kind {
            Kind::Eof | Kind::Done => {
                self.kind = Kind::Done;
                Ok(Decoded::Complete)
            }
            Kind::Length(_) | Kind::Chunked { .. } => Err(crate::Error::new_incomplete()),
        }
    }
}

fn cmp_min(remaining: u64, buffered: usize, max_chunk: usize) -> usize {
    let n = u64::min(remaining, buffered as u64);
    usize::min(n as usize, max_chunk)
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(bytes: &[u8]) -> BytesMut {
        BytesMut::from(bytes)
    }

    #[test]
    fn length_decoder_caps_chunks() {
        let mut decoder = Decoder::length(10);
        let mut body = buf(b"0123456789");

        assert_eq!(
            decoder.decode(&mut body, 4).unwrap(),
            Decoded::Data(Bytes::from_static(b"0123"))
        );
        assert_eq!(
            decoder.decode(&mut body, 4).unwrap(),
            Decoded::Data(Bytes::from_static(b"4567"))
        );
        assert_eq!(
            decoder.decode(&mut body, 4).unwrap(),
            Decoded::Data(Bytes::from_static(b"89"))
        );
        assert_eq!(decoder.decode(&mut body, 4).unwrap(), Decoded::Complete);
    }

    #[test]
    fn length_decoder_ignores_pipelined_bytes() {
        let mut decoder = Decoder::length(3);
        let mut body = buf(b"abcHTTP/1.1");

        assert_eq!(
            decoder.decode(&mut body, 8192).unwrap(),
            Decoded::Data(Bytes::from_static(b"abc"))
        );
        assert_eq!(decoder.decode(&mut body, 8192).unwrap(), Decoded::Complete);
        assert_eq!(&body[..], b"HTTP/1.1");
    }

    #[test]
    fn chunked_decoder_whole_body() {
        let mut decoder = Decoder::chunked();
        let mut body = buf(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");

        assert_eq!(
            decoder.decode(&mut body, 8192).unwrap(),
            Decoded::Data(Bytes::from_static(b"hello"))
        );
        assert_eq!(
            decoder.decode(&mut body, 8192).unwrap(),
            Decoded::Data(Bytes::from_static(b" world"))
        );
        assert_eq!(decoder.decode(&mut body, 8192).unwrap(), Decoded::Complete);
        assert!(body.is_empty());
    }

    #[test]
    fn chunked_decoder_incremental() {
        let mut decoder = Decoder::chunked();
        let mut body = buf(b"");

        assert_eq!(decoder.decode(&mut body, 8192).unwrap(), Decoded::NeedMore);

        body.extend_from_slice(b"5\r\nhe");
        assert_eq!(
            decoder.decode(&mut body, 8192).unwrap(),
            Decoded::Data(Bytes::from_static(b"he"))
        );
        assert_eq!(decoder.decode(&mut body, 8192).unwrap(), Decoded::NeedMore);

        body.extend_from_slice(b"llo\r\n0\r\n");
        assert_eq!(
            decoder.decode(&mut body, 8192).unwrap(),
            Decoded::Data(Bytes::from_static(b"llo"))
        );
        assert_eq!(decoder.decode(&mut body, 8192).unwrap(), Decoded::NeedMore);

        body.extend_from_slice(b"\r\n");
        assert_eq!(decoder.decode(&mut body, 8192).unwrap(), Decoded::Complete);
    }

    #[test]
    fn chunked_decoder_extensions_and_trailers() {
        let mut decoder = Decoder::chunked();
        let mut body = buf(b"3;name=value\r\nabc\r\n0\r\nExpires: never\r\nX: y\r\n\r\n");

        assert_eq!(
            decoder.decode(&mut body, 8192).unwrap(),
            Decoded::Data(Bytes::from_static(b"abc"))
        );
        assert_eq!(decoder.decode(&mut body, 8192).unwrap(), Decoded::Complete);
        assert!(body.is_empty());
    }

    #[test]
    fn chunked_decoder_rejects_bad_size() {
        let mut decoder = Decoder::chunked();
        let mut body = buf(b"zz\r\nabc\r\n");
        assert!(decoder.decode(&mut body, 8192).is_err());
    }

    #[test]
    fn chunked_decoder_rejects_huge_size() {
        let mut decoder = Decoder::chunked();
        let mut body = buf(b"fffffffffffffffff\r\n");
        assert!(decoder.decode(&mut body, 8192).is_err());
    }

    #[test]
    fn eof_decoder_completes_on_close() {
        let mut decoder = Decoder::eof();
        let mut body = buf(b"partial");

        assert_eq!(
            decoder.decode(&mut body, 8192).unwrap(),
            Decoded::Data(Bytes::from_static(b"partial"))
        );
        assert_eq!(decoder.decode(&mut body, 8192).unwrap(), Decoded::NeedMore);
        assert_eq!(decoder.decode_eof().unwrap(), Decoded::Complete);
    }

    #[test]
    fn length_decoder_errors_on_early_close() {
        let mut decoder = Decoder::length(10);
        let mut body = buf(b"12345");

        assert_eq!(
            decoder.decode(&mut body, 8192).unwrap(),
            Decoded::Data(Bytes::from_static(b"12345"))
        );
        let err = decoder.decode_eof().unwrap_err();
        assert!(err.is_incomplete_message());
    }
}
