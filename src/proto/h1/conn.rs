use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::time::{sleep, Sleep};

use super::decode::{Decoded, Decoder};
use crate::body::DecodedLength;
use crate::client::connect::BoxTransport;
use crate::error::Parse;
use crate::ext::ReasonPhrase;
use crate::headers;
use crate::proto::ResponseHead;

const INIT_BUFFER_SIZE: usize = 8192;
const MAX_HEAD_SIZE: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;

/// The state of one HTTP/1.1 connection over the life of a request.
///
/// Reads are demand driven: the socket is only touched from [`poll_fill`],
/// which the head and chunk paths call when the bytes already buffered are
/// not enough to make progress. Inbound bytes re-arm the read timer, so the
/// timeout measures transport silence rather than total body time.
///
/// [`poll_fill`]: Conn::poll_fill
pub(crate) struct Conn {
    io: BoxTransport,
    read_buf: BytesMut,
    reading: Reading,
    read_timeout: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
    max_chunk: usize,
    keep_alive: bool,
    eof: bool,
}

#[derive(Debug)]
enum Reading {
    Head,
    Body(Decoder),
    Done,
}

impl Conn {
    pub(crate) fn new(io: BoxTransport, read_timeout: Duration, max_chunk: usize) -> Conn {
        Conn {
            io,
            read_buf: BytesMut::new(),
            reading: Reading::Head,
            read_timeout,
            deadline: None,
            max_chunk,
            keep_alive: true,
            eof: false,
        }
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.io.write_all(data).await
    }

    pub(crate) async fn flush(&mut self) -> std::io::Result<()> {
        self.io.flush().await
    }

    /// Reads once from the transport into the read buffer.
    ///
    /// Returns the number of bytes read; zero means the peer closed. While
    /// the read is pending the read timer runs; any inbound bytes disarm it
    /// so the next wait starts fresh.
    fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<usize>> {
        if self.eof {
            return Poll::Ready(Ok(0));
        }

        self.read_buf.reserve(INIT_BUFFER_SIZE);
        let mut buf = ReadBuf::uninit(self.read_buf.spare_capacity_mut());
        match Pin::new(&mut self.io).poll_read(cx, &mut buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len();
                // The first `n` bytes of the spare capacity were just
                // initialized by the read.
                unsafe {
                    self.read_buf.set_len(self.read_buf.len() + n);
                }
                if n == 0 {
                    trace!("transport eof");
                    self.eof = true;
                } else {
                    self.deadline = None;
                }
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => {
                self.keep_alive = false;
                Poll::Ready(Err(crate::Error::new_io(e)))
            }
            Poll::Pending => {
                let timeout = self.read_timeout;
                let deadline = self
                    .deadline
                    .get_or_insert_with(|| Box::pin(sleep(timeout)));
                match deadline.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        debug!("read timed out after {:?}", timeout);
                        self.deadline = None;
                        self.keep_alive = false;
                        Poll::Ready(Err(crate::Error::new_read_timeout()))
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }

    /// Disarms any partially elapsed read timer.
    ///
    /// Used after an `Expect: 100-continue` window lapses, so the next read
    /// waits a full timeout.
    pub(crate) fn reset_read_timer(&mut self) {
        self.deadline = None;
    }

    /// Reads the next response head.
    ///
    /// With `skip_informational`, 1xx responses are consumed and the next
    /// head is awaited; without it the caller sees them (used while waiting
    /// on a `100 Continue`).
    pub(crate) async fn read_head(
        &mut self,
        req_method: &Method,
        skip_informational: bool,
    ) -> crate::Result<ResponseHead> {
        loop {
            if let Some(head) = self.parse_head()? {
                if head.status.is_informational() {
                    if skip_informational {
                        trace!("ignoring informational response: {}", head.status);
                        continue;
                    }
                } else {
                    self.prepare_body(req_method, &head)?;
                }
                return Ok(head);
            }

            if self.eof {
                self.keep_alive = false;
                return Err(crate::Error::new_incomplete());
            }
            std::future::poll_fn(|cx| self.poll_fill(cx)).await?;
        }
    }

    fn parse_head(&mut self) -> crate::Result<Option<ResponseHead>> {
        if self.read_buf.is_empty() {
            return Ok(None);
        }

        let (len, head) = {
            let mut parsed = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut res = httparse::Response::new(&mut parsed);
            match res.parse(&self.read_buf[..]).map_err(Parse::from)? {
                httparse::Status::Complete(len) => {
                    let code = res.code.ok_or(Parse::Status)?;
                    let status = StatusCode::from_u16(code).map_err(Parse::from)?;
                    let version = match res.version {
                        Some(0) => Version::HTTP_10,
                        Some(1) => Version::HTTP_11,
                        _ => return Err(Parse::Version.into()),
                    };
                    let reason = match res.reason {
                        Some(reason)
                            if !reason.is_empty()
                                && status.canonical_reason() != Some(reason) =>
                        {
                            Some(ReasonPhrase::from_bytes_unchecked(
                                Bytes::copy_from_slice(reason.as_bytes()),
                            ))
                        }
                        _ => None,
                    };
                    let mut headers = HeaderMap::with_capacity(res.headers.len());
                    for header in res.headers.iter() {
                        let name = HeaderName::from_bytes(header.name.as_bytes())
                            .map_err(|_| Parse::Header)?;
                        let value = HeaderValue::from_bytes(header.value)
                            .map_err(|_| Parse::Header)?;
                        headers.append(name, value);
                    }
                    (
                        len,
                        ResponseHead {
                            version,
                            status,
                            reason,
                            headers,
                        },
                    )
                }
                httparse::Status::Partial => {
                    if self.read_buf.len() > MAX_HEAD_SIZE {
                        return Err(Parse::TooLarge.into());
                    }
                    return Ok(None);
                }
            }
        };
        self.read_buf.advance(len);

        self.keep_alive = head.version == Version::HTTP_11;
        for value in head.headers.get_all(CONNECTION) {
            if headers::connection_close(value) {
                self.keep_alive = false;
                break;
            }
            if head.version == Version::HTTP_10 && headers::connection_keep_alive(value) {
                self.keep_alive = true;
            }
        }

        trace!(
            "parsed response head: {:?} {} ({} headers)",
            head.version,
            head.status,
            head.headers.len()
        );
        Ok(Some(head))
    }

    /// Installs the body decoder chosen by the response's framing.
    fn prepare_body(&mut self, req_method: &Method, head: &ResponseHead) -> crate::Result<()> {
        let decoder = if req_method == Method::HEAD {
            Decoder::length(0)
        } else if head.status == StatusCode::NO_CONTENT
            || head.status == StatusCode::NOT_MODIFIED
        {
            Decoder::length(0)
        } else if req_method == Method::CONNECT && head.status.is_success() {
            Decoder::length(0)
        } else if head.headers.contains_key(TRANSFER_ENCODING) {
            if transfer_encoding_is_chunked(&head.headers)? {
                Decoder::chunked()
            } else {
                // A transfer-coding we do not know; all that is left is to
                // read until the peer closes.
                self.keep_alive = false;
                Decoder::eof()
            }
        } else if head.headers.contains_key(CONTENT_LENGTH) {
            match headers::content_length_parse_all(&head.headers) {
                Some(len) => {
                    DecodedLength::checked_new(len)?;
                    Decoder::length(len)
                }
                None => return Err(Parse::ContentLength.into()),
            }
        } else {
            self.keep_alive = false;
            Decoder::eof()
        };

        trace!("response body: {:?}", decoder.remaining());
        self.reading = Reading::Body(decoder);
        Ok(())
    }

    /// Decodes the next body chunk, reading from the transport only when
    /// the buffered bytes cannot make progress.
    pub(crate) fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<crate::Result<Bytes>>> {
        loop {
            let step = match self.reading {
                Reading::Body(ref mut decoder) => decoder.decode(&mut self.read_buf, self.max_chunk),
                Reading::Done => return Poll::Ready(None),
                Reading::Head => unreachable!("poll_chunk before response head"),
            };

            match step {
                Ok(Decoded::Data(chunk)) => return Poll::Ready(Some(Ok(chunk))),
                Ok(Decoded::Complete) => {
                    self.reading = Reading::Done;
                    return Poll::Ready(None);
                }
                Ok(Decoded::NeedMore) => {
                    if self.eof {
                        let end = match self.reading {
                            Reading::Body(ref mut decoder) => decoder.decode_eof(),
                            _ => unreachable!("checked above"),
                        };
                        return match end {
                            Ok(_) => {
                                self.reading = Reading::Done;
                                Poll::Ready(None)
                            }
                            Err(e) => {
                                self.keep_alive = false;
                                Poll::Ready(Some(Err(e)))
                            }
                        };
                    }
                    match ready!(self.poll_fill(cx)) {
                        Ok(_) => continue,
                        Err(e) => return Poll::Ready(Some(Err(e))),
                    }
                }
                Err(e) => {
                    self.keep_alive = false;
                    return Poll::Ready(Some(Err(e)));
                }
            }
        }
    }

    /// Reads and releases the rest of the body, for responses that are not
    /// surfaced (redirects).
    pub(crate) async fn drain_body(&mut self) -> crate::Result<()> {
        loop {
            match std::future::poll_fn(|cx| self.poll_chunk(cx)).await {
                Some(Ok(chunk)) => {
                    trace!("drained {} body bytes", chunk.len());
                    drop(chunk);
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            }
        }
    }

    /// The remaining body length, for size hints.
    pub(crate) fn body_remaining(&self) -> DecodedLength {
        match self.reading {
            Reading::Body(ref decoder) => decoder.remaining(),
            Reading::Done => DecodedLength::ZERO,
            Reading::Head => DecodedLength::CLOSE_DELIMITED,
        }
    }

    /// Whether the transport can go back to the pool: the response must
    /// have ended with known framing on a keep-alive connection, with no
    /// stray bytes buffered.
    pub(crate) fn is_reusable(&self) -> bool {
        self.keep_alive
            && matches!(self.reading, Reading::Done)
            && self.read_buf.is_empty()
            && !self.eof
    }

    pub(crate) fn mark_not_reusable(&mut self) {
        self.keep_alive = false;
    }

    pub(crate) fn into_io(self) -> BoxTransport {
        self.io
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("reading", &self.reading)
            .field("buffered", &self.read_buf.len())
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// Checks that `chunked` is the final transfer-coding applied.
fn transfer_encoding_is_chunked(headers: &HeaderMap) -> crate::Result<bool> {
    let mut last = None;
    for value in headers.get_all(TRANSFER_ENCODING) {
        let line = value.to_str().map_err(|_| Parse::Header)?;
        for coding in line.split(',') {
            let coding = coding.trim();
            if !coding.is_empty() {
                last = Some(coding.eq_ignore_ascii_case("chunked"));
            }
        }
    }
    Ok(last.unwrap_or(false))
}
