use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};

use crate::body::DecodedLength;
use crate::client::decompress::Inflater;
use crate::client::pool::{Pool, PoolKey};
use crate::proto::Conn;

/// A streamed response body that owns its connection.
///
/// Returned inside the [`Response`] from [`Client::request_stream`].
/// Ownership of the connection transfers into this body when the response
/// head is delivered; from then on the socket is read only when the body is
/// polled, and each poll yields at most one chunk of at most the configured
/// maximum size. Bytes the peer sent before the first poll are buffered in
/// the connection and flushed, in arrival order, ahead of fresh reads.
///
/// Reading the final frame disposes of the connection: back to the pool
/// when the response allows keep-alive, closed otherwise. Dropping the body
/// before the end closes the connection and releases anything buffered.
///
/// [`Response`]: http::Response
/// [`Client::request_stream`]: crate::Client::request_stream
#[must_use = "streams do nothing unless polled"]
pub struct StreamedBody {
    inner: Option<Inner>,
    remaining: DecodedLength,
}

struct Inner {
    conn: Conn,
    pool: Pool,
    key: PoolKey,
    inflate: Option<Inflater>,
    limit: Option<u64>,
}

impl StreamedBody {
    pub(crate) fn new(
        conn: Conn,
        pool: Pool,
        key: PoolKey,
        inflate: Option<Inflater>,
        limit: Option<u64>,
    ) -> StreamedBody {
        let remaining = if inflate.is_some() {
            // The decoded length is unrelated to the wire length.
            DecodedLength::CHUNKED
        } else {
            conn.body_remaining()
        };
        StreamedBody {
            inner: Some(Inner {
                conn,
                pool,
                key,
                inflate,
                limit,
            }),
            remaining,
        }
    }

    /// Collects the whole body into one buffer, enforcing the request's
    /// maximum content length.
    ///
    /// Chunks are appended as they arrive; if the total would pass the
    /// configured bound the connection is closed and
    /// [`Error::is_max_content_length`] is set on the returned error.
    ///
    /// [`Error::is_max_content_length`]: crate::Error::is_max_content_length
    pub async fn aggregate(mut self) -> crate::Result<Bytes> {
        let limit = self.inner.as_ref().and_then(|inner| inner.limit);
        let mut buf = BytesMut::new();
        loop {
            match std::future::poll_fn(|cx| self.poll_next_chunk(cx)).await {
                Some(Ok(chunk)) => {
                    if let Some(limit) = limit {
                        if buf.len() as u64 + chunk.len() as u64 > limit {
                            // Dropping `self` force-disposes the transport.
                            return Err(crate::Error::new_max_content_length());
                        }
                    }
                    buf.extend_from_slice(&chunk);
                }
                Some(Err(err)) => return Err(err),
                None => return Ok(buf.freeze()),
            }
        }
    }

    fn poll_next_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<crate::Result<Bytes>>> {
        enum Step {
            Deliver(Bytes),
            Fail(crate::Error),
            Terminal(crate::Result<()>),
        }

        loop {
            let step = {
                let inner = match self.inner.as_mut() {
                    Some(inner) => inner,
                    None => return Poll::Ready(None),
                };
                match ready!(inner.conn.poll_chunk(cx)) {
                    Some(Ok(chunk)) => match inner.inflate {
                        Some(ref mut inflate) => match inflate.inflate(&chunk) {
                            Ok(decoded) => Step::Deliver(decoded),
                            Err(err) => Step::Fail(err),
                        },
                        None => Step::Deliver(chunk),
                    },
                    Some(Err(err)) => Step::Fail(err),
                    None => Step::Terminal(match inner.inflate {
                        Some(ref inflate) => inflate.finish(),
                        None => Ok(()),
                    }),
                }
            };

            match step {
                // Chunks with no readable bytes are released, not
                // delivered.
                Step::Deliver(chunk) if chunk.is_empty() => continue,
                Step::Deliver(chunk) => {
                    self.remaining.sub_if(chunk.len() as u64);
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Step::Fail(err) => {
                    self.force_dispose();
                    return Poll::Ready(Some(Err(err)));
                }
                Step::Terminal(Ok(())) => {
                    self.dispose();
                    return Poll::Ready(None);
                }
                Step::Terminal(Err(err)) => {
                    self.force_dispose();
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
    }

    /// Returns the transport to the pool when the finished response left it
    /// reusable; closes it otherwise.
    fn dispose(&mut self) {
        if let Some(inner) = self.inner.take() {
            if inner.conn.is_reusable() {
                trace!("returning transport to pool");
                inner.pool.checkin(inner.key, inner.conn.into_io());
            }
            // else: dropping the connection closes the transport
        }
    }

    fn force_dispose(&mut self) {
        // Dropping without a check-in always closes.
        self.inner = None;
    }
}

impl Body for StreamedBody {
    type Data = Bytes;
    type Error = crate::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match ready!(this.poll_next_chunk(cx)) {
            Some(Ok(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match self.remaining.into_opt() {
            Some(exact) => SizeHint::with_exact(exact),
            None => SizeHint::default(),
        }
    }
}

// Dropping an unfinished body force-disposes: the connection (and any
// bytes buffered inside it) goes away with `inner`.

impl fmt::Debug for StreamedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[derive(Debug)]
        struct Streaming;
        #[derive(Debug)]
        struct Finished;

        let mut builder = f.debug_tuple("StreamedBody");
        if self.inner.is_some() {
            builder.field(&Streaming)
        } else {
            builder.field(&Finished)
        };
        builder.finish()
    }
}
