use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;

/// A pinned, boxed stream of request body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = crate::Result<Bytes>> + Send>>;

/// A restartable source of request body chunks.
///
/// The source is a factory rather than a stream because a redirected request
/// may need to send its body again: every attempt invokes the factory for a
/// fresh stream, reading it from the beginning.
pub type BodySource = Arc<dyn Fn() -> BodyStream + Send + Sync>;

/// The body content of an outgoing request.
///
/// Content is either nothing, a single buffer, or a stream of chunks whose
/// total length may or may not be known up front. Only buffers and
/// known-length streams produce a `Content-Length` header; an unknown-length
/// stream is sent with chunked transfer encoding.
#[derive(Clone)]
pub struct Content {
    kind: Kind,
}

#[derive(Clone)]
enum Kind {
    Empty,
    Buffer(Bytes),
    Stream {
        source: BodySource,
        length: Option<u64>,
    },
}

impl Content {
    /// No request body.
    pub fn empty() -> Content {
        Content { kind: Kind::Empty }
    }

    /// A request body held in a single buffer.
    pub fn buffer(bytes: impl Into<Bytes>) -> Content {
        Content {
            kind: Kind::Buffer(bytes.into()),
        }
    }

    /// A streamed request body of exactly `length` bytes.
    ///
    /// The stream is capped at `length`: surplus bytes are discarded, and a
    /// source that finishes short fails the request. A length of zero is
    /// rejected when the request configuration is built; use
    /// [`Content::empty`] instead.
    pub fn stream(source: BodySource, length: u64) -> Content {
        Content {
            kind: Kind::Stream {
                source,
                length: Some(length),
            },
        }
    }

    /// A streamed request body of unknown length, sent chunked.
    pub fn stream_unknown(source: BodySource) -> Content {
        Content {
            kind: Kind::Stream {
                source,
                length: None,
            },
        }
    }

    /// The number of body bytes, or `None` when not known up front.
    pub fn len(&self) -> Option<u64> {
        match self.kind {
            Kind::Empty => Some(0),
            Kind::Buffer(ref b) => Some(b.len() as u64),
            Kind::Stream { length, .. } => length,
        }
    }

    /// Whether this content carries no bytes at all.
    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::Empty)
    }

    /// Whether this content is a single buffer.
    pub fn is_buffer(&self) -> bool {
        matches!(self.kind, Kind::Buffer(_))
    }

    /// Whether this content is a streamed source.
    pub fn is_stream(&self) -> bool {
        matches!(self.kind, Kind::Stream { .. })
    }

    /// Consumes the content, returning the buffer when it holds one.
    pub fn into_buffer(self) -> Option<Bytes> {
        match self.kind {
            Kind::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The stream source, when the content is streamed.
    pub fn source(&self) -> Option<&BodySource> {
        match self.kind {
            Kind::Stream { ref source, .. } => Some(source),
            _ => None,
        }
    }

    /// Releases any held buffer.
    ///
    /// Safe to call any number of times; the buffer is released exactly
    /// once, after which the content behaves as empty.
    pub fn discard(&mut self) {
        self.kind = Kind::Empty;
    }

    pub(crate) fn take(&mut self) -> TakenContent {
        match std::mem::replace(&mut self.kind, Kind::Empty) {
            Kind::Empty => TakenContent::Empty,
            Kind::Buffer(b) => TakenContent::Buffer(b),
            Kind::Stream { source, length } => TakenContent::Stream {
                stream: source(),
                length,
            },
        }
    }
}

pub(crate) enum TakenContent {
    Empty,
    Buffer(Bytes),
    Stream {
        stream: BodyStream,
        length: Option<u64>,
    },
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_tuple("Content");
        match self.kind {
            Kind::Empty => builder.field(&"Empty"),
            Kind::Buffer(ref b) => builder.field(&format_args!("Buffer({})", b.len())),
            Kind::Stream {
                length: Some(n), ..
            } => builder.field(&format_args!("Stream({})", n)),
            Kind::Stream { length: None, .. } => builder.field(&"Stream"),
        };
        builder.finish()
    }
}
