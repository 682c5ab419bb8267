//! Request and response bodies.
//!
//! Outgoing bodies are described by [`Content`]: nothing, one buffer, or a
//! restartable stream of chunks. Incoming bodies arrive as a
//! [`StreamedBody`], a flow-controlled stream that owns its connection and
//! reads from the socket only when polled. Both sides move
//! reference-counted [`Bytes`] handles; ownership transfers with every
//! handoff, so each chunk is released exactly once.

pub use bytes::{Buf, Bytes};
pub use http_body::{Body, Frame, SizeHint};

pub use self::content::{BodySource, BodyStream, Content};
pub use self::streamed::StreamedBody;

pub(crate) use self::content::TakenContent;
pub(crate) use self::length::DecodedLength;

mod content;
mod length;
mod streamed;
