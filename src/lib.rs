#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # brook
//!
//! brook is a streaming HTTP/1.1 client core: it issues an outbound request
//! from an immutable request configuration, follows redirects up to a bound,
//! and hands the response body back either as one buffered [`Bytes`] value or
//! as a flow-controlled stream of byte chunks.
//!
//! ## Design
//!
//! - **Ownership over callbacks.** Response bytes are reference-counted
//!   [`Bytes`] handles; every handoff moves the handle, so a chunk is
//!   released exactly once no matter where a request is abandoned.
//! - **Demand-driven reads.** The connection is owned by the streamed body
//!   once the response head has been delivered. The socket is read only when
//!   the body is polled, so memory use is bounded by the configured chunk
//!   size plus whatever the peer managed to send before the first poll.
//! - **Explicit collaborators.** The connection pool and the connector are
//!   owned by the [`Client`] that created them; nothing hides behind process
//!   globals.
//!
//! ## Example
//!
//! ```no_run
//! use brook::Client;
//!
//! # async fn run() -> brook::Result<()> {
//! let client = Client::new();
//! let response = client
//!     .request("http://example.com/".parse().unwrap(), |spec| {
//!         spec.header(brook::header::ACCEPT, "text/html".parse().unwrap());
//!         Ok(())
//!     })
//!     .await?;
//!
//! assert!(response.status().is_success());
//! println!("{} body bytes", response.body().len());
//! # Ok(())
//! # }
//! ```
//!
//! For bodies too large to buffer, [`Client::request_stream`] returns a
//! [`Response`]`<`[`body::StreamedBody`]`>` whose chunks arrive as they are
//! read from the wire.
//!
//! [`Bytes`]: bytes::Bytes

#[doc(hidden)]
pub use http;

#[doc(no_inline)]
pub use http::{header, HeaderMap, Method, Request, Response, StatusCode, Uri, Version};

pub use crate::error::{Error, Result};

#[macro_use]
mod trace;

pub mod body;
pub mod client;
mod error;
pub mod ext;
mod headers;
mod proto;

pub use crate::client::{Client, ClientBuilder, RequestSpec};

fn _assert_send_sync() {
    fn _assert_send<T: Send>() {}
    fn _assert_sync<T: Sync>() {}

    _assert_send::<Error>();
    _assert_sync::<Error>();
    _assert_send::<body::StreamedBody>();
    _assert_send::<Client>();
    _assert_sync::<Client>();
}
