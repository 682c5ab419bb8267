use http::{HeaderMap, StatusCode, Version};

use crate::ext::ReasonPhrase;

pub(crate) mod h1;

pub(crate) use self::h1::Conn;

/// An incoming response's head.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub(crate) version: Version,
    pub(crate) status: StatusCode,
    /// The raw reason phrase, kept only when it differs from the canonical
    /// phrase for the status code.
    pub(crate) reason: Option<ReasonPhrase>,
    pub(crate) headers: HeaderMap,
}

/// The length of an outgoing request body, determined by its `Content`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyLength {
    /// Content-Length
    Known(u64),
    /// Transfer-Encoding: chunked (an unknown length)
    Unknown,
}
