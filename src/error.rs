use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can have brook `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur handling an HTTP request.
///
/// # Formatting
///
/// The `Display` implementation of this type will only print the details of
/// this level of error, even though it may have been caused by another error
/// and contain that error in its source. To print all the relevant
/// information, including the source chain, using something like
/// `std::error::Report`, or equivalent 3rd party types.
///
/// # Source
///
/// An `Error` may be caused by another error. To aid debugging, those are
/// exposed in `Error::source()` as erased types. While it is possible to
/// check the exact type of the sources, they **can not be depended on**. They
/// may come from private internal dependencies, and are subject to change at
/// any moment.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(super) enum Kind {
    /// A violation of the HTTP/1.1 framing rules while parsing.
    Parse(Parse),
    /// The connection closed before the message could be completed.
    IncompleteMessage,
    /// Connecting (incl. any TLS negotiation) took longer than allowed.
    ConnectTimeout,
    /// No inbound byte arrived within the read timeout.
    ReadTimeout,
    /// TLS negotiation failed, or no TLS support was configured.
    Tls,
    /// A redirect response carried a missing or unusable `Location`.
    BadRedirect,
    /// A buffered response grew past the configured maximum length.
    MaxContentLength,
    /// A request body stream finished short of its declared length.
    IncompleteBody,
    /// A pending item was dropped before it could be processed.
    Canceled,
    /// An `io::Error` while reading or writing the transport.
    Io,
    /// An error while reading or decoding the message body.
    Body,
    /// An error while writing the message body to the connection.
    BodyWrite,
    /// Errors caused by the caller.
    User(User),
}

#[derive(Debug)]
pub(crate) enum Parse {
    Status,
    Version,
    Header,
    ContentLength,
    Chunk,
    TooLarge,
}

#[derive(Debug)]
pub(super) enum User {
    /// The caller's request body stream yielded an error.
    Body,
    /// The request configuration failed validation.
    Config,
}

// Sentinel type to indicate the error was caused by a timeout.
#[derive(Debug)]
pub(super) struct TimedOut;

impl Error {
    /// Returns true if this was an HTTP parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns true if the connection closed before a message could complete.
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteMessage)
    }

    /// Returns true if the connect phase timed out.
    pub fn is_connect_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::ConnectTimeout)
    }

    /// Returns true if no inbound byte arrived within the read timeout.
    pub fn is_read_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::ReadTimeout)
    }

    /// Returns true if the error was caused by a timeout of any phase.
    pub fn is_timeout(&self) -> bool {
        if matches!(self.inner.kind, Kind::ConnectTimeout | Kind::ReadTimeout) {
            return true;
        }
        self.find_source::<TimedOut>().is_some()
    }

    /// Returns true if TLS negotiation failed or was unavailable.
    pub fn is_tls(&self) -> bool {
        matches!(self.inner.kind, Kind::Tls)
    }

    /// Returns true if a redirect's `Location` was missing or unusable.
    pub fn is_bad_redirect(&self) -> bool {
        matches!(self.inner.kind, Kind::BadRedirect)
    }

    /// Returns true if a buffered response exceeded the configured maximum.
    pub fn is_max_content_length(&self) -> bool {
        matches!(self.inner.kind, Kind::MaxContentLength)
    }

    /// Returns true if a request body stream ended short of its declared
    /// length.
    pub fn is_incomplete_body(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteBody)
    }

    /// Returns true if this was about a `Request` that was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// Returns true if this error was caused by user code.
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(super) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }

        // else
        None
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    pub(crate) fn new_connect_timeout() -> Error {
        Error::new(Kind::ConnectTimeout).with(TimedOut)
    }

    pub(crate) fn new_read_timeout() -> Error {
        Error::new(Kind::ReadTimeout).with(TimedOut)
    }

    pub(crate) fn new_tls<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Tls).with(cause)
    }

    pub(crate) fn new_bad_redirect<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::BadRedirect).with(cause)
    }

    pub(crate) fn new_max_content_length() -> Error {
        Error::new(Kind::MaxContentLength)
    }

    pub(crate) fn new_incomplete_body() -> Error {
        Error::new(Kind::IncompleteBody)
    }

    pub(crate) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_body<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Body).with(cause)
    }

    pub(crate) fn new_body_write(cause: std::io::Error) -> Error {
        Error::new(Kind::BodyWrite).with(cause)
    }

    pub(crate) fn new_user_body<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::User(User::Body)).with(cause)
    }

    pub(crate) fn new_user_config(msg: &'static str) -> Error {
        Error::new(Kind::User(User::Config)).with(msg)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::Status) => "invalid HTTP status-code parsed",
            Kind::Parse(Parse::Version) => "invalid HTTP version parsed",
            Kind::Parse(Parse::Header) => "invalid HTTP header parsed",
            Kind::Parse(Parse::ContentLength) => "invalid content-length parsed",
            Kind::Parse(Parse::Chunk) => "invalid chunk framing parsed",
            Kind::Parse(Parse::TooLarge) => "message head is too large",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::ConnectTimeout => "connect timed out",
            Kind::ReadTimeout => "read timed out",
            Kind::Tls => "TLS negotiation failed",
            Kind::BadRedirect => "redirect location missing or unusable",
            Kind::MaxContentLength => "response body larger than allowed",
            Kind::IncompleteBody => "request body ended before its declared length",
            Kind::Canceled => "operation was canceled",
            Kind::Io => "connection error",
            Kind::Body => "error reading a body from connection",
            Kind::BodyWrite => "error writing a body to connection",
            Kind::User(User::Body) => "error from user's body stream",
            Kind::User(User::Config) => "invalid request configuration",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("brook::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

#[doc(hidden)]
impl From<Parse> for Error {
    fn from(err: Parse) -> Error {
        Error::new(Kind::Parse(err))
    }
}

impl From<httparse::Error> for Parse {
    fn from(err: httparse::Error) -> Parse {
        match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::NewLine
            | httparse::Error::Token => Parse::Header,
            httparse::Error::Status => Parse::Status,
            httparse::Error::TooManyHeaders => Parse::TooLarge,
            httparse::Error::Version => Parse::Version,
        }
    }
}

impl From<http::status::InvalidStatusCode> for Parse {
    fn from(_: http::status::InvalidStatusCode) -> Parse {
        Parse::Status
    }
}

// ===== impl TimedOut ====

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}
