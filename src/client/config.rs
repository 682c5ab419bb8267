use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, IntoHeaderName, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method, Uri};

use crate::body::{BodySource, Content};
use crate::headers;

use super::connect::TlsContext;

/// A function applied to a [`RequestSpec`] to configure a request.
///
/// Configurators are plain `Fn` rather than `FnOnce`: a redirected request
/// builds a fresh spec for every hop, and the configurator runs again each
/// time (composed with any per-redirect reconfigurator).
pub type Configure = Arc<dyn Fn(&mut RequestSpec) -> crate::Result<()> + Send + Sync>;

/// The redirect decision function.
///
/// Invoked with the head of a redirect response when redirects are enabled.
/// Returning `None` stops the chase and surfaces that response; returning a
/// configurator follows the redirect and composes the configurator onto the
/// next request.
pub type OnRedirect =
    Arc<dyn Fn(&http::response::Parts) -> Option<Configure> + Send + Sync>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CHUNK: usize = 8192;

/// The default number of redirects to follow automatically.
pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

/// Client-level defaults a request spec is seeded from.
#[derive(Clone, Debug)]
pub(crate) struct Defaults {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) max_content_length: Option<u64>,
    pub(crate) response_max_chunk_size: usize,
}

impl Default for Defaults {
    fn default() -> Defaults {
        Defaults {
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            max_content_length: None,
            response_max_chunk_size: DEFAULT_MAX_CHUNK,
        }
    }
}

/// A mutable view of a request while it is being configured.
///
/// Handed to the configurator passed to [`Client::request`] and friends.
/// Once the configurator returns, the spec is snapshotted into an immutable
/// per-attempt configuration; later mutations are impossible.
///
/// [`Client::request`]: crate::Client::request
pub struct RequestSpec {
    uri: Uri,
    method: Method,
    headers: HeaderMap,
    content: Content,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_content_length: Option<u64>,
    response_max_chunk_size: usize,
    decompress_response: bool,
    max_redirects: u32,
    tls: Option<TlsContext>,
    tls_params: Option<TlsParamsFn>,
    on_redirect: Option<OnRedirect>,
}

/// A customizer for TLS negotiation parameters.
pub type TlsParamsFn = Arc<dyn Fn(&mut super::connect::TlsParams) + Send + Sync>;

impl RequestSpec {
    fn new(uri: Uri, defaults: &Defaults) -> RequestSpec {
        RequestSpec {
            uri,
            method: Method::GET,
            headers: HeaderMap::new(),
            content: Content::empty(),
            connect_timeout: defaults.connect_timeout,
            read_timeout: defaults.read_timeout,
            max_content_length: defaults.max_content_length,
            response_max_chunk_size: defaults.response_max_chunk_size,
            decompress_response: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            tls: None,
            tls_params: None,
            on_redirect: None,
        }
    }

    /// The request URI. Fixed at request time; redirects produce a new spec.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Sets the request method.
    pub fn method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    /// Adds a request header, keeping any existing values for the name.
    pub fn header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    /// The request headers, for free-form mutation.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Sets an `Authorization: Basic` header from the given credentials.
    ///
    /// The credentials are encoded as their ISO-8859-1 bytes, joined by a
    /// colon and base64-encoded. Any previous Authorization header is
    /// replaced.
    pub fn basic_auth(&mut self, user: &str, pass: &str) -> &mut Self {
        self.headers
            .insert(AUTHORIZATION, headers::basic_auth_value(user, pass));
        self
    }

    /// Sets the body to a buffer of bytes.
    pub fn body_bytes(&mut self, bytes: impl Into<Bytes>) -> &mut Self {
        self.set_content(Content::buffer(bytes));
        self
    }

    /// Sets the body to prepared [`Content`].
    pub fn body(&mut self, content: Content) -> &mut Self {
        self.set_content(content);
        self
    }

    /// Sets a UTF-8 text body.
    ///
    /// Sets `Content-Type: text/plain;charset=UTF-8` unless a Content-Type
    /// header is already present.
    pub fn body_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.maybe_set_content_type(HeaderValue::from_static("text/plain;charset=UTF-8"));
        self.set_content(Content::buffer(text.into()));
        self
    }

    /// Sets a text body already encoded in `charset`.
    ///
    /// The crate ships no transcoding tables, so non-UTF-8 text arrives
    /// here as caller-encoded bytes plus the charset's name, which is used
    /// for the defaulted `Content-Type` (only set when none is present).
    pub fn body_text_encoded(&mut self, bytes: impl Into<Bytes>, charset: &str) -> &mut Self {
        if let Ok(value) = HeaderValue::from_str(&format!("text/plain;charset={}", charset)) {
            self.maybe_set_content_type(value);
        }
        self.set_content(Content::buffer(bytes));
        self
    }

    /// Sets a streamed body of exactly `length` bytes.
    ///
    /// The source may be invoked more than once: redirects that replay the
    /// body restart it from the beginning.
    pub fn body_stream(&mut self, source: BodySource, length: u64) -> &mut Self {
        self.set_content(Content::stream(source, length));
        self
    }

    /// Sets a streamed body of unknown length, sent chunked.
    pub fn body_stream_unknown(&mut self, source: BodySource) -> &mut Self {
        self.set_content(Content::stream_unknown(source));
        self
    }

    fn set_content(&mut self, content: Content) {
        // A body assigned earlier in this same configuration is released.
        self.content.discard();
        self.content = content;
    }

    fn maybe_set_content_type(&mut self, value: HeaderValue) {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers.insert(CONTENT_TYPE, value);
        }
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout, measured between inbound bytes.
    pub fn read_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the maximum buffered response length; `None` is unbounded.
    ///
    /// Only enforced when the response is aggregated into one buffer.
    pub fn max_content_length(&mut self, limit: impl Into<Option<u64>>) -> &mut Self {
        self.max_content_length = limit.into();
        self
    }

    /// Sets the maximum size of the chunks emitted when streaming the
    /// response. Must be greater than zero.
    pub fn response_max_chunk_size(&mut self, bytes: usize) -> &mut Self {
        self.response_max_chunk_size = bytes;
        self
    }

    /// Controls automatic response decompression. Defaults to on.
    pub fn decompress_response(&mut self, decompress: bool) -> &mut Self {
        self.decompress_response = decompress;
        self
    }

    /// Sets the maximum number of redirects to follow before the redirect
    /// response itself is returned. Zero disables redirect handling.
    pub fn redirects(&mut self, max_redirects: u32) -> &mut Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Sets the redirect decision function.
    pub fn on_redirect<F>(&mut self, decide: F) -> &mut Self
    where
        F: Fn(&http::response::Parts) -> Option<Configure> + Send + Sync + 'static,
    {
        self.on_redirect = Some(Arc::new(decide));
        self
    }

    /// Sets the TLS context used when connecting to `https` destinations.
    pub fn tls_context(&mut self, tls: TlsContext) -> &mut Self {
        self.tls = Some(tls);
        self
    }

    /// Sets a customizer for TLS negotiation parameters (SNI, ALPN).
    pub fn tls_params<F>(&mut self, customize: F) -> &mut Self
    where
        F: Fn(&mut super::connect::TlsParams) + Send + Sync + 'static,
    {
        self.tls_params = Some(Arc::new(customize));
        self
    }
}

impl fmt::Debug for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSpec")
            .field("uri", &self.uri)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("content", &self.content)
            .finish()
    }
}

/// An immutable snapshot of one request attempt's configuration.
pub(crate) struct RequestConfig {
    pub(crate) uri: Uri,
    pub(crate) method: Method,
    pub(crate) headers: HeaderMap,
    pub(crate) content: Content,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) max_content_length: Option<u64>,
    pub(crate) response_max_chunk_size: usize,
    pub(crate) decompress_response: bool,
    pub(crate) max_redirects: u32,
    pub(crate) tls: Option<TlsContext>,
    pub(crate) tls_params: Option<TlsParamsFn>,
    pub(crate) on_redirect: Option<OnRedirect>,
}

impl RequestConfig {
    /// Builds the per-attempt configuration by running `configure` over a
    /// spec seeded with the client defaults.
    ///
    /// A body the configurator had already assigned is discarded before a
    /// configurator error propagates.
    pub(crate) fn build(
        uri: Uri,
        defaults: &Defaults,
        configure: &Configure,
    ) -> crate::Result<RequestConfig> {
        let mut spec = RequestSpec::new(uri, defaults);

        if let Err(err) = configure(&mut spec) {
            spec.content.discard();
            return Err(err);
        }

        if spec.response_max_chunk_size == 0 {
            spec.content.discard();
            return Err(crate::Error::new_user_config(
                "response_max_chunk_size must be greater than zero",
            ));
        }
        if spec.content.is_stream() && spec.content.len() == Some(0) {
            spec.content.discard();
            return Err(crate::Error::new_user_config(
                "streamed body length must be greater than zero",
            ));
        }

        Ok(RequestConfig {
            uri: spec.uri,
            method: spec.method,
            headers: spec.headers,
            content: spec.content,
            connect_timeout: spec.connect_timeout,
            read_timeout: spec.read_timeout,
            max_content_length: spec.max_content_length,
            response_max_chunk_size: spec.response_max_chunk_size,
            decompress_response: spec.decompress_response,
            max_redirects: spec.max_redirects,
            tls: spec.tls,
            tls_params: spec.tls_params,
            on_redirect: spec.on_redirect,
        })
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("uri", &self.uri)
            .field("method", &self.method)
            .field("max_redirects", &self.max_redirects)
            .finish()
    }
}
