//! The HTTP/1.1 client: configuration, connection checkout, request
//! dispatch, redirects, and streamed response delivery.
//!
//! A [`Client`] owns its collaborators — the [`Connect`] implementation
//! that dials transports and the pool that keeps drained keep-alive
//! connections warm. Requests are described by a configurator closure over
//! a [`RequestSpec`]; each call to [`Client::request`] or
//! [`Client::request_stream`] snapshots the spec into an immutable
//! per-attempt configuration and runs the request to completion, following
//! redirects up to the configured bound.
//!
//! [`Connect`]: connect::Connect

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::CONNECTION;
use http::{HeaderMap, Response, Uri};

use crate::body::StreamedBody;

use self::config::Defaults;
use self::connect::{Connect, TcpConnector};
use self::pool::Pool;

pub use self::config::{
    Configure, OnRedirect, RequestSpec, TlsParamsFn, DEFAULT_MAX_REDIRECTS,
};

pub mod connect;

mod action;
mod config;
pub(crate) mod decompress;
pub(crate) mod pool;
mod redirect;

/// State shared by every request a client issues.
pub(crate) struct Shared {
    pub(crate) connector: Box<dyn Connect>,
    pub(crate) pool: Pool,
    pub(crate) defaults: Defaults,
}

/// An HTTP/1.1 client.
///
/// Cheap to clone; clones share the connector and the connection pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Shared>,
}

impl Client {
    /// Creates a client with default configuration: a plain TCP connector
    /// and a small per-host pool of idle connections.
    pub fn new() -> Client {
        Client::builder().build()
    }

    /// Starts configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Issues a request and buffers the whole response body.
    ///
    /// The configurator runs over a [`RequestSpec`] seeded with this
    /// client's defaults; it may run again for redirect hops. The body is
    /// aggregated under the configured maximum content length.
    pub async fn request<F>(&self, uri: Uri, configure: F) -> crate::Result<Response<Bytes>>
    where
        F: Fn(&mut RequestSpec) -> crate::Result<()> + Send + Sync + 'static,
    {
        let response = self.request_stream(uri, configure).await?;
        let (parts, body) = response.into_parts();
        let bytes = body.aggregate().await?;
        Ok(Response::from_parts(parts, bytes))
    }

    /// Issues a request and returns the response as soon as its head
    /// arrives, with the body left on the wire.
    ///
    /// The returned [`StreamedBody`] owns the connection: chunks are read
    /// from the socket only as the body is polled, and dropping the body
    /// early closes the connection.
    pub async fn request_stream<F>(
        &self,
        uri: Uri,
        configure: F,
    ) -> crate::Result<Response<StreamedBody>>
    where
        F: Fn(&mut RequestSpec) -> crate::Result<()> + Send + Sync + 'static,
    {
        action::execute(&self.inner, uri, Arc::new(configure)).await
    }

    /// Issues a GET request for `uri` and buffers the response body.
    pub async fn get(&self, uri: Uri) -> crate::Result<Response<Bytes>> {
        self.request(uri, |_| Ok(())).await
    }
}

impl Default for Client {
    fn default() -> Client {
        Client::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.inner.pool)
            .finish()
    }
}

/// Configures and builds a [`Client`].
pub struct ClientBuilder {
    connector: Option<Box<dyn Connect>>,
    pool_max_idle_per_host: usize,
    defaults: Defaults,
}

impl ClientBuilder {
    /// Creates a builder with the default settings.
    pub fn new() -> ClientBuilder {
        ClientBuilder {
            connector: None,
            pool_max_idle_per_host: 4,
            defaults: Defaults::default(),
        }
    }

    /// Uses `connector` to establish transports.
    ///
    /// Defaults to [`TcpConnector`], which handles only `http`
    /// destinations; supply a TLS-capable connector for `https`.
    pub fn connector<C: Connect + 'static>(mut self, connector: C) -> ClientBuilder {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Caps the idle transports kept per destination. Zero disables
    /// pooling entirely.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> ClientBuilder {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Default connect timeout for requests that do not set one.
    pub fn connect_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.defaults.connect_timeout = timeout;
        self
    }

    /// Default read timeout for requests that do not set one.
    pub fn read_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.defaults.read_timeout = timeout;
        self
    }

    /// Default maximum buffered response length; `None` is unbounded.
    pub fn max_content_length(mut self, limit: impl Into<Option<u64>>) -> ClientBuilder {
        self.defaults.max_content_length = limit.into();
        self
    }

    /// Default maximum size of streamed response chunks.
    pub fn response_max_chunk_size(mut self, bytes: usize) -> ClientBuilder {
        self.defaults.response_max_chunk_size = bytes;
        self
    }

    /// Builds the client.
    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(Shared {
                connector: self
                    .connector
                    .unwrap_or_else(|| Box::new(TcpConnector::new())),
                pool: Pool::new(self.pool_max_idle_per_host),
                defaults: self.defaults,
            }),
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("defaults", &self.defaults)
            .finish()
    }
}

/// Copies a streamed response's headers for forwarding to another peer.
///
/// The hop-by-hop `Connection` header is removed; `mutate` may then adjust
/// the copy before it is sent onward.
pub fn forward_headers(headers: &HeaderMap, mutate: impl FnOnce(&mut HeaderMap)) -> HeaderMap {
    let mut forwarded = headers.clone();
    forwarded.remove(CONNECTION);
    mutate(&mut forwarded);
    forwarded
}
