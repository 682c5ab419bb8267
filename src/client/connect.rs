//! The contract between the client core and the byte-level transport.
//!
//! The core does not dial sockets or negotiate TLS itself; it asks a
//! [`Connect`] implementation for an established transport and only then
//! takes over framing and flow control. The bundled [`TcpConnector`]
//! handles plain `http` destinations; a TLS-capable connector supplies its
//! own handshake driven by the request's [`TlsContext`] and parameters.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// The byte-level I/O a connection runs on.
///
/// Blanket-implemented for anything that can asynchronously read and write.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// An owned, type-erased transport.
pub type BoxTransport = Box<dyn Transport>;

/// A future returned by [`Connect::connect`].
pub type Connecting = Pin<Box<dyn Future<Output = crate::Result<BoxTransport>> + Send>>;

/// Dials transports for the client.
///
/// Implementations own everything below the HTTP framing layer: name
/// resolution, TCP, and any TLS negotiation the destination calls for. The
/// connect timeout is enforced by the caller, not the connector.
pub trait Connect: Send + Sync {
    /// Establishes a transport to `dst`, ready for a request.
    fn connect(&self, dst: &Destination) -> Connecting;
}

/// Where a request is going, and with what transport security.
#[derive(Clone)]
pub struct Destination {
    scheme: Scheme,
    host: String,
    port: u16,
    tls: Option<TlsContext>,
    tls_params: TlsParams,
}

/// The URI scheme of a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Cleartext HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Destination {
    pub(crate) fn new(
        scheme: Scheme,
        host: String,
        port: u16,
        tls: Option<TlsContext>,
        tls_params: TlsParams,
    ) -> Destination {
        Destination {
            scheme,
            host,
            port,
            tls,
            tls_params,
        }
    }

    /// The destination scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The destination host, as it appeared in the URI.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The destination port, with the scheme default applied.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The TLS context configured for the request, if any.
    pub fn tls(&self) -> Option<&TlsContext> {
        self.tls.as_ref()
    }

    /// TLS parameters for the handshake, after any request customizer ran.
    pub fn tls_params(&self) -> &TlsParams {
        &self.tls_params
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Opaque TLS material handed through to the connector.
///
/// The core never inspects the contents; it only keys the connection pool
/// on the context's identity, so transports negotiated under different
/// contexts are never interchanged. Connectors downcast to the concrete
/// configuration type they were paired with.
#[derive(Clone)]
pub struct TlsContext {
    inner: Arc<dyn Any + Send + Sync>,
}

impl TlsContext {
    /// Wraps connector-specific TLS configuration.
    pub fn new<T: Any + Send + Sync>(material: T) -> TlsContext {
        TlsContext {
            inner: Arc::new(material),
        }
    }

    /// Recovers the concrete configuration, if `T` is what was stored.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }

    /// A stable identity for pool keying: two clones share it, two
    /// separately constructed contexts never do.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TlsContext").finish()
    }
}

/// Negotiation parameters a connector should apply during the handshake.
#[derive(Clone, Debug, Default)]
pub struct TlsParams {
    server_name: Option<String>,
    alpn_protocols: Vec<String>,
}

impl TlsParams {
    /// The server name to present (SNI); defaults to the destination host.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Overrides the server name presented during the handshake.
    pub fn set_server_name(&mut self, name: impl Into<String>) {
        self.server_name = Some(name.into());
    }

    /// ALPN protocols to offer, in preference order.
    pub fn alpn_protocols(&self) -> &[String] {
        &self.alpn_protocols
    }

    /// Replaces the ALPN protocols to offer.
    pub fn set_alpn_protocols(&mut self, protocols: Vec<String>) {
        self.alpn_protocols = protocols;
    }
}

/// A connector for cleartext destinations.
///
/// `https` destinations are refused: pair the client with a TLS-capable
/// connector to use them.
#[derive(Clone, Debug, Default)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    /// Creates a connector with `TCP_NODELAY` enabled.
    pub fn new() -> TcpConnector {
        TcpConnector { nodelay: true }
    }
}

impl Connect for TcpConnector {
    fn connect(&self, dst: &Destination) -> Connecting {
        if dst.scheme() == Scheme::Https {
            return Box::pin(async {
                Err(crate::Error::new_tls(
                    "https destination but no TLS connector configured",
                ))
            });
        }

        let host = dst.host().to_owned();
        let port = dst.port();
        let nodelay = self.nodelay;
        Box::pin(async move {
            trace!("connecting to {}:{}", host, port);
            let stream = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(crate::Error::new_io)?;
            if nodelay {
                stream.set_nodelay(true).map_err(crate::Error::new_io)?;
            }
            Ok(Box::new(stream) as BoxTransport)
        })
    }
}
