//! TLS for outbound connections.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig as RustlsConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use conduit_core::{ConduitError, ConduitResult};

static NEXT_TLS_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// TLS settings for `https` requests.
///
/// Each `TlsConfig` gets its own identity, which is part of the pool key:
/// connections made with different configurations are never shared.
#[derive(Clone)]
pub struct TlsConfig {
    config: Arc<RustlsConfig>,
    identity: u64,
}

impl TlsConfig {
    /// Wraps a rustls client configuration.
    pub fn new(config: RustlsConfig) -> Self {
        Self::from_arc(Arc::new(config))
    }

    /// Wraps a shared rustls client configuration.
    pub fn from_arc(config: Arc<RustlsConfig>) -> Self {
        Self {
            config,
            identity: NEXT_TLS_IDENTITY.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Trusts the given roots, without client authentication, using the
    /// `ring` crypto provider.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the provider supports none of the default protocol
    /// versions.
    pub fn with_roots(roots: RootCertStore) -> ConduitResult<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = RustlsConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ConduitError::invalid_request(format!("unusable TLS provider: {e}")))?;
        Ok(Self::new(
            builder.with_root_certificates(roots).with_no_client_auth(),
        ))
    }

    /// Returns the identity used in pool keys.
    #[must_use]
    pub fn identity(&self) -> u64 {
        self.identity
    }

    /// Returns the rustls configuration.
    #[must_use]
    pub fn rustls_config(&self) -> &Arc<RustlsConfig> {
        &self.config
    }

    pub(crate) async fn handshake(&self, host: &str, tcp: TcpStream) -> io::Result<TlsStream<TcpStream>> {
        let name = ServerName::try_from(host.trim_start_matches('[').trim_end_matches(']').to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        TlsConnector::from(Arc::clone(&self.config))
            .connect(name, tcp)
            .await
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("identity", &self.identity)
            .field("alpn", &self.config.alpn_protocols.len())
            .finish()
    }
}

/// A plain or TLS socket.
pub(crate) enum TransportStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Self::Plain(stream) => stream.is_write_vectored(),
            Self::Tls(stream) => stream.is_write_vectored(),
        }
    }
}
