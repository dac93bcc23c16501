//! HTTP/1.1 connections opened by the pool.

use std::net::SocketAddr;

use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use conduit_core::{BoxFuture, ConduitError, ConduitResult, EntityBody};
use conduit_pool::{ConnectionKey, Connector, Poolable};

use crate::tls::{TlsConfig, TransportStream};

/// One HTTP/1.1 connection.
///
/// Hyper drives the socket on a separate task; dropping the connection aborts
/// that task and closes the socket.
pub struct HttpConnection {
    sender: SendRequest<EntityBody>,
    driver: JoinHandle<()>,
    remote: SocketAddr,
}

impl HttpConnection {
    /// Returns the address of the peer.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub(crate) fn sender(&mut self) -> &mut SendRequest<EntityBody> {
        &mut self.sender
    }
}

impl Poolable for HttpConnection {
    fn is_open(&self) -> bool {
        !self.sender.is_closed() && !self.driver.is_finished()
    }
}

impl Drop for HttpConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("remote", &self.remote)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Opens plain or TLS connections and performs the HTTP/1.1 handshake.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    tls: Option<TlsConfig>,
}

impl HttpConnector {
    /// Creates a connector; `https` keys need a TLS configuration.
    #[must_use]
    pub fn new(tls: Option<TlsConfig>) -> Self {
        Self { tls }
    }

    /// Returns the TLS configuration.
    #[must_use]
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    async fn open(&self, key: &ConnectionKey) -> ConduitResult<HttpConnection> {
        let endpoint = key.authority();
        let tcp = TcpStream::connect(endpoint.as_str())
            .await
            .map_err(|e| ConduitError::connect(endpoint.clone(), e))?;
        let remote = tcp
            .peer_addr()
            .map_err(|e| ConduitError::connect(endpoint.clone(), e))?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(endpoint = %endpoint, error = %e, "Failed to set TCP_NODELAY");
        }

        let stream = if key.scheme().is_tls() {
            let tls = self.tls.as_ref().ok_or_else(|| {
                ConduitError::tls(
                    endpoint.clone(),
                    std::io::Error::other("no TLS configuration for https request"),
                )
            })?;
            let tls_stream = tls
                .handshake(key.host(), tcp)
                .await
                .map_err(|e| ConduitError::tls(endpoint.clone(), e))?;
            TransportStream::Tls(Box::new(tls_stream))
        } else {
            TransportStream::Plain(tcp)
        };

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ConduitError::protocol_with_source("HTTP/1.1 handshake failed", e))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(remote = %remote, error = %e, "Connection ended with an error");
            }
        });

        Ok(HttpConnection {
            sender,
            driver,
            remote,
        })
    }
}

impl Connector for HttpConnector {
    type Connection = HttpConnection;

    fn connect<'a>(&'a self, key: &'a ConnectionKey) -> BoxFuture<'a, ConduitResult<HttpConnection>> {
        Box::pin(self.open(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::ErrorKind;
    use conduit_pool::Scheme;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_refused_connection_is_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let key = ConnectionKey::new(Scheme::Http, "127.0.0.1", port);
        let err = HttpConnector::default().connect(&key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert!(!err.connection_established());
    }

    #[tokio::test]
    async fn test_https_without_tls_config_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let key = ConnectionKey::new(Scheme::Https, "127.0.0.1", port);
        let err = HttpConnector::default().connect(&key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tls);
    }

    #[tokio::test]
    async fn test_connection_reports_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let key = ConnectionKey::new(Scheme::Http, "127.0.0.1", port);
        let conn = HttpConnector::default().connect(&key).await.unwrap();
        assert_eq!(conn.remote_addr().port(), port);
        accept.await.unwrap();

        for _ in 0..50 {
            if !conn.is_open() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("connection still reported open after the peer closed it");
    }
}
