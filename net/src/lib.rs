//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! # Volcano Network Streams
//!
//! [`AnyStream`] erases the difference between a plain TCP stream and the
//! two TLS stream directions so that the telnet and web layers can treat all
//! transports uniformly. Every stream carries a process-unique connection
//! id, the peer address, an optional reverse-resolved hostname and the tls
//! flag mirrored into client capabilities.
//!
//! [`connect`] dials a target with an optional deadline and optional TLS
//! (SNI taken from the caller); [`default_tls_config`] provides a verifying
//! client configuration rooted in the bundled webpki store.

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Result type for network operations.
pub type NetResult<T> = Result<T, NetError>;

/// Errors raised while establishing or using streams.
#[derive(Debug, Error)]
pub enum NetError {
    /// An I/O error from the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TLS server name was not a valid SNI host.
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// The operation did not complete before its deadline.
    #[error("timed out")]
    Timeout,
}

static CONNECTION_IDS: AtomicI64 = AtomicI64::new(1);

/// Allocate the next process-unique connection id.
pub fn next_connection_id() -> i64 {
    CONNECTION_IDS.fetch_add(1, Ordering::Relaxed)
}

enum StreamKind {
    Tcp(TcpStream),
    ServerTls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    ClientTls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// A duplex byte stream over any of the supported transports.
pub struct AnyStream {
    inner: StreamKind,
    id: i64,
    peer_addr: SocketAddr,
    hostname: String,
}

impl AnyStream {
    /// Wrap an accepted or dialed plain TCP stream.
    pub fn from_tcp(stream: TcpStream, peer_addr: SocketAddr, hostname: String) -> AnyStream {
        AnyStream {
            inner: StreamKind::Tcp(stream),
            id: next_connection_id(),
            peer_addr,
            hostname,
        }
    }

    /// Wrap a server-side TLS stream (a terminated inbound session).
    pub fn from_server_tls(
        stream: tokio_rustls::server::TlsStream<TcpStream>,
        peer_addr: SocketAddr,
        hostname: String,
    ) -> AnyStream {
        AnyStream {
            inner: StreamKind::ServerTls(Box::new(stream)),
            id: next_connection_id(),
            peer_addr,
            hostname,
        }
    }

    /// Wrap a client-side TLS stream (an outbound HTTPS session).
    pub fn from_client_tls(
        stream: tokio_rustls::client::TlsStream<TcpStream>,
        peer_addr: SocketAddr,
        hostname: String,
    ) -> AnyStream {
        AnyStream {
            inner: StreamKind::ClientTls(Box::new(stream)),
            id: next_connection_id(),
            peer_addr,
            hostname,
        }
    }

    /// The process-unique connection id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// The peer's socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The peer's hostname, when known; otherwise the address string.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Whether the transport is TLS in either direction.
    pub fn is_tls(&self) -> bool {
        !matches!(self.inner, StreamKind::Tcp(_))
    }
}

impl AsyncRead for AnyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().inner {
            StreamKind::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            StreamKind::ServerTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            StreamKind::ClientTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AnyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut self.get_mut().inner {
            StreamKind::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            StreamKind::ServerTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            StreamKind::ClientTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().inner {
            StreamKind::Tcp(s) => Pin::new(s).poll_flush(cx),
            StreamKind::ServerTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            StreamKind::ClientTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().inner {
            StreamKind::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            StreamKind::ServerTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            StreamKind::ClientTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Transport selection for [`connect`].
#[derive(Clone, Debug, Default)]
pub enum TransportMode {
    /// Plain TCP.
    #[default]
    Plain,
    /// TLS with the given SNI server name.
    Tls {
        /// The name presented for SNI and certificate verification.
        server_name: String,
    },
}

/// Options for [`connect`].
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Plain TCP or TLS.
    pub transport: TransportMode,
    /// Deadline covering the whole dial (TCP connect plus TLS handshake).
    pub timeout: Option<Duration>,
    /// TLS configuration; [`default_tls_config`] when absent.
    pub tls_config: Option<Arc<ClientConfig>>,
}

/// A verifying TLS client configuration rooted in the bundled webpki store.
pub fn default_tls_config() -> Arc<ClientConfig> {
    static CONFIG: std::sync::OnceLock<Arc<ClientConfig>> = std::sync::OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .clone()
}

/// Dial `addr`, optionally upgrading to TLS, within an optional deadline.
pub async fn connect(addr: SocketAddr, options: ConnectOptions) -> NetResult<AnyStream> {
    let dial = async {
        let tcp = TcpStream::connect(addr).await?;
        match &options.transport {
            TransportMode::Plain => {
                let hostname = addr.ip().to_string();
                Ok(AnyStream::from_tcp(tcp, addr, hostname))
            }
            TransportMode::Tls { server_name } => {
                let name = ServerName::try_from(server_name.clone())
                    .map_err(|_| NetError::InvalidServerName(server_name.clone()))?;
                let config = options
                    .tls_config
                    .clone()
                    .unwrap_or_else(default_tls_config);
                let connector = TlsConnector::from(config);
                let tls = connector.connect(name, tcp).await?;
                Ok(AnyStream::from_client_tls(tls, addr, server_name.clone()))
            }
        }
    };

    match options.timeout {
        Some(deadline) => tokio::time::timeout(deadline, dial)
            .await
            .map_err(|_| NetError::Timeout)?,
        None => dial.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn connection_ids_are_unique_and_increasing() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert!(b > a);
    }

    #[tokio::test]
    async fn plain_streams_carry_metadata_and_pass_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let mut stream = connect(addr, ConnectOptions::default()).await.unwrap();
        assert!(!stream.is_tls());
        assert_eq!(stream.peer_addr(), addr);

        stream.write_all(b"hello").await.unwrap();
        let mut echo = [0u8; 5];
        stream.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"hello");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_times_out() {
        // Reserved TEST-NET-1 address; nothing should answer.
        let addr: SocketAddr = "192.0.2.1:9".parse().unwrap();
        let options = ConnectOptions {
            timeout: Some(Duration::from_millis(50)),
            ..ConnectOptions::default()
        };
        let result = connect(addr, options).await;
        assert!(matches!(result, Err(NetError::Timeout) | Err(NetError::Io(_))));
    }
}
