//! TCP channel.
//!
//! The acceptor socket is built with `socket2` so buffer sizes and address
//! reuse can be set before `listen`; outbound connections use
//! `tokio::net::TcpSocket` for the same reason.

use crate::TcpConfig;
use crate::transport::{Channel, TransportError, TransportResult};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// A connected TCP byte stream.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpChannel {
    /// Connect to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] for a bad config and
    /// [`TransportError::ConnectionFailed`] if the connection cannot be made.
    pub async fn connect(addr: SocketAddr, config: &TcpConfig) -> TransportResult<Self> {
        config.validate()?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // validate() guarantees both sizes fit in u32
        socket.set_recv_buffer_size(config.recv_buffer_size as u32)?;
        socket.set_send_buffer_size(config.send_buffer_size as u32)?;

        let stream = socket
            .connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

        tracing::debug!("Connected to {}", addr);
        Self::from_stream(stream, config)
    }

    /// Wrap an already-connected stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if socket options cannot be applied.
    pub fn from_stream(stream: TcpStream, config: &TcpConfig) -> TransportResult<Self> {
        stream.set_nodelay(config.nodelay)?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer })
    }

    /// Remote address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Local address.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the address cannot be determined.
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.stream.local_addr().map_err(TransportError::Io)
    }
}

impl Channel for TcpChannel {
    fn peer_label(&self) -> String {
        self.peer.to_string()
    }
}

impl AsyncRead for TcpChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Listening TCP socket producing [`TcpChannel`]s.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpAcceptor {
    /// Bind and listen on `addr`. Use port 0 for automatic port selection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] if the socket cannot be set up.
    pub fn bind(addr: SocketAddr, config: TcpConfig) -> TransportResult<Self> {
        config.validate()?;

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let bind_failed = |e: io::Error| TransportError::BindFailed(format!("{addr}: {e}"));

        let socket =
            socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
                .map_err(bind_failed)?;
        socket.set_reuse_address(true).map_err(bind_failed)?;
        socket
            .set_recv_buffer_size(config.recv_buffer_size)
            .map_err(bind_failed)?;
        socket
            .set_send_buffer_size(config.send_buffer_size)
            .map_err(bind_failed)?;
        socket.bind(&addr.into()).map_err(bind_failed)?;
        socket.listen(config.backlog).map_err(bind_failed)?;

        // Convert to std listener, then to tokio listener
        socket.set_nonblocking(true).map_err(bind_failed)?;
        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener).map_err(bind_failed)?;

        tracing::info!("Listening on {}", addr);
        Ok(Self { listener, config })
    }

    /// Wait for the next inbound connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if accepting fails.
    pub async fn accept(&self) -> TransportResult<TcpChannel> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);
        TcpChannel::from_stream(stream, &self.config)
    }

    /// Local bound address.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the address cannot be determined.
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_loopback_exchange() {
        let acceptor =
            TcpAcceptor::bind("127.0.0.1:0".parse().unwrap(), TcpConfig::default()).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut channel = acceptor.accept().await.unwrap();
            let mut buf = [0u8; 5];
            channel.read_exact(&mut buf).await.unwrap();
            channel.write_all(&buf).await.unwrap();
            channel.flush().await.unwrap();
        });

        let mut client = TcpChannel::connect(addr, &TcpConfig::default())
            .await
            .unwrap();
        assert_eq!(client.peer_addr(), addr);
        assert_eq!(client.peer_label(), addr.to_string());

        client.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to obtain a port with no listener
        let addr = {
            let acceptor =
                TcpAcceptor::bind("127.0.0.1:0".parse().unwrap(), TcpConfig::default()).unwrap();
            acceptor.local_addr().unwrap()
        };

        let result = TcpChannel::connect(addr, &TcpConfig::default()).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = TcpConfig {
            send_buffer_size: 0,
            ..TcpConfig::default()
        };
        let result = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap(), config);
        assert!(matches!(result, Err(TransportError::InvalidConfig(_))));
    }
}
