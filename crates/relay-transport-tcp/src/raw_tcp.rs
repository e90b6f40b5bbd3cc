//! The `raw-tcp` stream transport: a thin, semantic wrapper over Tokio's
//! `TcpListener`/`TcpStream`.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use relay_core::error::CoreError;
use relay_core::{Address, Destination, Network};
use relay_transport::addr::TransportSocketAddr;
use relay_transport::conn::Conn;
use relay_transport::stream_transport::{Listener, StreamTransport, TransportSettings};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};

use crate::error::{self, map_io_error};

/// A raw TCP connection, carrying the addresses captured at accept/dial
/// time so later security-layer wraps don't need to re-query the socket.
pub struct TcpConn {
    stream: TcpStream,
    peer: TransportSocketAddr,
    local: TransportSocketAddr,
}

impl TcpConn {
    fn from_stream(stream: TcpStream) -> Result<Self, CoreError> {
        let peer = stream.peer_addr().map_err(|e| map_io_error(error::ACCEPT, e))?;
        let local = stream.local_addr().map_err(|e| map_io_error(error::ACCEPT, e))?;
        Ok(Self {
            stream,
            peer: peer.into(),
            local: local.into(),
        })
    }
}

impl AsyncRead for TcpConn {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpConn {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl Conn for TcpConn {
    fn peer_addr(&self) -> Option<TransportSocketAddr> {
        Some(self.peer)
    }

    fn local_addr(&self) -> Option<TransportSocketAddr> {
        Some(self.local)
    }
}

pub struct TcpListenerImpl {
    inner: TokioTcpListener,
    local_addr: TransportSocketAddr,
}

#[async_trait]
impl Listener for TcpListenerImpl {
    async fn accept(&self) -> Result<(Box<dyn Conn>, TransportSocketAddr), CoreError> {
        let (stream, remote) = self.inner.accept().await.map_err(|e| map_io_error(error::ACCEPT, e))?;
        let conn = TcpConn::from_stream(stream)?;
        let peer = conn.peer;
        Ok((Box::new(conn), peer))
    }

    fn local_addr(&self) -> TransportSocketAddr {
        self.local_addr
    }
}

/// Resolves a [`Destination`] to a dial-able `SocketAddr`. Domain names
/// are resolved with the standard library's blocking resolver, offloaded
/// to Tokio's blocking pool; IP addresses are used as-is.
async fn resolve(destination: &Destination) -> Result<SocketAddr, CoreError> {
    match destination.address() {
        Address::Ipv4(ip) => Ok(SocketAddr::new((*ip).into(), destination.port())),
        Address::Ipv6(ip) => Ok(SocketAddr::new((*ip).into(), destination.port())),
        Address::Domain(domain) => {
            let host = format!("{domain}:{}", destination.port());
            tokio::net::lookup_host(host)
                .await
                .map_err(|e| map_io_error(error::DIAL, e))?
                .next()
                .ok_or_else(|| map_io_error(error::DIAL, std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")))
        }
    }
}

/// The `raw-tcp` stream transport. No settings of its own; `settings`
/// must be [`TransportSettings::RawTcp`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RawTcpTransport;

const NETWORKS: &[Network] = &[Network::Tcp];

#[async_trait]
impl StreamTransport for RawTcpTransport {
    fn name(&self) -> &'static str {
        "raw-tcp"
    }

    fn networks(&self) -> &'static [Network] {
        NETWORKS
    }

    async fn listen(
        &self,
        addr: TransportSocketAddr,
        _settings: &TransportSettings,
    ) -> Result<Box<dyn Listener>, CoreError> {
        let listener = TokioTcpListener::bind(addr.as_std())
            .await
            .map_err(|e| map_io_error(error::BIND, e))?;
        let local_addr = listener.local_addr().map_err(|e| map_io_error(error::BIND, e))?.into();
        Ok(Box::new(TcpListenerImpl { inner: listener, local_addr }))
    }

    async fn dial(&self, destination: &Destination, _settings: &TransportSettings) -> Result<Box<dyn Conn>, CoreError> {
        let socket_addr = resolve(destination).await?;
        let stream = TcpStream::connect(socket_addr).await.map_err(|e| map_io_error(error::DIAL, e))?;
        let conn = TcpConn::from_stream(stream)?;
        Ok(Box::new(conn))
    }
}
