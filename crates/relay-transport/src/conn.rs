//! The byte-stream interface every stream transport and security layer
//! composes on top of: plain `AsyncRead + AsyncWrite` object safety,
//! since this workspace always runs on Tokio and has no need for an
//! executor-agnostic, GAT-parameterized connection trait.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::addr::TransportSocketAddr;

/// An established, possibly-encrypted byte stream: the object stream
/// transports produce from `listen`/`dial`, and the object security
/// layers wrap into an authenticated variant of the same interface.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {
    fn peer_addr(&self) -> Option<TransportSocketAddr>;
    fn local_addr(&self) -> Option<TransportSocketAddr>;
}

pub type BoxConn = Box<dyn Conn>;

impl fmt::Debug for dyn Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("peer_addr", &self.peer_addr())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Wraps a Tokio `TcpStream` (or any `AsyncRead + AsyncWrite` type) as a
/// [`Conn`] with fixed addresses captured at construction time, for
/// transports where the underlying type has no address accessors of its
/// own (e.g. after a security layer has consumed the raw stream).
pub struct FixedAddrConn<T> {
    inner: T,
    peer: Option<TransportSocketAddr>,
    local: Option<TransportSocketAddr>,
}

impl<T> FixedAddrConn<T> {
    pub fn new(inner: T, peer: Option<TransportSocketAddr>, local: Option<TransportSocketAddr>) -> Self {
        Self { inner, peer, local }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for FixedAddrConn<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for FixedAddrConn<T> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for FixedAddrConn<T> {
    fn peer_addr(&self) -> Option<TransportSocketAddr> {
        self.peer
    }

    fn local_addr(&self) -> Option<TransportSocketAddr> {
        self.local
    }
}
