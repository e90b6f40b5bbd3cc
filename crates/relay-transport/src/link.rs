//! Adapts a raw [`Conn`] into a [`Link`], for inbound handlers that have
//! no wire framing of their own (Dokodemo) and for any outbound handler
//! that needs to hand its dialed connection to [`relay_switch::pipe`] as
//! a `Link` rather than a bare `Conn`.
//!
//! Every `InboundHandler`/`OutboundHandler::process` works in terms of
//! `Link`, never `Conn` directly; this is the one place that bridges the
//! two, so protocol crates never hand-roll the bridge themselves.

use async_trait::async_trait;
use relay_core::buffer::{BufferPool, MultiBuffer};
use relay_core::error::CoreError;
use relay_core::service::Link;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::conn::BoxConn;

/// A pass-through `Link` over a raw `Conn`: reads land in one
/// `MultiBuffer`-wrapped `Buffer` per `read_multi_buffer` call, writes go
/// straight to the wire with no re-framing.
///
/// `interrupt()` is synchronous (per the `Link` contract) but tearing
/// down a `Conn` is not, so it only flips a flag; the next read or write
/// observes it and fails instead of touching the connection.
pub struct ConnLink {
    conn: BoxConn,
    pool: Arc<BufferPool>,
    interrupted: AtomicBool,
}

impl ConnLink {
    pub fn new(conn: BoxConn, pool: Arc<BufferPool>) -> Self {
        Self {
            conn,
            pool,
            interrupted: AtomicBool::new(false),
        }
    }

    /// Hands back the wrapped connection, e.g. once a protocol handler
    /// has finished its own handshake and wants direct `Conn` access
    /// again rather than going through `Link`.
    pub fn into_inner(self) -> BoxConn {
        self.conn
    }
}

fn interrupted_error() -> CoreError {
    CoreError::new(
        relay_core::error::codes::DISPATCH_CANCELLED,
        relay_core::error::ErrorCategory::Cancelled,
        "conn link interrupted",
    )
}

#[async_trait]
impl Link for ConnLink {
    async fn read_multi_buffer(&mut self) -> Result<MultiBuffer, CoreError> {
        if self.interrupted.load(Ordering::Acquire) {
            return Err(interrupted_error());
        }
        let mut buf = self.pool.acquire();
        let cap = buf.capacity();
        let mut scratch = vec![0u8; cap];
        let n = self.conn.read(&mut scratch).await.map_err(|e| {
            CoreError::wrap(
                relay_core::error::codes::TRANSPORT_IO,
                relay_core::error::ErrorCategory::Network,
                "conn_link.read",
                e,
            )
        })?;
        if n == 0 {
            buf.release();
            return Ok(MultiBuffer::new());
        }
        let dst = buf.extend(n)?;
        dst.copy_from_slice(&scratch[..n]);
        Ok(MultiBuffer::single(buf))
    }

    async fn write_multi_buffer(&mut self, mb: MultiBuffer) -> Result<(), CoreError> {
        if self.interrupted.load(Ordering::Acquire) {
            mb.release_all();
            return Err(interrupted_error());
        }
        if mb.is_empty() {
            let _ = self.conn.shutdown().await;
            return Ok(());
        }
        for buf in mb.iter() {
            self.conn.write_all(buf.as_slice()).await.map_err(|e| {
                CoreError::wrap(
                    relay_core::error::codes::TRANSPORT_IO,
                    relay_core::error::ErrorCategory::Network,
                    "conn_link.write",
                    e,
                )
            })?;
        }
        mb.release_all();
        Ok(())
    }

    fn interrupt(&mut self) {
        self.interrupted.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::FixedAddrConn;
    use relay_core::buffer::DEFAULT_BUFFER_CAPACITY;
    use tokio::io::duplex;

    #[tokio::test]
    async fn echoes_bytes_through_without_reframing() {
        let (mut client, server) = duplex(64);
        let conn: BoxConn = Box::new(FixedAddrConn::new(server, None, None));
        let pool = BufferPool::new(DEFAULT_BUFFER_CAPACITY);
        let mut link = ConnLink::new(conn, pool);

        client.write_all(b"ping").await.unwrap();
        let mb = link.read_multi_buffer().await.unwrap();
        assert_eq!(mb.total_len(), 4);

        link.write_multi_buffer(mb).await.unwrap();
        let mut out = [0u8; 4];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"ping");
    }

    #[tokio::test]
    async fn eof_yields_empty_multi_buffer() {
        let (client, server) = duplex(64);
        drop(client);
        let conn: BoxConn = Box::new(FixedAddrConn::new(server, None, None));
        let pool = BufferPool::new(DEFAULT_BUFFER_CAPACITY);
        let mut link = ConnLink::new(conn, pool);
        let mb = link.read_multi_buffer().await.unwrap();
        assert!(mb.is_empty());
    }
}
