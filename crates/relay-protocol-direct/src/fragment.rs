//! TCP ClientHello fragmenting: splits the first `packet_count` writes
//! into smaller chunks with a random inter-packet delay, so a box
//! inspecting packet boundaries sees several small segments instead of
//! one that looks like a TLS ClientHello. Applies to the first writes a
//! session makes on the dialed connection only; once the packet budget
//! is spent, writes pass straight through.

use std::ops::Range;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;
use relay_transport::conn::Conn;
use relay_transport::TransportSocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentSettings {
    pub packet_count: Range<u32>,
    pub chunk_len: Range<usize>,
    pub inter_packet_delay: Range<Duration>,
}

struct FragmentState {
    remaining_packets: u32,
    chunk_len: Range<usize>,
    inter_packet_delay: Range<Duration>,
    pending_sleep: Option<Pin<Box<Sleep>>>,
}

/// Wraps a [`Conn`] so its first handful of writes are chopped up and
/// delayed per [`FragmentSettings`]; `AsyncRead` and the rest of
/// `AsyncWrite` pass straight through.
pub struct FragmentingConn {
    inner: Box<dyn Conn>,
    state: Option<FragmentState>,
}

impl FragmentingConn {
    pub fn new(inner: Box<dyn Conn>, settings: &FragmentSettings) -> Self {
        let mut rng = rand::thread_rng();
        let packet_count = if settings.packet_count.is_empty() {
            0
        } else {
            rng.gen_range(settings.packet_count.clone())
        };
        Self {
            inner,
            state: Some(FragmentState {
                remaining_packets: packet_count,
                chunk_len: settings.chunk_len.clone(),
                inter_packet_delay: settings.inter_packet_delay.clone(),
                pending_sleep: None,
            }),
        }
    }
}

impl AsyncRead for FragmentingConn {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FragmentingConn {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let Some(state) = self.state.as_mut() else {
            return Pin::new(&mut self.inner).poll_write(cx, buf);
        };

        if let Some(sleep) = state.pending_sleep.as_mut() {
            match sleep.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(()) => state.pending_sleep = None,
            }
        }

        if state.remaining_packets == 0 || buf.is_empty() {
            self.state = None;
            return Pin::new(&mut self.inner).poll_write(cx, buf);
        }

        let chunk_len = {
            let mut rng = rand::thread_rng();
            let want = if state.chunk_len.is_empty() {
                buf.len()
            } else {
                rng.gen_range(state.chunk_len.clone())
            };
            want.clamp(1, buf.len())
        };

        match Pin::new(&mut self.inner).poll_write(cx, &buf[..chunk_len]) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(n)) => {
                state.remaining_packets -= 1;
                let delay = if state.inter_packet_delay.is_empty() {
                    Duration::ZERO
                } else {
                    let mut rng = rand::thread_rng();
                    let lo = state.inter_packet_delay.start.as_millis() as u64;
                    let hi = state.inter_packet_delay.end.as_millis() as u64;
                    Duration::from_millis(rng.gen_range(lo..hi.max(lo + 1)))
                };
                if !delay.is_zero() {
                    state.pending_sleep = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Poll::Ready(Ok(n))
            }
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Conn for FragmentingConn {
    fn peer_addr(&self) -> Option<TransportSocketAddr> {
        self.inner.peer_addr()
    }

    fn local_addr(&self) -> Option<TransportSocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_transport::conn::{BoxConn, FixedAddrConn};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn splits_first_write_into_configured_packet_count() {
        let (mut client, server) = duplex(256);
        let conn: BoxConn = Box::new(FixedAddrConn::new(server, None, None));
        let settings = FragmentSettings {
            packet_count: 3..4,
            chunk_len: 2..3,
            inter_packet_delay: Duration::ZERO..Duration::from_millis(1),
        };
        let mut fragmenting = FragmentingConn::new(conn, &settings);

        tokio::spawn(async move {
            fragmenting.write_all(b"abcdef").await.unwrap();
        });

        let mut received = [0u8; 6];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"abcdef");
    }

    #[tokio::test]
    async fn zero_packet_budget_is_passthrough() {
        let (mut client, server) = duplex(256);
        let conn: BoxConn = Box::new(FixedAddrConn::new(server, None, None));
        let settings = FragmentSettings {
            packet_count: 0..1,
            chunk_len: 1..2,
            inter_packet_delay: Duration::ZERO..Duration::from_millis(1),
        };
        let mut fragmenting = FragmentingConn::new(conn, &settings);
        fragmenting.write_all(b"hi").await.unwrap();
        let mut received = [0u8; 2];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hi");
    }
}
