//! The `reality` security layer: peeks the initial ClientHello for a
//! configured short-id and either authenticates the session or
//! transparently forwards the raw bytes to a configured fallback
//! destination. The ClientHello is parsed only far enough to read the
//! fields that carry the short-id (record header, handshake header,
//! `session_id` field) — no certificate or extension parsing.

use std::time::Duration;

use async_trait::async_trait;
use relay_core::error::{CoreError, ErrorCategory};
use relay_core::time::MonotonicTimePoint;
use relay_transport::conn::{BoxConn, Conn, FixedAddrConn};
use relay_transport::security::{SecurityLayer, SecuritySettings};
use relay_transport::settings::RealityServerSettings;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{self, map_io_error};

const FALLBACK_HANDLED: &str = "reality.fallback_handled";
const TLS_HANDSHAKE_CONTENT_TYPE: u8 = 0x16;
const CLIENT_HELLO_HANDSHAKE_TYPE: u8 = 0x01;

/// Peek buffer large enough for a TLS record header, handshake header,
/// client version, random, and a session-id up to 32 bytes.
const PEEK_BUDGET: usize = 5 + 4 + 2 + 32 + 1 + 32;

/// Extracts the `session_id` field from the first ClientHello record in
/// `bytes`, if one is present. REALITY smuggles the short-id as the
/// first 8 bytes of this field; everything after is ignored.
fn extract_session_id(bytes: &[u8]) -> Option<[u8; 8]> {
    let record = bytes.get(0..5)?;
    if record[0] != TLS_HANDSHAKE_CONTENT_TYPE {
        return None;
    }
    let handshake = bytes.get(5..9)?;
    if handshake[0] != CLIENT_HELLO_HANDSHAKE_TYPE {
        return None;
    }
    // client_version(2) + random(32) precede session_id_len(1).
    let session_id_len_offset = 9 + 2 + 32;
    let session_id_len = *bytes.get(session_id_len_offset)? as usize;
    if session_id_len < 8 {
        return None;
    }
    let session_id_start = session_id_len_offset + 1;
    let session_id = bytes.get(session_id_start..session_id_start + 8)?;
    let mut short_id = [0u8; 8];
    short_id.copy_from_slice(session_id);
    Some(short_id)
}

/// A connection with bytes already read off the wire and not yet handed
/// to the caller; those bytes are replayed before further reads reach
/// the underlying socket.
struct PeekedConn {
    prefix: Vec<u8>,
    prefix_pos: usize,
    inner: BoxConn,
}

impl tokio::io::AsyncRead for PeekedConn {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.prefix_pos < self.prefix.len() {
            let remaining = &self.prefix[self.prefix_pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            self.prefix_pos += n;
            return std::task::Poll::Ready(Ok(()));
        }
        std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for PeekedConn {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Conn for PeekedConn {
    fn peer_addr(&self) -> Option<relay_transport::addr::TransportSocketAddr> {
        self.inner.peer_addr()
    }

    fn local_addr(&self) -> Option<relay_transport::addr::TransportSocketAddr> {
        self.inner.local_addr()
    }
}

/// Server- and client-side REALITY handling. The server side never
/// holds TLS certificate material of its own; authenticated sessions
/// simply ride the disguised channel, and mismatched ones are forwarded
/// byte-for-byte to `dest`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealitySecurityLayer;

#[async_trait]
impl SecurityLayer for RealitySecurityLayer {
    fn name(&self) -> &'static str {
        "reality"
    }

    async fn wrap_accepted(&self, conn: BoxConn, settings: &SecuritySettings) -> Result<BoxConn, CoreError> {
        let SecuritySettings::RealityServer(server_settings) = settings else {
            return Err(map_io_error(
                error::REALITY_HANDSHAKE,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "reality layer requires SecuritySettings::RealityServer"),
            ));
        };

        let peer = conn.peer_addr();
        let local = conn.local_addr();
        let mut conn = conn;
        let mut buf = vec![0u8; PEEK_BUDGET];
        let read = tokio::time::timeout(server_settings.challenge_window, conn.read(&mut buf))
            .await
            .map_err(|_| error::timeout_error(error::REALITY_HANDSHAKE))?
            .map_err(|e| map_io_error(error::REALITY_HANDSHAKE, e))?;
        buf.truncate(read);

        let authenticated = extract_session_id(&buf)
            .map(|short_id| server_settings.short_ids.iter().any(|sid| sid == &short_id))
            .unwrap_or(false);

        let peeked: BoxConn = Box::new(PeekedConn {
            prefix: buf,
            prefix_pos: 0,
            inner: conn,
        });

        if authenticated {
            return Ok(peeked);
        }

        forward_to_dest(peeked, &server_settings.dest).await?;
        Err(CoreError::new(
            FALLBACK_HANDLED,
            ErrorCategory::Cancelled,
            format!("reality: short-id mismatch, forwarded to {}", server_settings.dest),
        ))
    }

    async fn wrap_dial(&self, conn: BoxConn, settings: &SecuritySettings) -> Result<BoxConn, CoreError> {
        let SecuritySettings::RealityClient(client_settings) = settings else {
            return Err(map_io_error(
                error::REALITY_HANDSHAKE,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "reality layer requires SecuritySettings::RealityClient"),
            ));
        };
        let _ = client_settings;
        // The disguise lives entirely in the ClientHello the caller sends;
        // this layer does not alter bytes on the dial path.
        Ok(conn)
    }
}

/// Copies bytes bidirectionally between `conn` and a freshly dialed
/// connection to `dest`, until either side closes. `dest` is a
/// `host:port` string, the same shape `relay_protocol_direct::freedom`
/// accepts for a fixed upstream.
async fn forward_to_dest(mut conn: BoxConn, dest: &str) -> Result<(), CoreError> {
    let mut upstream = TcpStream::connect(dest).await.map_err(|e| map_io_error(error::DIAL, e))?;
    tokio::io::copy_bidirectional(&mut conn, &mut upstream)
        .await
        .map(|_| ())
        .or_else(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof || e.kind() == std::io::ErrorKind::ConnectionReset {
                Ok(())
            } else {
                Err(map_io_error(error::REALITY_HANDSHAKE, e))
            }
        })
}

/// Checks whether `settings.challenge_window` still covers `since`; used
/// by callers that want to reject stale cached short-id matches before
/// even attempting a handshake.
pub fn within_challenge_window(server_settings: &RealityServerSettings, since: MonotonicTimePoint) -> bool {
    MonotonicTimePoint::now().saturating_duration_since(since) <= server_settings.challenge_window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_hello_with_session_id(session_id: &[u8]) -> Vec<u8> {
        let mut msg = vec![TLS_HANDSHAKE_CONTENT_TYPE, 0x03, 0x03, 0x00, 0x00];
        msg.extend_from_slice(&[CLIENT_HELLO_HANDSHAKE_TYPE, 0x00, 0x00, 0x00]);
        msg.extend_from_slice(&[0x03, 0x03]);
        msg.extend_from_slice(&[0u8; 32]);
        msg.push(session_id.len() as u8);
        msg.extend_from_slice(session_id);
        msg
    }

    #[test]
    fn extracts_short_id_from_session_id_field() {
        let short_id = [1, 2, 3, 4, 5, 6, 7, 8];
        let hello = client_hello_with_session_id(&short_id);
        assert_eq!(extract_session_id(&hello), Some(short_id));
    }

    #[test]
    fn rejects_non_handshake_record() {
        let mut hello = client_hello_with_session_id(&[1, 2, 3, 4, 5, 6, 7, 8]);
        hello[0] = 0x17;
        assert_eq!(extract_session_id(&hello), None);
    }

    #[test]
    fn rejects_short_session_id() {
        let hello = client_hello_with_session_id(&[1, 2, 3]);
        assert_eq!(extract_session_id(&hello), None);
    }

    #[test]
    fn challenge_window_respects_duration() {
        let settings = RealityServerSettings {
            dest: "upstream:443".into(),
            server_names: vec!["example.com".into()],
            private_key: [0u8; 32],
            short_ids: vec![[1, 2, 3, 4, 5, 6, 7, 8]],
            challenge_window: Duration::from_secs(60),
        };
        assert!(within_challenge_window(&settings, MonotonicTimePoint::now()));
    }
}
