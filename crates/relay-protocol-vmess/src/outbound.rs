//! VMess outbound: dials the configured upstream server through a
//! pluggable [`StreamTransport`]/[`SecurityLayer`] pair, performs the
//! client-side handshake (send request header, read response header),
//! then bridges the session's [`Link`] to the now-framed [`VmessConn`]
//! with [`relay_switch::pipe::run`].
//!
//! Grounded in `relay_protocol_direct::freedom::FreedomOutbound`'s
//! dial/retry/pipe shape; the handshake steps replace Freedom's plain
//! passthrough dial.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::address::Destination;
use relay_core::error::CoreError;
use relay_core::observability::OpsEventBus;
use relay_core::registry::Feature;
use relay_core::service::{Handler, Link, OutboundHandler};
use relay_core::session::{AccountVariant, Session};
use relay_switch::pipe::{self, PipeConfig};
use relay_transport::backoff::{dial_with_retry, DialRetryPolicy};
use relay_transport::conn::BoxConn;
use relay_transport::security::{SecurityLayer, SecuritySettings};
use relay_transport::stream_transport::{StreamTransport, TransportSettings};

use crate::crypto;
use crate::error;
use crate::framing::{DirectionKeys, VmessConn};
use crate::header::{RequestHeader, ResponseHeader};

pub struct VmessOutboundConfig {
    pub server: Destination,
    pub transport_settings: TransportSettings,
    pub security_settings: SecuritySettings,
    pub dial_retry: DialRetryPolicy,
    pub pipe: PipeConfig,
}

impl VmessOutboundConfig {
    pub fn new(server: Destination) -> Self {
        Self {
            server,
            transport_settings: TransportSettings::RawTcp,
            security_settings: SecuritySettings::None,
            dial_retry: DialRetryPolicy::default(),
            pipe: PipeConfig::default(),
        }
    }
}

pub struct VmessOutbound {
    tag: String,
    transport: Arc<dyn StreamTransport>,
    security: Arc<dyn SecurityLayer>,
    config: VmessOutboundConfig,
    pool: Arc<relay_core::buffer::BufferPool>,
    ops_bus: Option<Arc<dyn OpsEventBus>>,
}

impl VmessOutbound {
    pub fn new(
        tag: impl Into<String>,
        transport: Arc<dyn StreamTransport>,
        security: Arc<dyn SecurityLayer>,
        config: VmessOutboundConfig,
        pool: Arc<relay_core::buffer::BufferPool>,
        ops_bus: Option<Arc<dyn OpsEventBus>>,
    ) -> Self {
        Self {
            tag: tag.into(),
            transport,
            security,
            config,
            pool,
            ops_bus,
        }
    }

    async fn dial(&self) -> Result<BoxConn, CoreError> {
        let label = self.config.server.to_string();
        let transport = Arc::clone(&self.transport);
        let security = Arc::clone(&self.security);
        let server = self.config.server.clone();
        let transport_settings = self.config.transport_settings.clone();
        let security_settings = self.config.security_settings.clone();
        let ops_bus = self.ops_bus.clone();
        dial_with_retry(&label, self.config.dial_retry, ops_bus.as_deref(), || {
            let transport = Arc::clone(&transport);
            let security = Arc::clone(&security);
            let server = server.clone();
            let transport_settings = transport_settings.clone();
            let security_settings = security_settings.clone();
            async move {
                let conn = transport.dial(&server, &transport_settings).await.map_err(|e| {
                    CoreError::wrap(
                        relay_core::error::codes::TRANSPORT_DIAL_REFUSED,
                        relay_core::error::ErrorCategory::Network,
                        error::OUTBOUND_DIAL,
                        e,
                    )
                })?;
                security.wrap_dial(conn, &security_settings).await
            }
        })
        .await
    }

    /// Sends the encoded request header and reads back the response
    /// header, verifying its nonce echo, before any streaming begins.
    async fn handshake(&self, conn: &mut BoxConn, request: &RequestHeader) -> Result<(), CoreError> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let wire = request.encode()?;
        conn.write_all(&wire)
            .await
            .map_err(|e| CoreError::wrap(relay_core::error::codes::TRANSPORT_IO, relay_core::error::ErrorCategory::Network, error::OUTBOUND_DIAL, e))?;

        let response_key = crypto::derive_response_key(&request.key);
        let response_iv = crypto::derive_response_iv(&request.iv);

        let mut len_buf = [0u8; 2];
        conn.read_exact(&mut len_buf)
            .await
            .map_err(|_| error::truncated_header())?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut ciphertext = vec![0u8; len];
        conn.read_exact(&mut ciphertext).await.map_err(|_| error::truncated_header())?;

        let response = ResponseHeader::decode(&ciphertext, &response_key, &response_iv)?;
        if response.nonce_echo[..] != wire[16..20] {
            return Err(error::checksum_mismatch());
        }
        Ok(())
    }
}

impl Feature for VmessOutbound {
    fn type_key(&self) -> &'static str {
        "relay.protocol_vmess.outbound"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Handler for VmessOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }
}

#[async_trait]
impl OutboundHandler for VmessOutbound {
    async fn process(&self, session: &mut Session, link: Box<dyn Link>) -> Result<(), CoreError> {
        let frame = session.current_outbound().ok_or_else(error::no_outbound_frame)?.clone();

        let account_id = match session.inbound().user.as_ref().map(|u| u.account()) {
            Some(AccountVariant::Vmess { id }) => *id,
            _ => return Err(error::non_vmess_account()),
        };

        let request = RequestHeader::new(account_id, frame.target.clone());
        let mut conn = self.dial().await?;
        self.handshake(&mut conn, &request).await?;
        tracing::debug!(session_id = session.id(), server = %self.config.server, target = %frame.target, "vmess handshake complete");

        let write_keys = DirectionKeys { key: request.key, iv: request.iv };
        let response_key = crypto::derive_response_key(&request.key);
        let response_iv = crypto::derive_response_iv(&request.iv);
        let read_keys = DirectionKeys { key: response_key, iv: response_iv };

        let framed: BoxConn = Box::new(VmessConn::new(conn, write_keys, read_keys));

        let timer = session.inbound().timer.clone();
        let cancel = session.cancel_scope().clone();
        pipe::run(link, framed, timer, Arc::clone(&self.pool), self.config.pipe, cancel).await
    }
}
