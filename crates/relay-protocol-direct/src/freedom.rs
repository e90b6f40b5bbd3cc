//! Freedom outbound: dials the session's current target through a
//! pluggable [`StreamTransport`]/[`SecurityLayer`] pair, optionally
//! rewrites the target to a resolved IP first, optionally fragments the
//! first few writes and injects a one-shot UDP noise payload, then
//! bridges the dialed connection to the handler's [`Link`] with
//! [`relay_switch::pipe::run`].
//!
//! The dial/retry/pipe plumbing is built on this workspace's own
//! [`relay_transport::backoff`] and [`relay_switch::pipe`], structured as
//! a long-lived `Handler`/`Feature` service like every other outbound.

use std::any::Any;
use std::net::IpAddr;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use relay_core::address::{Address, Destination, Network};
use relay_core::buffer::BufferPool;
use relay_core::error::CoreError;
use relay_core::observability::OpsEventBus;
use relay_core::registry::Feature;
use relay_core::service::{Handler, Link, OutboundHandler};
use relay_transport::backoff::{dial_with_retry, DialRetryPolicy};
use relay_transport::conn::BoxConn;
use relay_transport::security::{SecurityLayer, SecuritySettings};
use relay_transport::stream_transport::{StreamTransport, TransportSettings};
use relay_switch::pipe::{self, PipeConfig};

use crate::error;
use crate::fragment::{FragmentSettings, FragmentingConn};

/// Whether Freedom resolves a domain target to an IP address before
/// dialing. Distinct from [`relay_core::router::DomainStrategy`], which
/// governs whether the *routing table* re-evaluates against a resolved
/// IP; this one only affects what address Freedom hands the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FreedomDomainStrategy {
    /// Dial the domain name as-is; let the transport's own resolver (or
    /// an upstream proxy) handle it.
    #[default]
    AsIs,
    /// Resolve to an IP first, preferring the configured family, but
    /// keep dialing the domain if resolution fails.
    UseIp,
    /// Resolve to an IP first; resolution failure is a dial error.
    ForceIp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IpPreference {
    #[default]
    Ipv4First,
    Ipv6First,
}

/// One-shot noise written to a freshly dialed UDP-network target before
/// the real traffic. This workspace has no datagram transport
/// abstraction, so this is a best-effort single write rather than true
/// per-datagram injection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdpNoise {
    pub payload: Vec<u8>,
}

pub struct FreedomConfig {
    pub transport_settings: TransportSettings,
    pub security_settings: SecuritySettings,
    pub domain_strategy: FreedomDomainStrategy,
    pub ip_preference: IpPreference,
    pub dial_retry: DialRetryPolicy,
    pub fragment: Option<FragmentSettings>,
    pub udp_noise: Option<UdpNoise>,
    pub pipe: PipeConfig,
}

impl Default for FreedomConfig {
    fn default() -> Self {
        Self {
            transport_settings: TransportSettings::RawTcp,
            security_settings: SecuritySettings::None,
            domain_strategy: FreedomDomainStrategy::default(),
            ip_preference: IpPreference::default(),
            dial_retry: DialRetryPolicy::default(),
            fragment: None,
            udp_noise: None,
            pipe: PipeConfig::default(),
        }
    }
}

pub struct FreedomOutbound {
    tag: String,
    transport: Arc<dyn StreamTransport>,
    security: Arc<dyn SecurityLayer>,
    config: FreedomConfig,
    pool: Arc<BufferPool>,
    ops_bus: Option<Arc<dyn OpsEventBus>>,
}

impl FreedomOutbound {
    pub fn new(
        tag: impl Into<String>,
        transport: Arc<dyn StreamTransport>,
        security: Arc<dyn SecurityLayer>,
        config: FreedomConfig,
        pool: Arc<BufferPool>,
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

    async fn resolve_target(&self, target: &Destination) -> Result<Destination, CoreError> {
        let domain = match target.address() {
            Address::Domain(d) => d.clone(),
            _ => return Ok(target.clone()),
        };
        match self.config.domain_strategy {
            FreedomDomainStrategy::AsIs => Ok(target.clone()),
            FreedomDomainStrategy::UseIp => match resolve_preferred(&domain, target.port(), self.config.ip_preference).await {
                Ok(ip) => Destination::new(target.network(), ip_to_address(ip), target.port())
                    .map_err(|_| error::resolution_failed(&domain)),
                Err(_) => Ok(target.clone()),
            },
            FreedomDomainStrategy::ForceIp => {
                let ip = resolve_preferred(&domain, target.port(), self.config.ip_preference).await?;
                Destination::new(target.network(), ip_to_address(ip), target.port()).map_err(|_| error::resolution_failed(&domain))
            }
        }
    }

    async fn dial(&self, target: &Destination) -> Result<BoxConn, CoreError> {
        let label = target.to_string();
        let transport = Arc::clone(&self.transport);
        let security = Arc::clone(&self.security);
        let transport_settings = self.config.transport_settings.clone();
        let security_settings = self.config.security_settings.clone();
        let ops_bus = self.ops_bus.clone();
        dial_with_retry(&label, self.config.dial_retry, ops_bus.as_deref(), || {
            let transport = Arc::clone(&transport);
            let security = Arc::clone(&security);
            let transport_settings = transport_settings.clone();
            let security_settings = security_settings.clone();
            let target = target.clone();
            async move {
                let conn = transport.dial(&target, &transport_settings).await.map_err(|e| {
                    CoreError::wrap(
                        relay_core::error::codes::TRANSPORT_DIAL_REFUSED,
                        relay_core::error::ErrorCategory::Network,
                        error::FREEDOM_DIAL,
                        e,
                    )
                })?;
                security.wrap_dial(conn, &security_settings).await
            }
        })
        .await
    }
}

fn ip_to_address(ip: IpAddr) -> Address {
    match ip {
        IpAddr::V4(v4) => Address::Ipv4(v4),
        IpAddr::V6(v6) => Address::Ipv6(v6),
    }
}

async fn resolve_preferred(domain: &str, port: u16, preference: IpPreference) -> Result<IpAddr, CoreError> {
    let host = format!("{domain}:{port}");
    let addrs: Vec<IpAddr> = tokio::net::lookup_host(host)
        .await
        .map_err(|_| error::resolution_failed(domain))?
        .map(|s| s.ip())
        .collect();
    if addrs.is_empty() {
        return Err(error::resolution_failed(domain));
    }
    let wants_v4 = matches!(preference, IpPreference::Ipv4First);
    addrs
        .iter()
        .find(|a| a.is_ipv4() == wants_v4)
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| error::resolution_failed(domain))
}

fn sample_noise(payload: &[u8], len_range: Option<Range<usize>>) -> Vec<u8> {
    match len_range {
        None => payload.to_vec(),
        Some(range) if !range.is_empty() => {
            let mut rng = rand::thread_rng();
            let want = rng.gen_range(range).min(payload.len().max(1));
            payload[..want.min(payload.len())].to_vec()
        }
        Some(_) => payload.to_vec(),
    }
}

impl Feature for FreedomOutbound {
    fn type_key(&self) -> &'static str {
        "relay.protocol_direct.freedom"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Handler for FreedomOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }
}

#[async_trait]
impl OutboundHandler for FreedomOutbound {
    async fn process(&self, session: &mut relay_core::session::Session, link: Box<dyn Link>) -> Result<(), CoreError> {
        let frame = session
            .current_outbound()
            .ok_or_else(|| {
                CoreError::new(
                    relay_core::error::codes::CONFIG_INVALID,
                    relay_core::error::ErrorCategory::Config,
                    "freedom invoked with no outbound frame on the session",
                )
            })?
            .clone();

        let target = self.resolve_target(&frame.target).await?;
        let mut conn = self.dial(&target).await?;

        if let Some(noise) = &self.config.udp_noise {
            if target.network() == Network::Udp {
                let payload = sample_noise(&noise.payload, None);
                use tokio::io::AsyncWriteExt;
                let _ = conn.write_all(&payload).await;
            }
        }

        let conn: BoxConn = if let Some(settings) = &self.config.fragment {
            Box::new(FragmentingConn::new(conn, settings))
        } else {
            conn
        };

        let timer = session.inbound().timer.clone();
        let cancel = session.cancel_scope().clone();

        pipe::run(link, conn, timer, Arc::clone(&self.pool), self.config.pipe, cancel).await
    }
}
