//! The pluggable stream-transport contract: `listen`/`dial`, named and
//! registered the way `relay-core`'s feature registry names everything
//! else. One trait every named transport (`raw-tcp`, `mkcp`, `websocket`,
//! `http/2`, `grpc`, `quic`) implements.

use async_trait::async_trait;
use relay_core::error::CoreError;
use relay_core::{Destination, Network};

use crate::addr::TransportSocketAddr;
use crate::conn::BoxConn;
use crate::settings::{GrpcSettings, MkcpSettings, QuicSettings, WebsocketSettings};

/// Settings passed to [`StreamTransport::listen`]/[`StreamTransport::dial`],
/// tagged by the transport that understands them. `RawTcp` carries none.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportSettings {
    RawTcp,
    Mkcp(MkcpSettings),
    Websocket(WebsocketSettings),
    Grpc(GrpcSettings),
    Quic(QuicSettings),
}

/// A bound listener. A caller drives its own accept loop against
/// `accept`, rather than handing the transport an `on_accept(conn)`
/// closure to hold alive across awaits.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn accept(&self) -> Result<(BoxConn, TransportSocketAddr), CoreError>;
    fn local_addr(&self) -> TransportSocketAddr;
}

/// One named, pluggable stream transport.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Networks this transport can serve; `raw-tcp` answers `{Tcp}`,
    /// a transport that also proxies datagrams answers `{Tcp, Udp}`.
    fn networks(&self) -> &'static [Network];

    async fn listen(
        &self,
        addr: TransportSocketAddr,
        settings: &TransportSettings,
    ) -> Result<Box<dyn Listener>, CoreError>;

    async fn dial(&self, destination: &Destination, settings: &TransportSettings) -> Result<BoxConn, CoreError>;
}
