//! The `Handler`/`Link` contract proxy handlers run against, plus a small
//! Tower-style readiness signal.
//!
//! Handlers are stored as `Arc<dyn InboundHandler>` / `Arc<dyn
//! OutboundHandler>` in the registry, so only the object-safe half of a
//! typed/object service split is needed here; `async_trait` supplies the
//! object safety that would otherwise need hand-written `BoxFuture`
//! plumbing.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::address::Network;
use crate::buffer::MultiBuffer;
use crate::error::CoreError;
use crate::registry::Feature;
use crate::session::Session;

/// Backpressure/liveness signal a handler or pipe side can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    Ready,
    Busy,
    ShutdownPending,
    ShutdownEnforced,
}

/// Bidirectional, `MultiBuffer`-oriented byte-stream pair a handler reads
/// requests from and writes responses to. The reader side returns an
/// empty `MultiBuffer` on EOF rather than an error; the writer blocks
/// under backpressure per the owning pipe's capacity.
#[async_trait]
pub trait Link: Send {
    async fn read_multi_buffer(&mut self) -> Result<MultiBuffer, CoreError>;
    async fn write_multi_buffer(&mut self, mb: MultiBuffer) -> Result<(), CoreError>;

    /// Fails the other side's next operation immediately and releases any
    /// buffers still queued on this side.
    fn interrupt(&mut self);
}

/// A named, long-lived proxy handler: a [`Feature`] with a `process`
/// entry point invoked once per session.
#[async_trait]
pub trait Handler: Feature {
    fn tag(&self) -> &str;
}

/// Inbound side of a proxy handler pair: decodes a client's wire protocol
/// and bridges into the dispatcher. `process` implementations follow the
/// same five steps: read the handshake, authenticate, respond, push the
/// resolved target onto the session, and hand the streaming link to the
/// dispatcher.
#[async_trait]
pub trait InboundHandler: Handler {
    /// Stream transports this handler can be bound to, e.g. `{Tcp}` for a
    /// pure-TCP protocol or `{Tcp, Udp}` for one that also proxies
    /// datagrams.
    fn networks(&self) -> HashSet<Network>;

    async fn process(
        &self,
        session: &mut Session,
        conn: Box<dyn Link>,
        dispatcher: &dyn Dispatch,
    ) -> Result<(), CoreError>;
}

/// Outbound side: dials the session's current target and negotiates the
/// wire protocol on top of it, then runs the bidirectional copy under the
/// session's activity timer.
#[async_trait]
pub trait OutboundHandler: Handler {
    async fn process(&self, session: &mut Session, link: Box<dyn Link>) -> Result<(), CoreError>;
}

/// What an inbound handler calls once it has a populated session and a
/// decoded [`Link`]; implemented by the dispatcher in `relay-switch`.
/// Kept here, alongside `Handler`, so `relay-protocol-*` crates depend
/// only on `relay-core` and never on `relay-switch` directly.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch_link(&self, session: &mut Session, link: Box<dyn Link>) -> Result<(), CoreError>;
}
