//! Resolves an outbound handler for a session and hands it the decoded
//! [`Link`]. The bidirectional copy itself is each outbound handler's own
//! business (see [`crate::pipe`]); this module only answers "which
//! outbound, and is it even allowed to run right now".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::error::CoreError;
use relay_core::router::{RouteDecision, RoutingTable};
use relay_core::service::{Dispatch, Link, OutboundHandler};
use relay_core::session::{ActivityTimer, Session};

use crate::error;
use crate::router_engine;

/// No activity for this long with no explicit per-inbound override
/// disconnects the session; matches `PipeConfig`'s companion
/// `half_close_timeout` as the other half of the idle-cancellation pair.
const DEFAULT_CONNECTION_IDLE: Duration = Duration::from_secs(300);

/// Owns the routing table and the tag-keyed outbound registry. One
/// instance per running core; cheap to hand out as `Arc<dyn Dispatch>`
/// to every inbound handler.
pub struct Dispatcher {
    routing: RoutingTable,
    outbounds: HashMap<String, Arc<dyn OutboundHandler>>,
    default_tag: Option<String>,
    connection_idle: Duration,
}

impl Dispatcher {
    pub fn new(routing: RoutingTable) -> Self {
        Self {
            routing,
            outbounds: HashMap::new(),
            default_tag: None,
            connection_idle: DEFAULT_CONNECTION_IDLE,
        }
    }

    /// Overrides the idle timeout used for activity timers constructed at
    /// dispatch time for inbound legs that don't already carry one.
    pub fn set_connection_idle(&mut self, timeout: Duration) {
        self.connection_idle = timeout;
    }

    /// Registers an outbound under its own `tag()`. Registering a second
    /// handler under a tag already in use replaces the first ("last
    /// config wins" reload semantics).
    pub fn register_outbound(&mut self, handler: Arc<dyn OutboundHandler>) {
        self.outbounds.insert(handler.tag().to_string(), handler);
    }

    pub fn set_default_outbound(&mut self, tag: impl Into<String>) {
        self.default_tag = Some(tag.into());
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn set_routing_table(&mut self, routing: RoutingTable) {
        self.routing = routing;
    }

    /// An inbound handler may have already set an explicit outbound tag
    /// on the top `OutboundFrame` (e.g. from a per-inbound config
    /// override); that takes priority over routing-rule evaluation,
    /// which in turn takes priority over the configured default.
    async fn resolve_tag(&self, session: &Session) -> Result<String, CoreError> {
        if let Some(frame) = session.current_outbound() {
            if !frame.tag.is_empty() && self.outbounds.contains_key(&frame.tag) {
                return Ok(frame.tag.clone());
            }
        }
        match router_engine::evaluate(&self.routing, session).await {
            RouteDecision::Tag(tag) => Ok(tag),
            RouteDecision::NoMatch => self
                .default_tag
                .clone()
                .ok_or_else(|| error::no_route(&session.inbound().tag)),
        }
    }
}

#[async_trait]
impl Dispatch for Dispatcher {
    async fn dispatch_link(&self, session: &mut Session, link: Box<dyn Link>) -> Result<(), CoreError> {
        if session.cancel_scope().is_cancelled() {
            return Err(error::cancelled());
        }
        if session.inbound().timer.is_none() {
            let timer = Arc::new(ActivityTimer::new(self.connection_idle, session.cancel_scope().clone()));
            session.inbound_mut().timer = Some(timer);
        }
        let tag = self.resolve_tag(session).await?;
        let handler = self
            .outbounds
            .get(&tag)
            .cloned()
            .ok_or_else(|| error::unknown_outbound_tag(&tag))?;
        tracing::info!(session_id = session.id(), outbound = %tag, "dispatching session");
        handler.process(session, link).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::address::{Address, Destination, Network};
    use relay_core::registry::Feature;
    use relay_core::router::{DomainMatch, Matcher, Predicate, RoutingRule};
    use relay_core::session::{InboundLeg, OutboundFrame, SpliceCopy};
    use std::any::Any;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingOutbound {
        tag: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl Feature for RecordingOutbound {
        fn type_key(&self) -> &'static str {
            "test.recording_outbound"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[async_trait]
    impl relay_core::service::Handler for RecordingOutbound {
        fn tag(&self) -> &str {
            self.tag
        }
    }

    #[async_trait]
    impl OutboundHandler for RecordingOutbound {
        async fn process(&self, _session: &mut Session, _link: Box<dyn Link>) -> Result<(), CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NullLink;

    #[async_trait]
    impl Link for NullLink {
        async fn read_multi_buffer(&mut self) -> Result<relay_core::buffer::MultiBuffer, CoreError> {
            Ok(relay_core::buffer::MultiBuffer::new())
        }
        async fn write_multi_buffer(&mut self, _mb: relay_core::buffer::MultiBuffer) -> Result<(), CoreError> {
            Ok(())
        }
        fn interrupt(&mut self) {}
    }

    fn session_targeting(domain: &str, explicit_tag: &str) -> Session {
        let mut session = Session::new(InboundLeg {
            tag: "in".into(),
            source: Destination::new(Network::Tcp, Address::Ipv4(Ipv4Addr::LOCALHOST), 1).unwrap(),
            user: None,
            timer: None,
            can_splice_copy: SpliceCopy::Allow,
        });
        session.push_outbound(OutboundFrame {
            tag: explicit_tag.into(),
            target: Destination::new(Network::Tcp, Address::domain(domain).unwrap(), 443).unwrap(),
            original_target: None,
            gateway: None,
            name: "pending".into(),
            can_splice_copy: SpliceCopy::Allow,
        });
        session
    }

    #[tokio::test]
    async fn routes_by_domain_when_no_explicit_tag() {
        let mut routing = RoutingTable::default();
        routing.push(RoutingRule {
            matcher: Matcher::new(vec![Predicate::Domain(DomainMatch::Suffix("example.com".into()))]),
            target_tag: "blocked".into(),
        });
        let mut dispatcher = Dispatcher::new(routing);
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register_outbound(Arc::new(RecordingOutbound {
            tag: "blocked",
            calls: Arc::clone(&calls),
        }));

        let mut session = session_targeting("api.example.com", "");
        dispatcher
            .dispatch_link(&mut session, Box::new(NullLink))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn explicit_tag_skips_routing() {
        let mut dispatcher = Dispatcher::new(RoutingTable::default());
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register_outbound(Arc::new(RecordingOutbound {
            tag: "direct",
            calls: Arc::clone(&calls),
        }));

        let mut session = session_targeting("anything.test", "direct");
        dispatcher
            .dispatch_link(&mut session, Box::new(NullLink))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_match_without_default_is_an_error() {
        let dispatcher = Dispatcher::new(RoutingTable::default());
        let mut session = session_targeting("anything.test", "");
        let err = dispatcher
            .dispatch_link(&mut session, Box::new(NullLink))
            .await
            .unwrap_err();
        assert_eq!(err.code(), relay_core::error::codes::ROUTER_NO_MATCH);
    }

    #[tokio::test]
    async fn cancelled_session_fails_before_resolving() {
        let dispatcher = Dispatcher::new(RoutingTable::default());
        let mut session = session_targeting("anything.test", "");
        session.cancel_scope().cancel();
        let err = dispatcher
            .dispatch_link(&mut session, Box::new(NullLink))
            .await
            .unwrap_err();
        assert_eq!(err.category(), &relay_core::error::ErrorCategory::Cancelled);
    }

    #[tokio::test]
    async fn dispatch_link_installs_an_activity_timer_when_none_is_set() {
        let mut dispatcher = Dispatcher::new(RoutingTable::default());
        dispatcher.register_outbound(Arc::new(RecordingOutbound {
            tag: "direct",
            calls: Arc::new(AtomicUsize::new(0)),
        }));

        let mut session = session_targeting("anything.test", "direct");
        assert!(session.inbound().timer.is_none());

        dispatcher
            .dispatch_link(&mut session, Box::new(NullLink))
            .await
            .unwrap();

        assert!(session.inbound().timer.is_some());
    }

    #[tokio::test]
    async fn dispatch_link_does_not_replace_an_existing_timer() {
        let mut dispatcher = Dispatcher::new(RoutingTable::default());
        dispatcher.register_outbound(Arc::new(RecordingOutbound {
            tag: "direct",
            calls: Arc::new(AtomicUsize::new(0)),
        }));

        let mut session = session_targeting("anything.test", "direct");
        let timer = Arc::new(relay_core::session::ActivityTimer::new(
            std::time::Duration::from_secs(1),
            session.cancel_scope().clone(),
        ));
        session.inbound_mut().timer = Some(Arc::clone(&timer));

        dispatcher
            .dispatch_link(&mut session, Box::new(NullLink))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(session.inbound().timer.as_ref().unwrap(), &timer));
    }
}
