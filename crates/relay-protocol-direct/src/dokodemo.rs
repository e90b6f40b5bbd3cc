//! Dokodemo inbound: a header-less inbound that hands its raw connection
//! straight to the dispatcher as a [`Link`], with no wire protocol of its
//! own to decode. The only per-connection decision is what target
//! destination to populate the session with.

use std::any::Any;
use std::collections::HashSet;

use async_trait::async_trait;
use relay_core::address::{Destination, Network};
use relay_core::error::CoreError;
use relay_core::registry::Feature;
use relay_core::service::{Dispatch, Handler, InboundHandler, Link};
use relay_core::session::{OutboundFrame, Session, SpliceCopy};

use crate::error;

/// Where Dokodemo gets the destination to dial.
#[derive(Clone, Debug)]
pub enum DokodemoTarget {
    /// Every connection accepted on this inbound dials the same place.
    Fixed(Destination),
    /// Recovers the pre-redirection destination from the kernel (e.g.
    /// `SO_ORIGINAL_DST` on Linux `iptables REDIRECT`/TPROXY setups).
    /// Not implemented in this build: it requires a raw-socket-option
    /// call this crate's `#![deny(unsafe_code)]` posture rules out; use
    /// `Fixed` or front this inbound with a platform helper that already
    /// did the lookup.
    Transparent,
}

pub struct DokodemoInbound {
    tag: String,
    target: DokodemoTarget,
}

impl DokodemoInbound {
    pub fn new(tag: impl Into<String>, target: DokodemoTarget) -> Self {
        Self {
            tag: tag.into(),
            target,
        }
    }

    fn resolve_target(&self) -> Result<Destination, CoreError> {
        match &self.target {
            DokodemoTarget::Fixed(dest) => Ok(dest.clone()),
            DokodemoTarget::Transparent => Err(error::transparent_target_unsupported()),
        }
    }
}

impl Feature for DokodemoInbound {
    fn type_key(&self) -> &'static str {
        "relay.protocol_direct.dokodemo"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Handler for DokodemoInbound {
    fn tag(&self) -> &str {
        &self.tag
    }
}

#[async_trait]
impl InboundHandler for DokodemoInbound {
    fn networks(&self) -> HashSet<Network> {
        HashSet::from([Network::Tcp])
    }

    async fn process(
        &self,
        session: &mut Session,
        link: Box<dyn Link>,
        dispatcher: &dyn Dispatch,
    ) -> Result<(), CoreError> {
        let target = self.resolve_target().map_err(|e| {
            CoreError::wrap(
                relay_core::error::codes::CONFIG_INVALID,
                relay_core::error::ErrorCategory::Config,
                error::DOKODEMO_ACCEPT,
                e,
            )
        })?;

        session.push_outbound(OutboundFrame {
            tag: String::new(),
            target,
            original_target: None,
            gateway: None,
            name: "dokodemo".into(),
            can_splice_copy: SpliceCopy::Allow,
        });

        dispatcher.dispatch_link(session, link).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::address::{Address, Network as CoreNetwork};
    use relay_core::buffer::MultiBuffer;
    use relay_core::session::InboundLeg;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NullLink;

    #[async_trait]
    impl Link for NullLink {
        async fn read_multi_buffer(&mut self) -> Result<MultiBuffer, CoreError> {
            Ok(MultiBuffer::new())
        }
        async fn write_multi_buffer(&mut self, _mb: MultiBuffer) -> Result<(), CoreError> {
            Ok(())
        }
        fn interrupt(&mut self) {}
    }

    struct RecordingDispatch {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Dispatch for RecordingDispatch {
        async fn dispatch_link(&self, session: &mut Session, _link: Box<dyn Link>) -> Result<(), CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(session.current_outbound().unwrap().target.port(), 20002);
            Ok(())
        }
    }

    fn sample_session() -> Session {
        Session::new(InboundLeg {
            tag: "dokodemo-in".into(),
            source: Destination::new(CoreNetwork::Tcp, Address::Ipv4(Ipv4Addr::LOCALHOST), 1).unwrap(),
            user: None,
            timer: None,
            can_splice_copy: SpliceCopy::Allow,
        })
    }

    #[tokio::test]
    async fn fixed_target_populates_outbound_and_dispatches() {
        let target = Destination::new(CoreNetwork::Tcp, Address::Ipv4(Ipv4Addr::LOCALHOST), 20002).unwrap();
        let inbound = DokodemoInbound::new("dokodemo", DokodemoTarget::Fixed(target));
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = RecordingDispatch { calls: Arc::clone(&calls) };
        let mut session = sample_session();

        inbound.process(&mut session, Box::new(NullLink), &dispatcher).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transparent_target_is_a_config_error() {
        let inbound = DokodemoInbound::new("dokodemo", DokodemoTarget::Transparent);
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = RecordingDispatch { calls };
        let mut session = sample_session();

        let err = inbound
            .process(&mut session, Box::new(NullLink), &dispatcher)
            .await
            .unwrap_err();
        assert_eq!(err.category(), &relay_core::error::ErrorCategory::Config);
    }
}
