//! `ProxySession`: a [`Session`] plus the dispatch-lifecycle state machine
//! that gates when routing, dialing and streaming may happen. The four
//! states mirror a B2BUA call's `Initializing -> Early -> Active ->
//! Terminated` shape, mapped onto this workspace's own
//! "accept -> route -> stream -> teardown" session lifecycle.

use relay_core::session::Session;

use crate::error;

/// Dispatch-lifecycle state. `Handshaking` covers inbound header decode
/// and routing; `Dispatched` covers the outbound dial and its own
/// protocol handshake; `Streaming` is the steady-state bidirectional
/// copy; `Closed` is terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ProxySessionState {
    Handshaking,
    Dispatched,
    Streaming,
    Closed,
}

impl ProxySessionState {
    pub fn can_transition_to(self, target: ProxySessionState) -> bool {
        use ProxySessionState::*;
        matches!(
            (self, target),
            (Handshaking, Handshaking)
                | (Handshaking, Dispatched)
                | (Handshaking, Closed)
                | (Dispatched, Dispatched)
                | (Dispatched, Streaming)
                | (Dispatched, Closed)
                | (Streaming, Streaming)
                | (Streaming, Closed)
                | (Closed, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProxySessionState::Closed)
    }

    fn label(self) -> &'static str {
        match self {
            ProxySessionState::Handshaking => "handshaking",
            ProxySessionState::Dispatched => "dispatched",
            ProxySessionState::Streaming => "streaming",
            ProxySessionState::Closed => "closed",
        }
    }
}

/// Owns the [`Session`] context plus the state machine gating dispatch.
pub struct ProxySession {
    session: Session,
    state: ProxySessionState,
}

impl ProxySession {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            state: ProxySessionState::Handshaking,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn state(&self) -> ProxySessionState {
        self.state
    }

    pub fn transition(&mut self, next: ProxySessionState) -> Result<(), relay_core::error::CoreError> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(error::invalid_state_transition(self.state.label(), next.label()));
        }
        self.state = next;
        Ok(())
    }

    /// Consumes the session, discarding the state machine, once the pipe
    /// has finished copying and the dispatcher is done with it.
    pub fn into_session(self) -> Session {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::address::{Address, Destination, Network};
    use relay_core::session::{InboundLeg, SpliceCopy};

    fn sample_session() -> Session {
        Session::new(InboundLeg {
            tag: "in".into(),
            source: Destination::new(Network::Tcp, Address::Ipv4(std::net::Ipv4Addr::LOCALHOST), 1).unwrap(),
            user: None,
            timer: None,
            can_splice_copy: SpliceCopy::Allow,
        })
    }

    #[test]
    fn happy_path_transitions_in_order() {
        let mut p = ProxySession::new(sample_session());
        assert_eq!(p.state(), ProxySessionState::Handshaking);
        p.transition(ProxySessionState::Dispatched).unwrap();
        p.transition(ProxySessionState::Streaming).unwrap();
        p.transition(ProxySessionState::Closed).unwrap();
        assert!(p.state().is_terminal());
    }

    #[test]
    fn skipping_dispatched_is_rejected() {
        let mut p = ProxySession::new(sample_session());
        assert!(p.transition(ProxySessionState::Streaming).is_err());
    }

    #[test]
    fn terminal_state_accepts_only_itself() {
        let mut p = ProxySession::new(sample_session());
        p.transition(ProxySessionState::Closed).unwrap();
        assert!(p.transition(ProxySessionState::Dispatched).is_err());
        assert!(p.transition(ProxySessionState::Closed).is_ok());
    }
}
