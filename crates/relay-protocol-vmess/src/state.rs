//! The VMess handshake state machine: each side walks
//! `RequestHeaderPending -> RequestHeaderSent -> ResponseHeaderPending ->
//! Streaming -> Closed` as it sends/receives the two header messages and
//! then settles into framed streaming. Shares the same transition-matrix
//! shape as `relay_switch::session_state::ProxySessionState`.

use relay_core::error::{codes, CoreError, ErrorCategory};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VmessState {
    RequestHeaderPending,
    RequestHeaderSent,
    ResponseHeaderPending,
    Streaming,
    Closed,
}

impl VmessState {
    pub fn can_transition_to(self, target: VmessState) -> bool {
        use VmessState::*;
        matches!(
            (self, target),
            (RequestHeaderPending, RequestHeaderPending)
                | (RequestHeaderPending, RequestHeaderSent)
                | (RequestHeaderPending, Closed)
                | (RequestHeaderSent, RequestHeaderSent)
                | (RequestHeaderSent, ResponseHeaderPending)
                | (RequestHeaderSent, Closed)
                | (ResponseHeaderPending, ResponseHeaderPending)
                | (ResponseHeaderPending, Streaming)
                | (ResponseHeaderPending, Closed)
                | (Streaming, Streaming)
                | (Streaming, Closed)
                | (Closed, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, VmessState::Closed)
    }

    fn label(self) -> &'static str {
        match self {
            VmessState::RequestHeaderPending => "request_header_pending",
            VmessState::RequestHeaderSent => "request_header_sent",
            VmessState::ResponseHeaderPending => "response_header_pending",
            VmessState::Streaming => "streaming",
            VmessState::Closed => "closed",
        }
    }
}

/// Tracks the current state for one side of one connection; `transition`
/// rejects any jump `can_transition_to` does not allow.
#[derive(Debug)]
pub struct VmessStateMachine {
    state: VmessState,
}

impl VmessStateMachine {
    pub fn new() -> Self {
        Self {
            state: VmessState::RequestHeaderPending,
        }
    }

    pub fn state(&self) -> VmessState {
        self.state
    }

    pub fn transition(&mut self, next: VmessState) -> Result<(), CoreError> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(CoreError::new(
                codes::PROTOCOL_DECODE,
                ErrorCategory::Internal,
                format!("invalid vmess state transition {} -> {}", self.state.label(), next.label()),
            ));
        }
        self.state = next;
        Ok(())
    }
}

impl Default for VmessStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
