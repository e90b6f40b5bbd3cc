//! Phase constants and stable codes for dispatch-layer failures, following
//! the same `io::Error -> CoreError` lift shape every crate in this
//! workspace uses, adapted here for the dispatcher's own failure modes
//! (no-match routing, invalid session-state transitions, unknown tags)
//! rather than I/O.

use relay_core::error::{codes, CoreError, ErrorCategory};
use relay_core::session::SpliceCopy;

pub const DISPATCH: &str = "switch.dispatch";
pub const PIPE_COPY: &str = "switch.pipe_copy";

pub fn no_route(session_tag: &str) -> CoreError {
    CoreError::new(
        codes::ROUTER_NO_MATCH,
        ErrorCategory::Protocol,
        format!("no routing rule matched session on inbound `{session_tag}`"),
    )
}

pub fn unknown_outbound_tag(tag: &str) -> CoreError {
    CoreError::new(
        codes::ROUTER_NO_MATCH,
        ErrorCategory::Protocol,
        format!("routing rule selected unknown outbound tag `{tag}`"),
    )
}

pub fn invalid_state_transition(from: &'static str, to: &'static str) -> CoreError {
    CoreError::new(
        "switch.invalid_state_transition",
        ErrorCategory::Internal,
        format!("proxy session cannot transition {from} -> {to}"),
    )
}

pub fn cancelled() -> CoreError {
    CoreError::new(codes::DISPATCH_CANCELLED, ErrorCategory::Cancelled, "pipe cancelled")
}

/// `can_splice_copy` is a conjunction across both legs; `Forbid` on either
/// side disables zero-copy regardless of the other leg's preference.
pub fn splice_copy_allowed(inbound: SpliceCopy, outbound: SpliceCopy) -> bool {
    !matches!(inbound, SpliceCopy::Forbid) && !matches!(outbound, SpliceCopy::Forbid)
}
