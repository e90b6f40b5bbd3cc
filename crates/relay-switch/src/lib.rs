#![deny(unsafe_code)]
//! relay-switch: C6, the routing evaluator, the backpressured pipe, and
//! the dispatcher that ties an inbound handler's decoded [`Link`] to the
//! outbound it resolves to.

pub mod dispatcher;
pub mod error;
pub mod pipe;
pub mod router_engine;
pub mod session_state;

pub use dispatcher::Dispatcher;
pub use pipe::{PipeConfig, can_use_splice_copy};
pub use session_state::{ProxySession, ProxySessionState};
