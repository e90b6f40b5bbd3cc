//! Maps `std::io::Error` into `relay_core::CoreError`, tagging the phase
//! that failed with a fixed set of phase constants.

use relay_core::error::{codes, CoreError, ErrorCategory};

pub const BIND: &str = "tcp.bind";
pub const ACCEPT: &str = "tcp.accept";
pub const DIAL: &str = "tcp.dial";
pub const READ: &str = "tcp.read";
pub const WRITE: &str = "tcp.write";
pub const SHUTDOWN: &str = "tcp.shutdown";
pub const TLS_HANDSHAKE: &str = "tls.handshake";
pub const REALITY_HANDSHAKE: &str = "reality.handshake";

pub fn map_io_error(phase: &'static str, err: std::io::Error) -> CoreError {
    CoreError::wrap(codes::TRANSPORT_IO, ErrorCategory::Network, phase, err)
}

pub fn timeout_error(phase: &'static str) -> CoreError {
    CoreError::new(codes::TRANSPORT_TIMEOUT, ErrorCategory::Network, format!("{phase}: deadline exceeded"))
}

pub fn cancelled_error(phase: &'static str) -> CoreError {
    CoreError::new(codes::DISPATCH_CANCELLED, ErrorCategory::Cancelled, format!("{phase}: cancelled"))
}
