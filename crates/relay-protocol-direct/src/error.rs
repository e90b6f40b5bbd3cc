//! Phase constants for this crate's handlers, following the same
//! `io::Error -> CoreError` lift every crate in this workspace uses.

use relay_core::error::{codes, CoreError, ErrorCategory};

pub const DOKODEMO_ACCEPT: &str = "direct.dokodemo.accept";
pub const FREEDOM_DIAL: &str = "direct.freedom.dial";
pub const FREEDOM_RESOLVE: &str = "direct.freedom.resolve";
pub const BLACKHOLE_RESPONSE: &str = "direct.blackhole.response";

pub fn transparent_target_unsupported() -> CoreError {
    CoreError::new(
        codes::CONFIG_INVALID,
        ErrorCategory::Config,
        "dokodemo transparent target mode requires a platform-specific original-destination \
         lookup this build does not implement; configure a fixed target instead",
    )
}

pub fn resolution_failed(domain: &str) -> CoreError {
    CoreError::new(
        codes::TRANSPORT_DIAL_REFUSED,
        ErrorCategory::Network,
        format!("freedom outbound could not resolve `{domain}` to any address"),
    )
}
