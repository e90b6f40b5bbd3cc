use relay_core::error::{codes, CoreError, ErrorCategory};

pub const INBOUND_ACCEPT: &str = "vmess.inbound.accept";
pub const OUTBOUND_DIAL: &str = "vmess.outbound.dial";
pub const HEADER_DECODE: &str = "vmess.header.decode";
pub const HEADER_ENCODE: &str = "vmess.header.encode";
pub const FRAME_DECODE: &str = "vmess.frame.decode";

pub fn unknown_user() -> CoreError {
    CoreError::new(codes::PROTOCOL_AUTH, ErrorCategory::Protocol, "request header user id matched no configured user")
}

pub fn timestamp_out_of_window(timestamp: u64, now: u64, window_secs: u64) -> CoreError {
    CoreError::new(
        codes::PROTOCOL_AUTH,
        ErrorCategory::Protocol,
        format!("request timestamp {timestamp} is outside the ±{window_secs}s window around {now}"),
    )
}

pub fn replayed_request() -> CoreError {
    CoreError::new(codes::PROTOCOL_REPLAY, ErrorCategory::Protocol, "request header replays a (user, timestamp) pair already seen")
}

pub fn checksum_mismatch() -> CoreError {
    CoreError::new(codes::PROTOCOL_DECODE, ErrorCategory::Protocol, "decoded header checksum does not match its fields")
}

pub fn truncated_header() -> CoreError {
    CoreError::new(codes::PROTOCOL_DECODE, ErrorCategory::Protocol, "connection closed before a complete header was read")
}

pub fn unsupported_address_type(tag: u8) -> CoreError {
    CoreError::new(codes::PROTOCOL_DECODE, ErrorCategory::Protocol, format!("unsupported address type tag {tag}"))
}

pub fn invalid_security_suite(tag: u8) -> CoreError {
    CoreError::new(codes::PROTOCOL_DECODE, ErrorCategory::Protocol, format!("unsupported security suite tag {tag}"))
}

pub fn no_outbound_frame() -> CoreError {
    CoreError::new(codes::CONFIG_INVALID, ErrorCategory::Config, "vmess outbound invoked with no outbound frame on the session")
}

pub fn non_vmess_account() -> CoreError {
    CoreError::new(codes::CONFIG_INVALID, ErrorCategory::Config, "vmess outbound requires a session user with a Vmess account")
}
