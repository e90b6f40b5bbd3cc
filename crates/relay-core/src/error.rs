//! Stable error taxonomy shared by every layer of the dispatch and transport
//! engine.
//!
//! The shape is deliberately two-level rather than flat `anyhow`-style
//! strings: a leaf [`CoreError`] carries a stable `<domain>.<reason>` code
//! plus an optional boxed cause, and call sites wrap lower errors at each
//! boundary (dial, handshake, copy) so the topmost message is always what
//! ends up in logs, while `source()` still lets a debugger walk the chain
//! down to the original I/O error.

use std::borrow::Cow;
use std::fmt;

/// Object-safe error trait implemented by every error type in this crate
/// family, so `CoreError` can hold a boxed cause without depending on the
/// concrete type that produced it.
pub trait Error: fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl Error for std::io::Error {}

/// Boxed cause, always `Send + Sync + 'static` so it can cross task
/// boundaries inside the pipeline's two per-session tasks.
pub type ErrorCause = Box<dyn Error>;

/// Crate-wide result alias; callers that need a different error type still
/// spell it out explicitly.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Stable error codes, namespaced `<domain>.<reason>`. These are what
/// appear in logs, metrics labels and the management API — never the
/// `Display` text of a wrapped cause, which may vary between platforms.
pub mod codes {
    pub const TRANSPORT_IO: &str = "transport.io";
    pub const TRANSPORT_TIMEOUT: &str = "transport.timeout";
    pub const TRANSPORT_DIAL_REFUSED: &str = "transport.dial_refused";
    pub const TRANSPORT_HANDSHAKE: &str = "transport.handshake";
    pub const PROTOCOL_DECODE: &str = "protocol.decode";
    pub const PROTOCOL_AUTH: &str = "protocol.auth";
    pub const PROTOCOL_REPLAY: &str = "protocol.replay";
    pub const ROUTER_NO_MATCH: &str = "router.no_match";
    pub const DISPATCH_CANCELLED: &str = "dispatch.cancelled";
    pub const REGISTRY_UNRESOLVED: &str = "registry.unresolved_dependency";
    pub const BUFFER_EXHAUSTED: &str = "buffer.exhausted";
    pub const BUFFER_DOUBLE_RELEASE: &str = "buffer.double_release";
    pub const CONFIG_INVALID: &str = "config.invalid";
}

/// Drives automated handling (retry, fallback, silent close) without
/// forcing every call site to pattern-match on a string code.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Dial/accept/read/write failure local to one session; only that
    /// session is torn down.
    Network,
    /// Wire-level framing or authentication failure; session is torn down,
    /// and an inbound may fall back to its configured `fallback` address.
    Protocol,
    /// Context cancellation. Never logged as an error.
    Cancelled,
    /// Configuration rejected at startup; fatal to the process.
    Config,
    /// Required feature dependency never resolved; fatal to `start()`.
    ResolveDependency,
    /// Programmer error (double release, unreachable state). The session
    /// is terminated but the core stays alive.
    Internal,
}

impl ErrorCategory {
    /// Whether a failure in this category should close only the current
    /// session, as opposed to failing startup or the whole process.
    pub fn is_session_local(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network | ErrorCategory::Protocol | ErrorCategory::Cancelled
        )
    }
}

/// The error type returned across every public fallible operation in this
/// workspace. Each boundary (dial, handshake, copy direction) wraps the
/// lower error with a `phase` string via [`CoreError::wrap`] so the
/// outermost `Display` always tells a reader what was happening, not just
/// what went wrong underneath.
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    phase: Option<Cow<'static, str>>,
    message: Cow<'static, str>,
    category: ErrorCategory,
    cause: Option<ErrorCause>,
}

impl CoreError {
    pub fn new(code: &'static str, category: ErrorCategory, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            phase: None,
            message: message.into(),
            category,
            cause: None,
        }
    }

    /// Wraps `cause` with a boundary-specific phase label, e.g.
    /// `"dial 127.0.0.1:1"` or `"vmess.request_header"`, so a log line
    /// at the top of the stack still says which layer actually failed.
    pub fn wrap(
        code: &'static str,
        category: ErrorCategory,
        phase: impl Into<Cow<'static, str>>,
        cause: impl Error,
    ) -> Self {
        Self {
            code,
            phase: Some(phase.into()),
            message: Cow::Borrowed(""),
            category,
            cause: Some(Box::new(cause)),
        }
    }

    pub fn with_cause(mut self, cause: impl Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn category(&self) -> &ErrorCategory {
        &self.category
    }

    pub fn phase(&self) -> Option<&str> {
        self.phase.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.phase, self.message.is_empty()) {
            (Some(phase), true) => write!(f, "[{}] {}", self.code, phase),
            (Some(phase), false) => write!(f, "[{}] {}: {}", self.code, phase, self.message),
            (None, _) => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref()
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
