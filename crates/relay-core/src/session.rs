//! Per-connection context carried through the dispatch pipeline: identity,
//! inbound/outbound legs, sniffed content hints and the cancel scope.
//!
//! `Session` models a bridged connection as an inbound leg plus an
//! `outbounds` stack rather than a single outbound slot, since one
//! dispatch can chain through another outbound acting as an upstream
//! proxy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::address::{Address, Destination};
use crate::contract::{Cancellation, Deadline};

/// Protocol-specific key material attached to a [`User`]. VMess-style
/// protocols carry a 16-byte identifier plus AEAD keying; other protocols
/// may only need a shared secret, hence the open variant set.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccountVariant {
    Vmess { id: [u8; 16] },
    SharedSecret { secret: Vec<u8> },
}

/// An authenticated principal: `(email, level, account)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    email: String,
    level: u32,
    account: AccountVariant,
}

impl User {
    pub fn new(email: impl Into<String>, level: u32, account: AccountVariant) -> Self {
        Self {
            email: email.into(),
            level,
            account,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn account(&self) -> &AccountVariant {
        &self.account
    }
}

/// Whether a leg permits the pipe to splice bytes without passing them
/// through the protocol codec, e.g. once a VMess stream is past its
/// header and framing is pure passthrough.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpliceCopy {
    Forbid,
    Allow,
    Required,
}

/// Idle-based cancellation primitive: each successful buffer transfer
/// calls [`ActivityTimer::update`]; when the configured timeout elapses
/// without an update, the owning session's cancel scope fires.
#[derive(Debug)]
pub struct ActivityTimer {
    last_activity: parking_lot::Mutex<std::time::Instant>,
    timeout: parking_lot::Mutex<Duration>,
    cancel: Cancellation,
}

impl ActivityTimer {
    pub fn new(timeout: Duration, cancel: Cancellation) -> Self {
        Self {
            last_activity: parking_lot::Mutex::new(std::time::Instant::now()),
            timeout: parking_lot::Mutex::new(timeout),
            cancel,
        }
    }

    pub fn update(&self) {
        *self.last_activity.lock() = std::time::Instant::now();
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }

    /// True once the configured timeout has elapsed since the last
    /// `update()`. Callers drive this from a periodic tick or a sleep
    /// race; firing triggers the session's cancel scope.
    pub fn check_expired(&self) -> bool {
        let elapsed = self.last_activity.lock().elapsed();
        if elapsed >= *self.timeout.lock() {
            self.cancel.cancel();
            true
        } else {
            false
        }
    }
}

/// The inbound leg of a session: where the client connected, who it
/// authenticated as, and whether its handler permits splice-copy.
///
/// `timer` is `Arc`-wrapped, not owned outright, so the same timer
/// instance can be handed to [`relay_switch::pipe::run`] while the
/// session keeps its own handle for inspection/shutdown bookkeeping.
#[derive(Debug)]
pub struct InboundLeg {
    pub tag: String,
    pub source: Destination,
    pub user: Option<User>,
    pub timer: Option<std::sync::Arc<ActivityTimer>>,
    pub can_splice_copy: SpliceCopy,
}

/// One frame of the outbound stack. Dispatch pushes a new frame each time
/// a handler chains through another outbound acting as an upstream proxy;
/// the top of the stack is always the currently executing handler's view
/// of its target.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub tag: String,
    pub target: Destination,
    pub original_target: Option<Destination>,
    pub gateway: Option<Address>,
    pub name: String,
    pub can_splice_copy: SpliceCopy,
}

/// Protocol/domain hints produced by inbound sniffing, consulted by
/// routing rules that match on `protocol` or resolved domain.
#[derive(Debug, Clone, Default)]
pub struct ContentHints {
    pub sniffed_protocol: Option<String>,
    pub sniffed_domain: Option<String>,
}

/// Per-connection context: created at inbound accept, destroyed at
/// pipeline end. Shared by the reader and writer task of a single pipe;
/// both coordinate through the pipe's channels rather than mutating this
/// struct concurrently, so mutable access always goes through `&mut`.
#[derive(Debug)]
pub struct Session {
    id: u64,
    inbound: InboundLeg,
    outbounds: Vec<OutboundFrame>,
    content: ContentHints,
    cancel_scope: Cancellation,
    deadline: Deadline,
}

impl Session {
    pub fn new(inbound: InboundLeg) -> Self {
        Self {
            id: next_session_id(),
            inbound,
            outbounds: Vec::new(),
            content: ContentHints::default(),
            cancel_scope: Cancellation::new(),
            deadline: Deadline::none(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn inbound(&self) -> &InboundLeg {
        &self.inbound
    }

    pub fn inbound_mut(&mut self) -> &mut InboundLeg {
        &mut self.inbound
    }

    /// The currently executing handler's view of its target: the top of
    /// the outbound stack.
    pub fn current_outbound(&self) -> Option<&OutboundFrame> {
        self.outbounds.last()
    }

    /// Pushed by dispatch when a handler chains through another outbound
    /// used as an upstream proxy. Handlers read the stack but never push
    /// to it themselves.
    pub fn push_outbound(&mut self, frame: OutboundFrame) {
        self.outbounds.push(frame);
    }

    pub fn outbounds(&self) -> &[OutboundFrame] {
        &self.outbounds
    }

    pub fn content(&self) -> &ContentHints {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut ContentHints {
        &mut self.content
    }

    pub fn cancel_scope(&self) -> &Cancellation {
        &self.cancel_scope
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn set_deadline(&mut self, deadline: Deadline) {
        self.deadline = deadline;
    }
}

/// High 24 bits are the process-start timestamp (seconds, wrapped), fixed
/// for the process lifetime; low 40 bits are a per-process sequence
/// counter. Two ids from the same process always compare in allocation
/// order; ids logged by different process instances rarely collide,
/// which is all a log-correlation key needs.
const SEQUENCE_BITS: u32 = 40;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);
static PROCESS_EPOCH: OnceLock<u64> = OnceLock::new();

fn process_epoch_prefix() -> u64 {
    *PROCESS_EPOCH.get_or_init(|| {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        (nanos & ((1 << (64 - SEQUENCE_BITS)) - 1)) << SEQUENCE_BITS
    })
}

fn next_session_id() -> u64 {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & ((1 << SEQUENCE_BITS) - 1);
    process_epoch_prefix() | seq
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Network;

    fn sample_inbound() -> InboundLeg {
        InboundLeg {
            tag: "in".into(),
            source: Destination::new(Network::Tcp, Address::Ipv4(std::net::Ipv4Addr::LOCALHOST), 1).unwrap(),
            user: None,
            timer: None,
            can_splice_copy: SpliceCopy::Allow,
        }
    }

    #[test]
    fn session_ids_are_unique_and_increasing() {
        let a = Session::new(sample_inbound());
        let b = Session::new(sample_inbound());
        assert!(b.id() > a.id());
    }

    #[test]
    fn outbound_stack_top_is_current_view() {
        let mut session = Session::new(sample_inbound());
        assert!(session.current_outbound().is_none());
        session.push_outbound(OutboundFrame {
            tag: "direct".into(),
            target: Destination::new(Network::Tcp, Address::Ipv4(std::net::Ipv4Addr::LOCALHOST), 80).unwrap(),
            original_target: None,
            gateway: None,
            name: "freedom".into(),
            can_splice_copy: SpliceCopy::Allow,
        });
        assert_eq!(session.current_outbound().unwrap().name, "freedom");
    }

    #[test]
    fn activity_timer_expires_after_timeout() {
        let cancel = Cancellation::new();
        let timer = ActivityTimer::new(Duration::from_millis(1), cancel.clone());
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.check_expired());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn activity_timer_update_resets_clock() {
        let cancel = Cancellation::new();
        let timer = ActivityTimer::new(Duration::from_millis(50), cancel.clone());
        timer.update();
        assert!(!timer.check_expired());
    }
}
