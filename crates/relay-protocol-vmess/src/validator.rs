//! User validator: looks up a request header's 16-byte id against the
//! configured user set and rejects timestamps outside a ±30s window or
//! `(id, timestamp)` pairs already seen. Uses the same
//! `parking_lot::Mutex`-guarded map style as
//! `relay_core::registry::FeatureRegistry`, applied here to a much
//! smaller per-connection lookup rather than a process-wide registry.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use relay_core::error::CoreError;
use relay_core::session::{AccountVariant, User};

use crate::error;

pub const DEFAULT_WINDOW_SECS: u64 = 30;

pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// `(user id, request timestamp)` pairs already accepted, pruned lazily
/// on each validation so the set never grows past roughly
/// `2 * window_secs` worth of traffic.
struct ReplayGuard {
    seen: HashMap<([u8; 16], u64), ()>,
}

impl ReplayGuard {
    fn new() -> Self {
        Self { seen: HashMap::new() }
    }

    fn check_and_record(&mut self, id: [u8; 16], timestamp: u64, now: u64, window_secs: u64) -> bool {
        self.seen.retain(|&(_, ts), _| now.saturating_sub(ts) <= window_secs * 2);
        self.seen.insert((id, timestamp), ()).is_none()
    }
}

pub struct UserValidator {
    users: HashMap<[u8; 16], User>,
    replay: Mutex<ReplayGuard>,
    window_secs: u64,
}

impl UserValidator {
    pub fn new(users: Vec<User>) -> Self {
        Self::with_window(users, DEFAULT_WINDOW_SECS)
    }

    pub fn with_window(users: Vec<User>, window_secs: u64) -> Self {
        let mut by_id = HashMap::new();
        for user in users {
            if let AccountVariant::Vmess { id } = *user.account() {
                by_id.insert(id, user);
            }
        }
        Self {
            users: by_id,
            replay: Mutex::new(ReplayGuard::new()),
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Resolves `id` to a configured [`User`], checks `timestamp` against
    /// the ±window around `now`, and records the `(id, timestamp)` pair so
    /// a retransmitted header is rejected as a replay.
    pub fn validate(&self, id: [u8; 16], timestamp: u64, now: u64) -> Result<&User, CoreError> {
        let user = self.users.get(&id).ok_or_else(error::unknown_user)?;

        let delta = now.max(timestamp) - now.min(timestamp);
        if delta > self.window_secs {
            return Err(error::timestamp_out_of_window(timestamp, now, self.window_secs));
        }

        if !self.replay.lock().check_and_record(id, timestamp, now, self.window_secs) {
            return Err(error::replayed_request());
        }

        Ok(user)
    }
}
