use std::time::Duration;

use estima_core::{DeckKind, DEFAULT_CONSENSUS_THRESHOLD};

/// Default silence after which a participant is considered gone (30 minutes).
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default inactivity window after which an empty session is evicted (24 hours).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Tunable policy knobs shared by every session of a registry.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionPolicy {
    pub consensus_threshold: f64,
    pub heartbeat_timeout: Duration,
    pub session_ttl: Duration,
    pub default_deck: DeckKind,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            consensus_threshold: DEFAULT_CONSENSUS_THRESHOLD,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            session_ttl: DEFAULT_SESSION_TTL,
            default_deck: DeckKind::default(),
        }
    }
}
