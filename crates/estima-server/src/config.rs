use std::path::PathBuf;
use std::time::Duration;

use estima_core::{DeckKind, SessionError};
use estima_session::SessionPolicy;
use estima_settings::{EstimaSettings, PolicySettings};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_message_size: usize,
    pub sweep_interval: Duration,
    pub upload_dir: PathBuf,
    pub max_avatar_bytes: usize,
    pub allowed_avatar_types: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&EstimaSettings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &EstimaSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue,
            ping_interval: Duration::from_secs(settings.server.ping_interval_secs),
            ping_timeout: Duration::from_secs(settings.server.ping_timeout_secs),
            max_message_size: settings.server.max_message_size,
            sweep_interval: Duration::from_secs(settings.policy.sweep_interval_secs),
            upload_dir: PathBuf::from(&settings.avatars.upload_dir),
            max_avatar_bytes: settings.avatars.max_bytes,
            allowed_avatar_types: settings.avatars.allowed_types.clone(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Build the session policy, rejecting an unknown default deck.
pub fn session_policy(settings: &PolicySettings) -> Result<SessionPolicy, SessionError> {
    let default_deck: DeckKind = settings.default_deck.parse()?;
    Ok(SessionPolicy {
        consensus_threshold: settings.consensus_threshold,
        heartbeat_timeout: Duration::from_secs(settings.heartbeat_timeout_secs),
        session_ttl: Duration::from_secs(settings.session_ttl_secs),
        default_deck,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.max_avatar_bytes, 5 * 1024 * 1024);
        assert_eq!(config.allowed_avatar_types.len(), 4);
    }

    #[test]
    fn policy_from_default_settings_matches_session_defaults() {
        let policy = session_policy(&PolicySettings::default()).unwrap();
        assert_eq!(policy, SessionPolicy::default());
    }

    #[test]
    fn unknown_default_deck_is_rejected() {
        let settings = PolicySettings {
            default_deck: "poker".into(),
            ..PolicySettings::default()
        };
        let err = session_policy(&settings).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_DECK");
    }

    #[test]
    fn custom_policy() {
        let settings = PolicySettings {
            consensus_threshold: 0.5,
            heartbeat_timeout_secs: 60,
            session_ttl_secs: 120,
            sweep_interval_secs: 10,
            default_deck: "tshirt".into(),
        };
        let policy = session_policy(&settings).unwrap();
        assert_eq!(policy.default_deck, DeckKind::Tshirt);
        assert_eq!(policy.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(policy.session_ttl, Duration::from_secs(120));
    }
}
