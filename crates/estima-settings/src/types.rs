//! Settings types. Every field has a default so partial files are valid.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EstimaSettings {
    pub server: ServerSettings,
    pub policy: PolicySettings,
    pub avatars: AvatarSettings,
    pub logging: LoggingSettings,
}

impl EstimaSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::SettingsError;

        let server = &self.server;
        if server.max_send_queue == 0 {
            return Err(SettingsError::invalid("server.maxSendQueue", "must be positive"));
        }
        if server.ping_interval_secs == 0 {
            return Err(SettingsError::invalid("server.pingIntervalSecs", "must be positive"));
        }
        if server.ping_timeout_secs <= server.ping_interval_secs {
            return Err(SettingsError::invalid(
                "server.pingTimeoutSecs",
                format!("must exceed pingIntervalSecs ({})", server.ping_interval_secs),
            ));
        }
        if server.max_message_size == 0 {
            return Err(SettingsError::invalid("server.maxMessageSize", "must be positive"));
        }

        let policy = &self.policy;
        let threshold = policy.consensus_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(SettingsError::invalid(
                "policy.consensusThreshold",
                format!("must be in (0, 1], got {threshold}"),
            ));
        }
        if policy.sweep_interval_secs == 0 {
            return Err(SettingsError::invalid("policy.sweepIntervalSecs", "must be positive"));
        }
        if policy.sweep_interval_secs > policy.heartbeat_timeout_secs {
            return Err(SettingsError::invalid(
                "policy.sweepIntervalSecs",
                format!("must not exceed heartbeatTimeoutSecs ({})", policy.heartbeat_timeout_secs),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// WebSocket ping cadence.
    pub ping_interval_secs: u64,
    /// Close the socket after this long without a pong.
    pub ping_timeout_secs: u64,
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 256,
            ping_interval_secs: 30,
            ping_timeout_secs: 90,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicySettings {
    pub consensus_threshold: f64,
    pub heartbeat_timeout_secs: u64,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub default_deck: String,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            consensus_threshold: 0.70,
            heartbeat_timeout_secs: 30 * 60,
            session_ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 60,
            default_deck: "modifiedFibonacci".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AvatarSettings {
    pub upload_dir: String,
    pub max_bytes: usize,
    pub allowed_types: Vec<String>,
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self {
            upload_dir: "public/uploads".into(),
            max_bytes: 5 * 1024 * 1024,
            allowed_types: ["image/png", "image/jpeg", "image/gif", "image/webp"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
