//! Wire protocol: inbound events and addressed outbound notifications.
//!
//! Every inbound frame is one JSON object tagged by `type`, carrying the
//! connection's authenticity `token` next to the event fields:
//!
//! ```json
//! {"type":"submit-vote","token":"…","sessionId":"ROOM1","value":"5"}
//! ```

use estima_core::notifications::{Notification, Role};
use estima_core::{CardValue, ParticipantId};
use serde::Deserialize;

/// Identity and credential of one transport connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionContext {
    pub connection_id: ParticipantId,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(flatten)]
    pub event: InboundEvent,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum InboundEvent {
    JoinSession {
        session_id: String,
        display_name: String,
        #[serde(default)]
        avatar_ref: Option<String>,
        #[serde(default)]
        role: Role,
    },
    SubmitVote {
        session_id: String,
        value: CardValue,
    },
    ResetVotes {
        session_id: String,
    },
    ChangeDeck {
        session_id: String,
        deck_name: String,
    },
    Heartbeat,
    UpdateAvatar {
        session_id: String,
        avatar_ref: String,
    },
    LeaveSession {
        session_id: String,
    },
    SendEmoji {
        session_id: String,
        emoji: String,
        #[serde(default)]
        target_participant_id: Option<ParticipantId>,
    },
    UserCollision {
        session_id: String,
        attacker_id: ParticipantId,
        target_id: ParticipantId,
    },
    StartMiniGame {
        session_id: String,
        game_type: String,
    },
    MiniGameResult {
        session_id: String,
        result: serde_json::Value,
    },
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinSession { .. } => "join-session",
            Self::SubmitVote { .. } => "submit-vote",
            Self::ResetVotes { .. } => "reset-votes",
            Self::ChangeDeck { .. } => "change-deck",
            Self::Heartbeat => "heartbeat",
            Self::UpdateAvatar { .. } => "update-avatar",
            Self::LeaveSession { .. } => "leave-session",
            Self::SendEmoji { .. } => "send-emoji",
            Self::UserCollision { .. } => "user-collision",
            Self::StartMiniGame { .. } => "start-mini-game",
            Self::MiniGameResult { .. } => "mini-game-result",
        }
    }
}

/// A notification and the connections it goes to.
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    pub recipients: Vec<ParticipantId>,
    pub notification: Notification,
}

impl Outbound {
    pub fn to(recipient: ParticipantId, notification: Notification) -> Self {
        Self {
            recipients: vec![recipient],
            notification,
        }
    }

    pub fn to_all(recipients: Vec<ParticipantId>, notification: Notification) -> Self {
        Self {
            recipients,
            notification,
        }
    }
}
