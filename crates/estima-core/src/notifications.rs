//! Outbound notifications and the views they carry.
//!
//! Everything here is plain data: the session layer builds the views, the
//! server serializes the notifications to JSON text frames.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateResult;
use crate::deck::{CardValue, DeckKind};
use crate::errors::SessionError;
use crate::ids::{ParticipantId, SessionId};

/// Whether a participant votes or only watches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    #[default]
    Player,
    Spectator,
}

/// Public view of a participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    pub role: Role,
    pub connected: bool,
}

/// A deck as advertised to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckDescriptor {
    pub name: DeckKind,
    pub values: Vec<String>,
}

impl From<DeckKind> for DeckDescriptor {
    fn from(deck: DeckKind) -> Self {
        Self {
            name: deck,
            values: deck.values().iter().map(|v| (*v).to_string()).collect(),
        }
    }
}

/// Full session state sent to a joining connection.
///
/// Vote values stay hidden until the round is revealed; before that only the
/// ids of participants who have voted are listed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub participants: Vec<ParticipantView>,
    pub voted: Vec<ParticipantId>,
    pub active_deck: DeckDescriptor,
    pub revealed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<IndexMap<ParticipantId, CardValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AggregateResult>,
}

/// Messages pushed from the server to connections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Notification {
    /// First frame on every connection: the identity and token to echo back.
    Connected {
        connection_id: ParticipantId,
        token: String,
    },
    SessionSnapshot {
        session: SessionSnapshot,
        decks: Vec<DeckDescriptor>,
    },
    ParticipantJoined {
        participant: ParticipantView,
    },
    ParticipantLeft {
        participant_id: ParticipantId,
    },
    ParticipantDisconnected {
        participant_id: ParticipantId,
    },
    VoteUpdated {
        participant_id: ParticipantId,
    },
    VoteCount {
        current: usize,
        total: usize,
    },
    VotingComplete {
        votes: IndexMap<ParticipantId, CardValue>,
        result: AggregateResult,
    },
    CelebrateConsensus,
    VotesReset,
    DeckChanged {
        deck_name: DeckKind,
        values: Vec<String>,
    },
    AvatarUpdated {
        participant_id: ParticipantId,
        avatar_ref: String,
    },
    EmojiReceived {
        emoji: String,
        from: ParticipantView,
        to: Option<ParticipantId>,
    },
    CollisionAnimation {
        attacker_id: ParticipantId,
        target_id: ParticipantId,
        attacker_name: String,
        target_name: String,
    },
    MiniGameStarted {
        game_type: String,
    },
    MiniGameResult {
        participant: ParticipantView,
        result: serde_json::Value,
    },
    Error {
        code: String,
        reason: String,
    },
}

impl Notification {
    pub fn error(err: &SessionError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn deck_changed(deck: DeckKind) -> Self {
        let DeckDescriptor { name, values } = deck.into();
        Self::DeckChanged {
            deck_name: name,
            values,
        }
    }

    /// Wire name of the notification, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::SessionSnapshot { .. } => "session-snapshot",
            Self::ParticipantJoined { .. } => "participant-joined",
            Self::ParticipantLeft { .. } => "participant-left",
            Self::ParticipantDisconnected { .. } => "participant-disconnected",
            Self::VoteUpdated { .. } => "vote-updated",
            Self::VoteCount { .. } => "vote-count",
            Self::VotingComplete { .. } => "voting-complete",
            Self::CelebrateConsensus => "celebrate-consensus",
            Self::VotesReset => "votes-reset",
            Self::DeckChanged { .. } => "deck-changed",
            Self::AvatarUpdated { .. } => "avatar-updated",
            Self::EmojiReceived { .. } => "emoji-received",
            Self::CollisionAnimation { .. } => "collision-animation",
            Self::MiniGameStarted { .. } => "mini-game-started",
            Self::MiniGameResult { .. } => "mini-game-result",
            Self::Error { .. } => "error",
        }
    }
}
