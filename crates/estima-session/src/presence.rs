//! Participant connectivity and heartbeat tracking for one session.

use std::time::Duration;

use chrono::{DateTime, Utc};
use estima_core::notifications::{ParticipantView, Role};
use estima_core::ParticipantId;
use indexmap::IndexMap;

/// One identity inside a session.
#[derive(Clone, Debug, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub role: Role,
    pub connected: bool,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl Participant {
    pub fn is_connected_player(&self) -> bool {
        self.connected && self.role == Role::Player
    }

    pub fn view(&self) -> ParticipantView {
        ParticipantView {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            avatar_ref: self.avatar_ref.clone(),
            role: self.role,
            connected: self.connected,
        }
    }
}

/// Participants of a session in join order, with their liveness state.
#[derive(Clone, Debug, Default)]
pub struct PresenceTracker {
    participants: IndexMap<ParticipantId, Participant>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    /// Insert or replace a participant. Returns the previous entry, if any.
    pub fn upsert(&mut self, participant: Participant) -> Option<Participant> {
        self.participants.insert(participant.id.clone(), participant)
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.participants.shift_remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.participants.keys()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn connected_players(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values().filter(|p| p.is_connected_player())
    }

    pub fn any_connected(&self) -> bool {
        self.participants.values().any(|p| p.connected)
    }

    /// Most recent heartbeat across all participants.
    pub fn latest_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.participants.values().map(|p| p.last_heartbeat_at).max()
    }

    /// Refresh the heartbeat of a present participant.
    ///
    /// Unknown ids are ignored: a heartbeat racing an explicit leave must not
    /// bring the participant back.
    pub fn record_heartbeat(&mut self, id: &ParticipantId, now: DateTime<Utc>) -> bool {
        match self.participants.get_mut(id) {
            Some(participant) => {
                participant.last_heartbeat_at = now;
                true
            }
            None => false,
        }
    }

    /// Flip a participant to disconnected. Returns `false` if it was absent or
    /// already disconnected.
    pub fn mark_disconnected(&mut self, id: &ParticipantId) -> bool {
        match self.participants.get_mut(id) {
            Some(participant) if participant.connected => {
                participant.connected = false;
                true
            }
            _ => false,
        }
    }

    /// Disconnect every connected participant silent for longer than `timeout`.
    ///
    /// Participants and their votes stay in place; only the flag changes.
    pub fn sweep_stale(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<ParticipantId> {
        let mut stale = Vec::new();
        for participant in self.participants.values_mut() {
            if participant.connected && elapsed_exceeds(participant.last_heartbeat_at, now, timeout) {
                participant.connected = false;
                stale.push(participant.id.clone());
            }
        }
        stale
    }
}

/// Whether more than `limit` has passed between `since` and `now`.
/// A `since` in the future never counts as elapsed.
pub(crate) fn elapsed_exceeds(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    (now - since).to_std().map(|elapsed| elapsed > limit).unwrap_or(false)
}
