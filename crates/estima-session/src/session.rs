//! The voting state machine of a single session.
//!
//! A session is `Collecting` until every connected Player has a vote, then
//! flips to `Revealed` exactly once per round. Only `reset` and
//! `change_deck` start a new round.

use chrono::{DateTime, Utc};
use estima_core::notifications::{DeckDescriptor, ParticipantView, Role, SessionSnapshot};
use estima_core::{aggregate, AggregateResult, CardValue, DeckKind, ParticipantId, SessionError, SessionId};
use indexmap::IndexMap;

use crate::policy::SessionPolicy;
use crate::presence::{elapsed_exceeds, Participant, PresenceTracker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    Collecting,
    Revealed,
}

/// The votes and result exposed by a reveal.
#[derive(Clone, Debug, PartialEq)]
pub struct Reveal {
    pub votes: IndexMap<ParticipantId, CardValue>,
    pub result: AggregateResult,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinOutcome {
    pub participant: ParticipantView,
    pub rejoined: bool,
    pub reveal: Option<Reveal>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum VoteOutcome {
    /// The vote is stored and the round is still open.
    Recorded { current: usize, total: usize },
    /// The vote completed the round.
    Revealed(Reveal),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LeaveOutcome {
    pub reveal: Option<Reveal>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisconnectOutcome {
    pub reveal: Option<Reveal>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaleSweep {
    pub disconnected: Vec<ParticipantId>,
    pub reveal: Option<Reveal>,
}

/// One voting room.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    presence: PresenceTracker,
    votes: IndexMap<ParticipantId, CardValue>,
    active_deck: DeckKind,
    state: RoundState,
    last_result: Option<AggregateResult>,
    consensus_threshold: f64,
    last_activity_at: DateTime<Utc>,
    evicted: bool,
}

impl Session {
    pub fn new(id: SessionId, policy: &SessionPolicy, now: DateTime<Utc>) -> Self {
        Self {
            id,
            presence: PresenceTracker::new(),
            votes: IndexMap::new(),
            active_deck: policy.default_deck,
            state: RoundState::Collecting,
            last_result: None,
            consensus_threshold: policy.consensus_threshold,
            last_activity_at: now,
            evicted: false,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn active_deck(&self) -> DeckKind {
        self.active_deck
    }

    pub fn last_result(&self) -> Option<&AggregateResult> {
        self.last_result.as_ref()
    }

    pub fn votes(&self) -> &IndexMap<ParticipantId, CardValue> {
        &self.votes
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.presence.get(id)
    }

    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.presence.ids().cloned().collect()
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    /// Insert or replace `id` as a connected participant.
    ///
    /// A prior vote for the same identity is kept, unless the participant
    /// comes back as a Spectator (spectators never hold votes).
    pub fn join(
        &mut self,
        id: ParticipantId,
        display_name: String,
        avatar_ref: Option<String>,
        role: Role,
        now: DateTime<Utc>,
    ) -> JoinOutcome {
        let participant = Participant {
            id: id.clone(),
            display_name,
            avatar_ref,
            role,
            connected: true,
            last_heartbeat_at: now,
        };
        let view = participant.view();
        let rejoined = self.presence.upsert(participant).is_some();
        if role == Role::Spectator {
            self.votes.shift_remove(&id);
        }
        self.touch(now);

        JoinOutcome {
            participant: view,
            rejoined,
            reveal: self.try_reveal(),
        }
    }

    /// Record or overwrite the vote of `id`.
    ///
    /// The threshold check and the transition to `Revealed` happen inside
    /// this call, so holding `&mut self` makes them one indivisible step.
    pub fn record_vote(
        &mut self,
        id: &ParticipantId,
        value: CardValue,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, SessionError> {
        let participant = self
            .presence
            .get(id)
            .ok_or_else(|| SessionError::ParticipantNotInSession(id.to_string()))?;
        if self.state == RoundState::Revealed {
            return Err(SessionError::VotingClosed);
        }
        if participant.role != Role::Player {
            return Err(SessionError::NotAPlayer);
        }
        if !self.active_deck.contains(&value) {
            return Err(SessionError::InvalidVote(format!(
                "{value} is not in the {} deck",
                self.active_deck
            )));
        }

        self.votes.insert(id.clone(), value);
        self.touch(now);

        match self.try_reveal() {
            Some(reveal) => Ok(VoteOutcome::Revealed(reveal)),
            None => {
                let (current, total) = self.tally();
                Ok(VoteOutcome::Recorded { current, total })
            }
        }
    }

    /// Clear the round unconditionally.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.votes.clear();
        self.last_result = None;
        self.state = RoundState::Collecting;
        self.touch(now);
    }

    /// Switch decks and start a fresh round.
    pub fn change_deck(&mut self, deck_name: &str, now: DateTime<Utc>) -> Result<DeckKind, SessionError> {
        let deck: DeckKind = deck_name.parse()?;
        self.active_deck = deck;
        self.reset(now);
        Ok(deck)
    }

    /// Remove a participant and its vote entirely.
    pub fn leave(&mut self, id: &ParticipantId, now: DateTime<Utc>) -> Result<LeaveOutcome, SessionError> {
        if self.presence.remove(id).is_none() {
            return Err(SessionError::ParticipantNotInSession(id.to_string()));
        }
        self.votes.shift_remove(id);
        self.touch(now);
        Ok(LeaveOutcome {
            reveal: self.try_reveal(),
        })
    }

    /// Transport closed without an explicit leave: keep the participant and
    /// its vote, drop it from the connected set.
    ///
    /// Returns `None` if the participant is unknown or already disconnected.
    pub fn disconnect(&mut self, id: &ParticipantId, now: DateTime<Utc>) -> Option<DisconnectOutcome> {
        if !self.presence.mark_disconnected(id) {
            return None;
        }
        self.touch(now);
        Some(DisconnectOutcome {
            reveal: self.try_reveal(),
        })
    }

    pub fn record_heartbeat(&mut self, id: &ParticipantId, now: DateTime<Utc>) -> bool {
        let known = self.presence.record_heartbeat(id, now);
        if known {
            self.touch(now);
        }
        known
    }

    /// Disconnect participants whose heartbeat is older than `timeout`.
    pub fn sweep_stale_participants(&mut self, now: DateTime<Utc>, timeout: std::time::Duration) -> StaleSweep {
        let disconnected = self.presence.sweep_stale(now, timeout);
        if disconnected.is_empty() {
            return StaleSweep::default();
        }
        StaleSweep {
            disconnected,
            reveal: self.try_reveal(),
        }
    }

    pub fn update_avatar(
        &mut self,
        id: &ParticipantId,
        avatar_ref: String,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let participant = self
            .presence
            .get_mut(id)
            .ok_or_else(|| SessionError::ParticipantNotInSession(id.to_string()))?;
        participant.avatar_ref = Some(avatar_ref);
        self.touch(now);
        Ok(())
    }

    /// `(connected players who voted, connected players)`.
    pub fn tally(&self) -> (usize, usize) {
        let mut total = 0;
        let mut current = 0;
        for player in self.presence.connected_players() {
            total += 1;
            if self.votes.contains_key(&player.id) {
                current += 1;
            }
        }
        (current, total)
    }

    /// No participant is connected and nothing happened within `ttl`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        if self.presence.any_connected() {
            return false;
        }
        let last_seen = self
            .presence
            .latest_heartbeat()
            .map_or(self.last_activity_at, |hb| hb.max(self.last_activity_at));
        elapsed_exceeds(last_seen, now, ttl)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let revealed = self.state == RoundState::Revealed;
        SessionSnapshot {
            session_id: self.id.clone(),
            participants: self.presence.iter().map(Participant::view).collect(),
            voted: self.votes.keys().cloned().collect(),
            active_deck: DeckDescriptor::from(self.active_deck),
            revealed,
            votes: revealed.then(|| self.votes.clone()),
            result: self.last_result.clone(),
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    /// Reveal if every connected Player has voted. At most once per round.
    fn try_reveal(&mut self) -> Option<Reveal> {
        if self.state == RoundState::Revealed {
            return None;
        }
        let (current, total) = self.tally();
        if total == 0 || current < total {
            return None;
        }

        let result = aggregate(self.votes.values(), self.consensus_threshold);
        self.state = RoundState::Revealed;
        self.last_result = Some(result.clone());
        tracing::info!(
            session_id = %self.id,
            votes = self.votes.len(),
            consensus = result.consensus_reached,
            "round revealed"
        );
        Some(Reveal {
            votes: self.votes.clone(),
            result,
        })
    }
}
