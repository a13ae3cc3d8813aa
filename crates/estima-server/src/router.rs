//! Maps inbound connection events onto session operations and decides who
//! hears about the result.
//!
//! Outbound messages are emitted while the addressed session is still
//! locked, so whatever delivers them sees one session's notifications in the
//! same order its mutations happened.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use estima_core::deck::DeckKind;
use estima_core::notifications::{DeckDescriptor, Notification, ParticipantView};
use estima_core::validation::{
    parse_session_id, validate_avatar_ref, validate_display_name, validate_emoji, validate_mini_game,
    verify_token,
};
use estima_core::{ParticipantId, SessionError, SessionId};
use estima_session::{Reveal, Session, SessionRegistry, VoteOutcome};
use tracing::{debug, error, info, warn};

use crate::protocol::{ConnectionContext, InboundEnvelope, InboundEvent, Outbound};

const UNKNOWN_NAME: &str = "Unknown";

/// Routes connection events into the session registry.
pub struct EventRouter {
    sessions: SessionRegistry,
    /// Sessions each connection has joined and not left.
    memberships: DashMap<ParticipantId, BTreeSet<SessionId>>,
}

impl EventRouter {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self {
            sessions,
            memberships: DashMap::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Sessions the connection currently belongs to.
    pub fn memberships(&self, connection_id: &ParticipantId) -> Vec<SessionId> {
        self.memberships
            .get(connection_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Route one event and collect everything it emits.
    pub fn handle(&self, ctx: &ConnectionContext, envelope: InboundEnvelope) -> Vec<Outbound> {
        let mut out = Vec::new();
        self.dispatch(ctx, envelope, &mut |msg| out.push(msg));
        out
    }

    /// Route one event, passing each outbound message to `emit` as it is
    /// produced.
    ///
    /// Rejections and handler panics become a single `error` notification
    /// addressed to the originating connection.
    pub fn dispatch(&self, ctx: &ConnectionContext, envelope: InboundEnvelope, emit: &mut dyn FnMut(Outbound)) {
        let event_name = envelope.event.name();
        let result = catch_unwind(AssertUnwindSafe(|| self.route(ctx, envelope, emit)));
        let err = match result {
            Ok(Ok(())) => return,
            Ok(Err(err)) => {
                warn!(
                    connection_id = %ctx.connection_id,
                    event = event_name,
                    code = err.code(),
                    reason = %err,
                    "event rejected"
                );
                err
            }
            Err(panic) => {
                error!(
                    connection_id = %ctx.connection_id,
                    event = event_name,
                    panic = panic_message(&panic),
                    "event handler panicked"
                );
                SessionError::Internal
            }
        };
        emit(Outbound::to(ctx.connection_id.clone(), Notification::error(&err)));
    }

    /// Transport closed: mark the connection disconnected in every session it
    /// had joined.
    pub fn disconnect(&self, connection_id: &ParticipantId, emit: &mut dyn FnMut(Outbound)) {
        let Some((_, joined)) = self.memberships.remove(connection_id) else {
            return;
        };
        let now = Utc::now();
        for session_id in joined {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.sessions.with_session(&session_id, |session| {
                    let Some(outcome) = session.disconnect(connection_id, now) else {
                        return;
                    };
                    info!(%session_id, participant_id = %connection_id, "participant disconnected");
                    let others = others(session, connection_id);
                    emit(Outbound::to_all(
                        others.clone(),
                        Notification::ParticipantDisconnected {
                            participant_id: connection_id.clone(),
                        },
                    ));
                    if let Some(reveal) = outcome.reveal {
                        for notification in reveal_notifications(reveal) {
                            emit(Outbound::to_all(others.clone(), notification));
                        }
                    }
                })
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(%session_id, reason = %err, "disconnect skipped"),
                Err(panic) => error!(%session_id, panic = panic_message(&panic), "disconnect handler panicked"),
            }
        }
    }

    /// Flip participants with an expired heartbeat to disconnected. Returns
    /// how many were flipped.
    pub fn sweep_presence(&self, now: DateTime<Utc>, emit: &mut dyn FnMut(Outbound)) -> usize {
        let timeout = self.sessions.policy().heartbeat_timeout;
        let mut flipped = 0;
        self.sessions.for_each_session(|session| {
            let sweep = session.sweep_stale_participants(now, timeout);
            if sweep.disconnected.is_empty() {
                return;
            }
            flipped += sweep.disconnected.len();
            let everyone = session.participant_ids();
            for participant_id in sweep.disconnected {
                info!(session_id = %session.id(), %participant_id, "heartbeat timed out");
                emit(Outbound::to_all(
                    everyone.clone(),
                    Notification::ParticipantDisconnected { participant_id },
                ));
            }
            if let Some(reveal) = sweep.reveal {
                for notification in reveal_notifications(reveal) {
                    emit(Outbound::to_all(everyone.clone(), notification));
                }
            }
        });
        flipped
    }

    /// Evict expired sessions and forget memberships that pointed at them.
    pub fn sweep_sessions(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let removed = self.sessions.sweep(now);
        if !removed.is_empty() {
            self.memberships.retain(|_, joined| {
                for session_id in &removed {
                    joined.remove(session_id);
                }
                !joined.is_empty()
            });
        }
        removed
    }

    fn route(
        &self,
        ctx: &ConnectionContext,
        envelope: InboundEnvelope,
        emit: &mut dyn FnMut(Outbound),
    ) -> Result<(), SessionError> {
        verify_token(envelope.token.as_deref(), &ctx.token)?;
        let me = &ctx.connection_id;
        let now = Utc::now();

        match envelope.event {
            InboundEvent::JoinSession {
                session_id,
                display_name,
                avatar_ref,
                role,
            } => {
                let session_id = parse_session_id(&session_id)?;
                let display_name = validate_display_name(&display_name)?;
                if let Some(avatar_ref) = &avatar_ref {
                    validate_avatar_ref(avatar_ref)?;
                }
                self.sessions.with_session_or_create(&session_id, now, |session| {
                    let outcome = session.join(me.clone(), display_name, avatar_ref, role, now);
                    self.memberships
                        .entry(me.clone())
                        .or_default()
                        .insert(session_id.clone());
                    info!(
                        %session_id,
                        participant_id = %me,
                        ?role,
                        rejoined = outcome.rejoined,
                        "participant joined"
                    );

                    emit(Outbound::to(
                        me.clone(),
                        Notification::SessionSnapshot {
                            session: session.snapshot(),
                            decks: DeckKind::ALL.iter().copied().map(DeckDescriptor::from).collect(),
                        },
                    ));
                    emit(Outbound::to_all(
                        others(session, me),
                        Notification::ParticipantJoined {
                            participant: outcome.participant,
                        },
                    ));
                    if let Some(reveal) = outcome.reveal {
                        let everyone = session.participant_ids();
                        for notification in reveal_notifications(reveal) {
                            emit(Outbound::to_all(everyone.clone(), notification));
                        }
                    }
                });
                Ok(())
            }

            InboundEvent::SubmitVote { session_id, value } => {
                let session_id = parse_session_id(&session_id)?;
                self.sessions.with_session(&session_id, |session| -> Result<(), SessionError> {
                    let outcome = session.record_vote(me, value, now)?;
                    debug!(%session_id, participant_id = %me, "vote recorded");
                    let everyone = session.participant_ids();
                    emit(Outbound::to_all(
                        everyone.clone(),
                        Notification::VoteUpdated {
                            participant_id: me.clone(),
                        },
                    ));
                    match outcome {
                        VoteOutcome::Recorded { current, total } => {
                            emit(Outbound::to_all(everyone, Notification::VoteCount { current, total }));
                        }
                        VoteOutcome::Revealed(reveal) => {
                            for notification in reveal_notifications(reveal) {
                                emit(Outbound::to_all(everyone.clone(), notification));
                            }
                        }
                    }
                    Ok(())
                })?
            }

            InboundEvent::ResetVotes { session_id } => {
                let session_id = parse_session_id(&session_id)?;
                self.sessions.with_session(&session_id, |session| -> Result<(), SessionError> {
                    require_member(session, me)?;
                    session.reset(now);
                    info!(%session_id, participant_id = %me, "votes reset");
                    emit(Outbound::to_all(session.participant_ids(), Notification::VotesReset));
                    Ok(())
                })?
            }

            InboundEvent::ChangeDeck { session_id, deck_name } => {
                let session_id = parse_session_id(&session_id)?;
                self.sessions.with_session(&session_id, |session| -> Result<(), SessionError> {
                    require_member(session, me)?;
                    let deck = session.change_deck(&deck_name, now)?;
                    info!(%session_id, participant_id = %me, deck = %deck, "deck changed");
                    emit(Outbound::to_all(session.participant_ids(), Notification::deck_changed(deck)));
                    Ok(())
                })?
            }

            InboundEvent::Heartbeat => {
                for session_id in self.memberships(me) {
                    // A session evicted since the join is simply skipped.
                    let _ = self
                        .sessions
                        .with_session(&session_id, |session| session.record_heartbeat(me, now));
                }
                debug!(connection_id = %me, "heartbeat");
                Ok(())
            }

            InboundEvent::UpdateAvatar { session_id, avatar_ref } => {
                let session_id = parse_session_id(&session_id)?;
                validate_avatar_ref(&avatar_ref)?;
                self.sessions.with_session(&session_id, |session| -> Result<(), SessionError> {
                    session.update_avatar(me, avatar_ref.clone(), now)?;
                    emit(Outbound::to_all(
                        session.participant_ids(),
                        Notification::AvatarUpdated {
                            participant_id: me.clone(),
                            avatar_ref,
                        },
                    ));
                    Ok(())
                })?
            }

            InboundEvent::LeaveSession { session_id } => {
                let session_id = parse_session_id(&session_id)?;
                self.sessions.with_session(&session_id, |session| -> Result<(), SessionError> {
                    let outcome = session.leave(me, now)?;
                    if let Some(mut joined) = self.memberships.get_mut(me) {
                        joined.remove(&session_id);
                    }
                    info!(%session_id, participant_id = %me, "participant left");
                    let remaining = session.participant_ids();
                    emit(Outbound::to_all(
                        remaining.clone(),
                        Notification::ParticipantLeft {
                            participant_id: me.clone(),
                        },
                    ));
                    if let Some(reveal) = outcome.reveal {
                        for notification in reveal_notifications(reveal) {
                            emit(Outbound::to_all(remaining.clone(), notification));
                        }
                    }
                    Ok(())
                })?
            }

            InboundEvent::SendEmoji {
                session_id,
                emoji,
                target_participant_id,
            } => {
                let session_id = parse_session_id(&session_id)?;
                validate_emoji(&emoji)?;
                self.sessions.with_session(&session_id, |session| -> Result<(), SessionError> {
                    let from = require_member(session, me)?;
                    emit(Outbound::to_all(
                        session.participant_ids(),
                        Notification::EmojiReceived {
                            emoji,
                            from,
                            to: target_participant_id,
                        },
                    ));
                    Ok(())
                })?
            }

            InboundEvent::UserCollision {
                session_id,
                attacker_id,
                target_id,
            } => {
                let session_id = parse_session_id(&session_id)?;
                self.sessions.with_session(&session_id, |session| -> Result<(), SessionError> {
                    require_member(session, me)?;
                    let name_of = |id: &ParticipantId| {
                        session
                            .participant(id)
                            .map_or_else(|| UNKNOWN_NAME.to_string(), |p| p.display_name.clone())
                    };
                    let notification = Notification::CollisionAnimation {
                        attacker_name: name_of(&attacker_id),
                        target_name: name_of(&target_id),
                        attacker_id,
                        target_id,
                    };
                    emit(Outbound::to_all(session.participant_ids(), notification));
                    Ok(())
                })?
            }

            InboundEvent::StartMiniGame { session_id, game_type } => {
                let session_id = parse_session_id(&session_id)?;
                validate_mini_game(&game_type)?;
                self.sessions.with_session(&session_id, |session| -> Result<(), SessionError> {
                    require_member(session, me)?;
                    info!(%session_id, participant_id = %me, game = %game_type, "mini-game started");
                    emit(Outbound::to_all(
                        session.participant_ids(),
                        Notification::MiniGameStarted { game_type },
                    ));
                    Ok(())
                })?
            }

            InboundEvent::MiniGameResult { session_id, result } => {
                let session_id = parse_session_id(&session_id)?;
                self.sessions.with_session(&session_id, |session| -> Result<(), SessionError> {
                    let participant = require_member(session, me)?;
                    emit(Outbound::to_all(
                        session.participant_ids(),
                        Notification::MiniGameResult { participant, result },
                    ));
                    Ok(())
                })?
            }
        }
    }
}

fn require_member(
    session: &Session,
    id: &ParticipantId,
) -> Result<ParticipantView, SessionError> {
    session
        .participant(id)
        .map(|p| p.view())
        .ok_or_else(|| SessionError::ParticipantNotInSession(id.to_string()))
}

fn others(session: &Session, id: &ParticipantId) -> Vec<ParticipantId> {
    session.presence().ids().filter(|other| *other != id).cloned().collect()
}

/// `voting-complete`, followed by the celebration when consensus was reached.
fn reveal_notifications(reveal: Reveal) -> Vec<Notification> {
    let celebrate = reveal.result.consensus_reached;
    let mut out = vec![Notification::VotingComplete {
        votes: reveal.votes,
        result: reveal.result,
    }];
    if celebrate {
        out.push(Notification::CelebrateConsensus);
    }
    out
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estima_core::notifications::Role;
    use estima_core::validation::issue_token;
    use estima_core::CardValue;
    use estima_session::SessionPolicy;
    use std::time::Duration;

    fn router() -> EventRouter {
        EventRouter::new(SessionRegistry::new(SessionPolicy::default()))
    }

    fn conn() -> ConnectionContext {
        ConnectionContext {
            connection_id: ParticipantId::new(),
            token: issue_token(),
        }
    }

    fn send(router: &EventRouter, ctx: &ConnectionContext, event: InboundEvent) -> Vec<Outbound> {
        router.handle(
            ctx,
            InboundEnvelope {
                token: Some(ctx.token.clone()),
                event,
            },
        )
    }

    fn join_as(router: &EventRouter, ctx: &ConnectionContext, name: &str, role: Role) -> Vec<Outbound> {
        send(
            router,
            ctx,
            InboundEvent::JoinSession {
                session_id: "ROOM1".into(),
                display_name: name.into(),
                avatar_ref: None,
                role,
            },
        )
    }

    fn join(router: &EventRouter, ctx: &ConnectionContext, name: &str) -> Vec<Outbound> {
        join_as(router, ctx, name, Role::Player)
    }

    fn vote(router: &EventRouter, ctx: &ConnectionContext, value: &str) -> Vec<Outbound> {
        send(
            router,
            ctx,
            InboundEvent::SubmitVote {
                session_id: "ROOM1".into(),
                value: CardValue::from(value),
            },
        )
    }

    fn kinds(out: &[Outbound]) -> Vec<&'static str> {
        out.iter().map(|o| o.notification.kind()).collect()
    }

    fn error_code(out: &[Outbound]) -> Option<String> {
        match out {
            [Outbound {
                notification: Notification::Error { code, .. },
                ..
            }] => Some(code.clone()),
            _ => None,
        }
    }

    fn room() -> SessionId {
        SessionId::from_raw("ROOM1")
    }

    #[test]
    fn join_sends_snapshot_to_self_and_announces_to_others() {
        let router = router();
        let (a, b) = (conn(), conn());
        let first = join(&router, &a, "Ada");
        assert_eq!(kinds(&first), vec!["session-snapshot", "participant-joined"]);
        assert_eq!(first[0].recipients, vec![a.connection_id.clone()]);
        assert!(first[1].recipients.is_empty());

        let second = join(&router, &b, "Bo");
        assert_eq!(second[0].recipients, vec![b.connection_id.clone()]);
        assert_eq!(second[1].recipients, vec![a.connection_id.clone()]);
        match &second[0].notification {
            Notification::SessionSnapshot { session, decks } => {
                assert_eq!(session.participants.len(), 2);
                assert_eq!(decks.len(), DeckKind::ALL.len());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(router.memberships(&a.connection_id), vec![room()]);
    }

    #[test]
    fn missing_token_is_rejected_before_mutation() {
        let router = router();
        let a = conn();
        let out = router.handle(
            &a,
            InboundEnvelope {
                token: None,
                event: InboundEvent::JoinSession {
                    session_id: "ROOM1".into(),
                    display_name: "Ada".into(),
                    avatar_ref: None,
                    role: Role::Player,
                },
            },
        );
        assert_eq!(error_code(&out).as_deref(), Some("AUTHENTICITY_REJECTED"));
        assert_eq!(out[0].recipients, vec![a.connection_id.clone()]);
        assert!(router.sessions().find(&room()).is_none());
    }

    #[test]
    fn token_of_another_connection_is_rejected() {
        let router = router();
        let (a, b) = (conn(), conn());
        join(&router, &a, "Ada");
        let out = router.handle(
            &a,
            InboundEnvelope {
                token: Some(b.token.clone()),
                event: InboundEvent::ResetVotes {
                    session_id: "ROOM1".into(),
                },
            },
        );
        assert_eq!(error_code(&out).as_deref(), Some("AUTHENTICITY_REJECTED"));
    }

    #[test]
    fn invalid_join_fields_are_rejected() {
        let router = router();
        let a = conn();
        let out = send(
            &router,
            &a,
            InboundEvent::JoinSession {
                session_id: "../etc".into(),
                display_name: "Ada".into(),
                avatar_ref: None,
                role: Role::Player,
            },
        );
        assert_eq!(error_code(&out).as_deref(), Some("INVALID_REQUEST"));

        let out = send(
            &router,
            &a,
            InboundEvent::JoinSession {
                session_id: "ROOM1".into(),
                display_name: "Ada".into(),
                avatar_ref: Some("/uploads/../secret".into()),
                role: Role::Player,
            },
        );
        assert_eq!(error_code(&out).as_deref(), Some("INVALID_REQUEST"));
        assert!(router.sessions().is_empty());
    }

    #[test]
    fn votes_count_up_then_reveal_with_celebration() {
        let router = router();
        let (a, b, c) = (conn(), conn(), conn());
        join(&router, &a, "Ada");
        join(&router, &b, "Bo");
        join(&router, &c, "Cy");

        let out = vote(&router, &a, "5");
        assert_eq!(kinds(&out), vec!["vote-updated", "vote-count"]);
        assert_eq!(out[1].recipients.len(), 3);
        assert_eq!(out[1].notification, Notification::VoteCount { current: 1, total: 3 });

        vote(&router, &b, "5");
        let out = vote(&router, &c, "5");
        assert_eq!(kinds(&out), vec!["vote-updated", "voting-complete", "celebrate-consensus"]);
        match &out[1].notification {
            Notification::VotingComplete { votes, result } => {
                assert_eq!(votes.len(), 3);
                assert_eq!(result.mode, Some(CardValue::from("5")));
                assert!(result.consensus_reached);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn split_reveal_has_no_celebration() {
        let router = router();
        let (a, b) = (conn(), conn());
        join(&router, &a, "Ada");
        join(&router, &b, "Bo");
        vote(&router, &a, "3");
        let out = vote(&router, &b, "8");
        assert_eq!(kinds(&out), vec!["vote-updated", "voting-complete"]);
    }

    #[test]
    fn vote_after_reveal_is_closed() {
        let router = router();
        let a = conn();
        join(&router, &a, "Ada");
        vote(&router, &a, "5");
        let out = vote(&router, &a, "8");
        assert_eq!(error_code(&out).as_deref(), Some("VOTING_CLOSED"));
    }

    #[test]
    fn vote_rejections() {
        let router = router();
        let (a, s, stranger) = (conn(), conn(), conn());
        join(&router, &a, "Ada");
        join_as(&router, &s, "Sam", Role::Spectator);

        assert_eq!(error_code(&vote(&router, &a, "7")).as_deref(), Some("INVALID_VOTE"));
        assert_eq!(error_code(&vote(&router, &s, "5")).as_deref(), Some("NOT_A_PLAYER"));
        assert_eq!(
            error_code(&vote(&router, &stranger, "5")).as_deref(),
            Some("PARTICIPANT_NOT_IN_SESSION")
        );
    }

    #[test]
    fn vote_in_unknown_session_is_not_found() {
        let router = router();
        let a = conn();
        assert_eq!(error_code(&vote(&router, &a, "5")).as_deref(), Some("SESSION_NOT_FOUND"));
    }

    #[test]
    fn reset_and_change_deck_broadcast() {
        let router = router();
        let (a, b) = (conn(), conn());
        join(&router, &a, "Ada");
        join(&router, &b, "Bo");
        vote(&router, &a, "5");

        let out = send(&router, &b, InboundEvent::ResetVotes { session_id: "ROOM1".into() });
        assert_eq!(kinds(&out), vec!["votes-reset"]);
        assert_eq!(out[0].recipients.len(), 2);

        let out = send(
            &router,
            &a,
            InboundEvent::ChangeDeck {
                session_id: "ROOM1".into(),
                deck_name: "tshirt".into(),
            },
        );
        assert_eq!(out[0].notification, Notification::deck_changed(DeckKind::Tshirt));

        let out = send(
            &router,
            &a,
            InboundEvent::ChangeDeck {
                session_id: "ROOM1".into(),
                deck_name: "poker".into(),
            },
        );
        assert_eq!(error_code(&out).as_deref(), Some("UNKNOWN_DECK"));
        let handle = router.sessions().find(&room()).unwrap();
        assert_eq!(handle.lock().active_deck(), DeckKind::Tshirt);
    }

    #[test]
    fn reset_requires_membership() {
        let router = router();
        let (a, stranger) = (conn(), conn());
        join(&router, &a, "Ada");
        let out = send(&router, &stranger, InboundEvent::ResetVotes { session_id: "ROOM1".into() });
        assert_eq!(error_code(&out).as_deref(), Some("PARTICIPANT_NOT_IN_SESSION"));
    }

    #[test]
    fn disconnect_of_last_non_voter_reveals_to_the_rest() {
        let router = router();
        let (a, b, c) = (conn(), conn(), conn());
        join(&router, &a, "Ada");
        join(&router, &b, "Bo");
        join(&router, &c, "Cy");
        vote(&router, &a, "5");
        vote(&router, &b, "8");

        let mut out = Vec::new();
        router.disconnect(&c.connection_id, &mut |msg| out.push(msg));
        assert_eq!(kinds(&out), vec!["participant-disconnected", "voting-complete"]);
        assert!(!out[0].recipients.contains(&c.connection_id));
        assert!(router.memberships(&c.connection_id).is_empty());

        let mut again = Vec::new();
        router.disconnect(&c.connection_id, &mut |msg| again.push(msg));
        assert!(again.is_empty());
    }

    #[test]
    fn disconnected_voter_keeps_vote() {
        let router = router();
        let (a, b) = (conn(), conn());
        join(&router, &a, "Ada");
        join(&router, &b, "Bo");
        vote(&router, &a, "13");
        router.disconnect(&a.connection_id, &mut |_| {});

        let out = vote(&router, &b, "13");
        match &out[1].notification {
            Notification::VotingComplete { votes, .. } => {
                assert_eq!(votes.get(&a.connection_id), Some(&CardValue::from("13")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn leave_notifies_remaining_and_can_reveal() {
        let router = router();
        let (a, b) = (conn(), conn());
        join(&router, &a, "Ada");
        join(&router, &b, "Bo");
        vote(&router, &a, "2");

        let out = send(&router, &b, InboundEvent::LeaveSession { session_id: "ROOM1".into() });
        // A lone vote is unanimous.
        assert_eq!(
            kinds(&out),
            vec!["participant-left", "voting-complete", "celebrate-consensus"]
        );
        assert_eq!(out[0].recipients, vec![a.connection_id.clone()]);
        assert!(router.memberships(&b.connection_id).is_empty());

        let out = send(&router, &b, InboundEvent::LeaveSession { session_id: "ROOM1".into() });
        assert_eq!(error_code(&out).as_deref(), Some("PARTICIPANT_NOT_IN_SESSION"));
    }

    #[test]
    fn heartbeat_refreshes_joined_sessions_only() {
        let router = router();
        let a = conn();
        join(&router, &a, "Ada");
        let before = router
            .sessions()
            .find(&room())
            .unwrap()
            .lock()
            .participant(&a.connection_id)
            .unwrap()
            .last_heartbeat_at;

        std::thread::sleep(Duration::from_millis(5));
        let out = send(&router, &a, InboundEvent::Heartbeat);
        assert!(out.is_empty());
        let after = router
            .sessions()
            .find(&room())
            .unwrap()
            .lock()
            .participant(&a.connection_id)
            .unwrap()
            .last_heartbeat_at;
        assert!(after > before);

        let stranger = conn();
        assert!(send(&router, &stranger, InboundEvent::Heartbeat).is_empty());
    }

    #[test]
    fn presence_sweep_disconnects_and_reveals() {
        let router = router();
        let (a, b) = (conn(), conn());
        join(&router, &a, "Ada");
        join(&router, &b, "Bo");
        vote(&router, &a, "3");

        let later = Utc::now() + chrono::TimeDelta::minutes(31);
        // Keep Ada fresh so only Bo times out.
        router
            .sessions()
            .with_session(&room(), |s| s.record_heartbeat(&a.connection_id, later))
            .unwrap();

        let mut out = Vec::new();
        let flipped = router.sweep_presence(later, &mut |msg| out.push(msg));
        assert_eq!(flipped, 1);
        assert_eq!(
            kinds(&out),
            vec!["participant-disconnected", "voting-complete", "celebrate-consensus"]
        );
    }

    #[test]
    fn session_sweep_drops_memberships() {
        let router = router();
        let a = conn();
        join(&router, &a, "Ada");
        router.disconnect(&a.connection_id, &mut |_| {});
        join(&router, &a, "Ada");
        router
            .sessions()
            .with_session(&room(), |s| s.disconnect(&a.connection_id, Utc::now()))
            .unwrap();

        let removed = router.sweep_sessions(Utc::now() + chrono::TimeDelta::hours(25));
        assert_eq!(removed, vec![room()]);
        assert!(router.memberships(&a.connection_id).is_empty());
        assert_eq!(error_code(&vote(&router, &a, "5")).as_deref(), Some("SESSION_NOT_FOUND"));
    }

    #[test]
    fn avatar_update_broadcasts_and_validates() {
        let router = router();
        let a = conn();
        join(&router, &a, "Ada");
        let out = send(
            &router,
            &a,
            InboundEvent::UpdateAvatar {
                session_id: "ROOM1".into(),
                avatar_ref: "/uploads/avatar-1.png".into(),
            },
        );
        assert_eq!(kinds(&out), vec!["avatar-updated"]);

        let out = send(
            &router,
            &a,
            InboundEvent::UpdateAvatar {
                session_id: "ROOM1".into(),
                avatar_ref: "https://evil.example/x.png".into(),
            },
        );
        assert_eq!(error_code(&out).as_deref(), Some("INVALID_REQUEST"));
    }

    #[test]
    fn emoji_is_relayed_from_members_only() {
        let router = router();
        let (a, b, stranger) = (conn(), conn(), conn());
        join(&router, &a, "Ada");
        join(&router, &b, "Bo");

        let out = send(
            &router,
            &a,
            InboundEvent::SendEmoji {
                session_id: "ROOM1".into(),
                emoji: "🎉".into(),
                target_participant_id: Some(b.connection_id.clone()),
            },
        );
        match &out[0].notification {
            Notification::EmojiReceived { from, to, .. } => {
                assert_eq!(from.display_name, "Ada");
                assert_eq!(to.as_ref(), Some(&b.connection_id));
            }
            other => panic!("unexpected {other:?}"),
        }

        let bad = send(
            &router,
            &a,
            InboundEvent::SendEmoji {
                session_id: "ROOM1".into(),
                emoji: "<script>".into(),
                target_participant_id: None,
            },
        );
        assert_eq!(error_code(&bad).as_deref(), Some("INVALID_REQUEST"));

        let outsider = send(
            &router,
            &stranger,
            InboundEvent::SendEmoji {
                session_id: "ROOM1".into(),
                emoji: "👍".into(),
                target_participant_id: None,
            },
        );
        assert_eq!(error_code(&outsider).as_deref(), Some("PARTICIPANT_NOT_IN_SESSION"));
    }

    #[test]
    fn collision_names_unknown_participants() {
        let router = router();
        let a = conn();
        join(&router, &a, "Ada");
        let ghost = ParticipantId::new();
        let out = send(
            &router,
            &a,
            InboundEvent::UserCollision {
                session_id: "ROOM1".into(),
                attacker_id: a.connection_id.clone(),
                target_id: ghost.clone(),
            },
        );
        assert_eq!(
            out[0].notification,
            Notification::CollisionAnimation {
                attacker_id: a.connection_id.clone(),
                target_id: ghost,
                attacker_name: "Ada".into(),
                target_name: "Unknown".into(),
            }
        );
    }

    #[test]
    fn mini_game_events() {
        let router = router();
        let a = conn();
        join(&router, &a, "Ada");

        let out = send(
            &router,
            &a,
            InboundEvent::StartMiniGame {
                session_id: "ROOM1".into(),
                game_type: "snake".into(),
            },
        );
        assert_eq!(kinds(&out), vec!["mini-game-started"]);

        let out = send(
            &router,
            &a,
            InboundEvent::StartMiniGame {
                session_id: "ROOM1".into(),
                game_type: "doom".into(),
            },
        );
        assert_eq!(error_code(&out).as_deref(), Some("INVALID_REQUEST"));

        let out = send(
            &router,
            &a,
            InboundEvent::MiniGameResult {
                session_id: "ROOM1".into(),
                result: serde_json::json!({"score": 42}),
            },
        );
        match &out[0].notification {
            Notification::MiniGameResult { participant, result } => {
                assert_eq!(participant.id, a.connection_id);
                assert_eq!(result["score"], 42);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cosmetic_events_leave_votes_alone() {
        let router = router();
        let (a, b) = (conn(), conn());
        join(&router, &a, "Ada");
        join(&router, &b, "Bo");
        vote(&router, &a, "5");
        send(
            &router,
            &b,
            InboundEvent::StartMiniGame {
                session_id: "ROOM1".into(),
                game_type: "reaction".into(),
            },
        );
        let handle = router.sessions().find(&room()).unwrap();
        assert_eq!(handle.lock().votes().len(), 1);
    }

    #[test]
    fn concurrent_votes_reveal_exactly_once() {
        let router = std::sync::Arc::new(router());
        let conns: Vec<ConnectionContext> = (0..8).map(|_| conn()).collect();
        for (i, ctx) in conns.iter().enumerate() {
            join(&router, ctx, &format!("P{i}"));
        }

        let handles: Vec<_> = conns
            .into_iter()
            .map(|ctx| {
                let router = std::sync::Arc::clone(&router);
                std::thread::spawn(move || vote(&router, &ctx, "8"))
            })
            .collect();
        let reveals = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .filter(|o| matches!(o.notification, Notification::VotingComplete { .. }))
            .count();
        assert_eq!(reveals, 1);
    }
}
