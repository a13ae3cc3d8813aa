//! The owned store of live sessions.
//!
//! Sessions are independent: each sits behind its own mutex, so events for
//! different sessions never contend beyond the map shard lookup. All
//! mutation of a session goes through [`SessionRegistry::with_session`] or
//! [`SessionRegistry::with_session_or_create`], which hold that mutex for the
//! whole closure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use estima_core::{SessionError, SessionId};
use parking_lot::Mutex;

use crate::policy::SessionPolicy;
use crate::session::Session;

pub type SessionHandle = Arc<Mutex<Session>>;

pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
    policy: SessionPolicy,
}

impl SessionRegistry {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Return the session, creating it in one atomic get-or-insert.
    pub fn get_or_create(&self, id: &SessionId, now: DateTime<Utc>) -> SessionHandle {
        let entry = self.sessions.entry(id.clone()).or_insert_with(|| {
            tracing::info!(session_id = %id, "session created");
            Arc::new(Mutex::new(Session::new(id.clone(), &self.policy, now)))
        });
        Arc::clone(entry.value())
    }

    pub fn find(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Run `f` on the session, creating it first if needed.
    ///
    /// A handle fetched just before the sweeper evicted it is discarded and
    /// the lookup retried, so `f` never runs against an orphaned session.
    pub fn with_session_or_create<R>(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Session) -> R,
    ) -> R {
        loop {
            let handle = self.get_or_create(id, now);
            let mut session = handle.lock();
            if session.is_evicted() {
                continue;
            }
            return f(&mut session);
        }
    }

    /// Run `f` on an existing session.
    pub fn with_session<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionError> {
        let handle = self
            .find(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        let mut session = handle.lock();
        if session.is_evicted() {
            return Err(SessionError::SessionNotFound(id.to_string()));
        }
        Ok(f(&mut session))
    }

    /// Visit every live session, one lock at a time.
    pub fn for_each_session(&self, mut f: impl FnMut(&mut Session)) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in handles {
            let mut session = handle.lock();
            if !session.is_evicted() {
                f(&mut session);
            }
        }
    }

    /// Evict sessions nobody has been connected to within the session TTL.
    ///
    /// Sessions busy with an event are skipped and looked at on the next sweep.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let ttl = self.policy.session_ttl;
        let mut removed = Vec::new();
        self.sessions.retain(|id, handle| {
            let Some(mut session) = handle.try_lock() else {
                return true;
            };
            if session.is_stale(now, ttl) {
                session.mark_evicted();
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "evicted stale sessions");
        }
        removed
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}
