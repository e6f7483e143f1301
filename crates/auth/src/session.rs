//! Session Store Implementation

use crate::AuthError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Default session lifetime
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 12;

/// An authenticated session bound to one organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-process session store
pub struct SessionStore {
    /// Sessions by token
    sessions: Mutex<HashMap<String, Session>>,
    /// Session lifetime
    ttl: Duration,
}

impl SessionStore {
    /// Create a new session store with the given lifetime
    pub fn new(ttl_hours: i64) -> Self {
        info!("Creating session store (ttl: {}h)", ttl_hours);
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Issue a new session for a member of an organization
    pub fn issue(&self, user_id: Uuid, organization_id: Uuid) -> Result<Session, AuthError> {
        self.issue_at(user_id, organization_id, Utc::now())
    }

    fn issue_at(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let session = Session {
            token: new_token(),
            user_id,
            organization_id,
            issued_at: now,
            expires_at: now + self.ttl,
        };

        let mut sessions = self.lock()?;
        sessions.insert(session.token.clone(), session.clone());
        debug!("Issued session for user {} in {}", user_id, organization_id);

        Ok(session)
    }

    /// Resolve a bearer token into its session
    pub fn resolve(&self, token: &str) -> Result<Session, AuthError> {
        self.resolve_at(token, Utc::now())
    }

    fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> Result<Session, AuthError> {
        let mut sessions = self.lock()?;
        match sessions.get(token) {
            None => Err(AuthError::InvalidToken),
            Some(session) if session.is_expired(now) => {
                sessions.remove(token);
                Err(AuthError::Expired)
            }
            Some(session) => Ok(session.clone()),
        }
    }

    /// Revoke a single token. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> Result<bool, AuthError> {
        Ok(self.lock()?.remove(token).is_some())
    }

    /// Revoke every session of a user inside one organization
    pub fn revoke_member(&self, user_id: Uuid, organization_id: Uuid) -> Result<usize, AuthError> {
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, s| !(s.user_id == user_id && s.organization_id == organization_id));
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Revoked {} session(s) of user {}", removed, user_id);
        }
        Ok(removed)
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, AuthError> {
        self.purge_expired_at(Utc::now())
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!("Purged {} expired session(s)", removed);
        }
        Ok(removed)
    }

    /// Number of stored sessions, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>, AuthError> {
        self.sessions
            .lock()
            .map_err(|e| AuthError::Store(format!("Lock error: {}", e)))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL_HOURS)
    }
}

fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_resolve() {
        let store = SessionStore::default();
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        let session = store.issue(user, org).unwrap();
        assert_eq!(session.token.len(), 64);

        let resolved = store.resolve(&session.token).unwrap();
        assert_eq!(resolved.user_id, user);
        assert_eq!(resolved.organization_id, org);
    }

    #[test]
    fn test_unknown_token() {
        let store = SessionStore::default();
        assert_eq!(store.resolve("nope"), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_expired_session_is_dropped() {
        let store = SessionStore::new(1);
        let issued = Utc::now() - Duration::hours(2);
        let session = store.issue_at(Uuid::new_v4(), Uuid::new_v4(), issued).unwrap();

        assert_eq!(store.resolve(&session.token), Err(AuthError::Expired));
        assert_eq!(store.resolve(&session.token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_revoke() {
        let store = SessionStore::default();
        let session = store.issue(Uuid::new_v4(), Uuid::new_v4()).unwrap();

        assert!(store.revoke(&session.token).unwrap());
        assert!(!store.revoke(&session.token).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_revoke_member_is_scoped_to_organization() {
        let store = SessionStore::default();
        let user = Uuid::new_v4();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();

        store.issue(user, org_a).unwrap();
        store.issue(user, org_a).unwrap();
        let other = store.issue(user, org_b).unwrap();

        assert_eq!(store.revoke_member(user, org_a).unwrap(), 2);
        assert!(store.resolve(&other.token).is_ok());
    }

    #[test]
    fn test_purge_expired_drops_unused_sessions() {
        let store = SessionStore::new(1);
        let stale = Utc::now() - Duration::hours(2);
        for _ in 0..1000 {
            store.issue_at(Uuid::new_v4(), Uuid::new_v4(), stale).unwrap();
        }
        let live = store.issue(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert_eq!(store.len(), 1001);

        assert_eq!(store.purge_expired().unwrap(), 1000);
        assert_eq!(store.len(), 1);
        assert!(store.resolve(&live.token).is_ok());
    }

    #[test]
    fn test_zero_ttl_sessions_are_purged() {
        let store = SessionStore::new(0);
        let now = Utc::now();
        store.issue_at(Uuid::new_v4(), Uuid::new_v4(), now).unwrap();

        assert_eq!(store.purge_expired_at(now).unwrap(), 1);
        assert!(store.is_empty());
    }
}
