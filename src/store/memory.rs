//! In-memory store implementation.
//!
//! Backs the test suites and local development. Each operation performs its
//! guard check and mutation while holding the map's write lock, which gives
//! the same atomicity the SQL implementation gets from WHERE-guarded
//! UPDATEs. Timestamps are taken inside the critical section.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::anomaly::SessionSample;
use crate::errors::StoreResult;
use crate::models::{
    ActivityEntry, AuditAction, AuditEntry, LogoutReason, Notification, Session, SessionSummary,
};

use super::{
    AuditReportFilter, AuditStore, NewSession, NotificationSink, SessionStore, SweptSession,
};

/// One store serving all three traits, so a test wires a single object
/// everywhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    audit: RwLock<Vec<AuditEntry>>,
    feed: RwLock<Vec<ActivityEntry>>,
    user_notifications: RwLock<HashMap<String, Vec<Notification>>>,
    admin_broadcasts: RwLock<Vec<Notification>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw session row, for assertions.
    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.read().await.clone()
    }

    pub async fn feed_entries(&self) -> Vec<ActivityEntry> {
        self.feed.read().await.clone()
    }

    pub async fn notifications_for(&self, user_id: &str) -> Vec<Notification> {
        self.user_notifications
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn admin_broadcasts(&self) -> Vec<Notification> {
        self.admin_broadcasts.read().await.clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, new: NewSession, max_age: Duration) -> StoreResult<Session> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let session = Session {
            session_id: new.session_id.clone(),
            user_id: new.user_id,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            device_info: new.device_info,
            location_info: new.location_info,
            login_at: now,
            last_activity: now,
            expires_at: now + max_age,
            is_active: true,
            logout_at: None,
            logout_reason: None,
        };
        sessions.insert(new.session_id, session.clone());
        Ok(session)
    }

    async fn touch_session(
        &self,
        session_id: &str,
        extend: Option<Duration>,
    ) -> StoreResult<Option<Session>> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if !session.is_active || session.expires_at <= now {
            return Ok(None);
        }
        session.last_activity = now;
        if let Some(extend) = extend {
            session.expires_at = session.expires_at.max(now + extend);
        }
        Ok(Some(session.clone()))
    }

    async fn extend_session(&self, session_id: &str, max_age: Duration) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(false);
        };
        if !session.is_active {
            return Ok(false);
        }
        session.expires_at = session.expires_at.max(now + max_age);
        session.last_activity = now;
        Ok(true)
    }

    async fn invalidate_session(
        &self,
        session_id: &str,
        reason: LogoutReason,
    ) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(false);
        };
        if !session.is_active {
            return Ok(false);
        }
        session.is_active = false;
        session.logout_at = Some(now);
        session.logout_reason = Some(reason);
        Ok(true)
    }

    async fn invalidate_user_sessions(
        &self,
        user_id: &str,
        reason: LogoutReason,
    ) -> StoreResult<u64> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                session.logout_at = Some(now);
                session.logout_reason = Some(reason);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn count_active(&self, user_id: &str) -> StoreResult<i64> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .count() as i64)
    }

    async fn evict_oldest_active(
        &self,
        user_id: &str,
        count: i64,
        reason: LogoutReason,
    ) -> StoreResult<Vec<String>> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let mut candidates: Vec<(String, chrono::DateTime<Utc>)> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .map(|s| (s.session_id.clone(), s.login_at))
            .collect();
        candidates.sort_by_key(|(_, login_at)| *login_at);
        candidates.truncate(count.max(0) as usize);

        let mut evicted = Vec::with_capacity(candidates.len());
        for (session_id, _) in candidates {
            if let Some(session) = sessions.get_mut(&session_id) {
                session.is_active = false;
                session.logout_at = Some(now);
                session.logout_reason = Some(reason);
                evicted.push(session_id);
            }
        }
        Ok(evicted)
    }

    async fn user_sessions(&self, user_id: &str) -> StoreResult<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .map(SessionSummary::from)
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(summaries)
    }

    async fn sweep_expired(&self) -> StoreResult<Vec<SweptSession>> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let mut swept = Vec::new();
        for session in sessions.values_mut() {
            if session.is_active && session.expires_at <= now {
                session.is_active = false;
                session.logout_at = Some(now);
                session.logout_reason = Some(LogoutReason::SessionExpired);
                swept.push(SweptSession {
                    session_id: session.session_id.clone(),
                    user_id: session.user_id.clone(),
                });
            }
        }
        Ok(swept)
    }

    async fn activity_window(
        &self,
        user_id: &str,
        window: Duration,
    ) -> StoreResult<Vec<SessionSample>> {
        let sessions = self.sessions.read().await;
        let cutoff = Utc::now() - window;
        Ok(sessions
            .values()
            .filter(|s| s.user_id == user_id && s.login_at > cutoff)
            .map(|s| SessionSample {
                ip_address: s.ip_address.clone(),
                login_at: s.login_at,
            })
            .collect())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_entry(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.audit.write().await.push(entry.clone());
        Ok(())
    }

    async fn insert_activity(&self, entry: &ActivityEntry) -> StoreResult<()> {
        self.feed.write().await.push(entry.clone());
        Ok(())
    }

    async fn count_recent(
        &self,
        user_id: &str,
        action: AuditAction,
        window: Duration,
    ) -> StoreResult<i64> {
        let audit = self.audit.read().await;
        let cutoff = Utc::now() - window;
        Ok(audit
            .iter()
            .filter(|e| {
                e.user_id.as_deref() == Some(user_id)
                    && e.action == action
                    && e.created_at > cutoff
            })
            .count() as i64)
    }

    async fn query_entries(
        &self,
        filter: &AuditReportFilter,
        limit: i64,
    ) -> StoreResult<Vec<AuditEntry>> {
        let audit = self.audit.read().await;
        let mut entries: Vec<AuditEntry> = audit
            .iter()
            .filter(|e| {
                filter.from.map_or(true, |from| e.created_at >= from)
                    && filter.to.map_or(true, |to| e.created_at <= to)
                    && filter
                        .user_id
                        .as_ref()
                        .map_or(true, |u| e.user_id.as_deref() == Some(u.as_str()))
                    && filter.action.map_or(true, |a| e.action == a)
                    && filter
                        .table_name
                        .as_ref()
                        .map_or(true, |t| e.table_name.as_deref() == Some(t.as_str()))
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }
}

#[async_trait]
impl NotificationSink for MemoryStore {
    async fn notify_user(&self, user_id: &str, notification: Notification) -> StoreResult<()> {
        self.user_notifications
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .push(notification);
        Ok(())
    }

    async fn broadcast_admins(&self, notification: Notification) -> StoreResult<()> {
        self.admin_broadcasts.write().await.push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::classify_device;
    use crate::models::LocationInfo;

    fn new_session(id: &str, user: &str, ip: &str) -> NewSession {
        NewSession {
            session_id: id.to_string(),
            user_id: user.to_string(),
            ip_address: ip.to_string(),
            user_agent: "test-agent".to_string(),
            device_info: classify_device("test-agent"),
            location_info: LocationInfo::unknown(),
        }
    }

    #[tokio::test]
    async fn invalidation_is_terminal_and_exactly_once() {
        let store = MemoryStore::new();
        store
            .insert_session(new_session("s1", "u1", "10.0.0.1"), Duration::minutes(30))
            .await
            .unwrap();

        assert!(store
            .invalidate_session("s1", LogoutReason::ManualLogout)
            .await
            .unwrap());
        // Second invalidation loses the race: zero rows matched.
        assert!(!store
            .invalidate_session("s1", LogoutReason::Security)
            .await
            .unwrap());

        let row = store.session("s1").await.unwrap();
        assert!(!row.is_active);
        assert_eq!(row.logout_reason, Some(LogoutReason::ManualLogout));
        assert!(row.logout_at.is_some());
    }

    #[tokio::test]
    async fn touch_misses_inactive_and_expired_rows() {
        let store = MemoryStore::new();
        store
            .insert_session(new_session("live", "u1", "10.0.0.1"), Duration::minutes(30))
            .await
            .unwrap();
        store
            .insert_session(new_session("dead", "u1", "10.0.0.1"), Duration::zero())
            .await
            .unwrap();

        assert!(store.touch_session("live", None).await.unwrap().is_some());
        assert!(store.touch_session("dead", None).await.unwrap().is_none());
        assert!(store.touch_session("missing", None).await.unwrap().is_none());

        store
            .invalidate_session("live", LogoutReason::ManualLogout)
            .await
            .unwrap();
        assert!(store.touch_session("live", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_only_returns_transitioned_rows() {
        let store = MemoryStore::new();
        store
            .insert_session(new_session("a", "u1", "10.0.0.1"), Duration::zero())
            .await
            .unwrap();
        store
            .insert_session(new_session("b", "u1", "10.0.0.1"), Duration::minutes(30))
            .await
            .unwrap();

        let swept = store.sweep_expired().await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].session_id, "a");

        // Idempotent: the row is terminal now, a second sweep matches nothing.
        assert!(store.sweep_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn eviction_picks_oldest_logins_first() {
        let store = MemoryStore::new();
        for id in ["first", "second", "third"] {
            store
                .insert_session(new_session(id, "u1", "10.0.0.1"), Duration::minutes(30))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let evicted = store
            .evict_oldest_active("u1", 2, LogoutReason::MaxSessionsExceeded)
            .await
            .unwrap();
        assert_eq!(evicted, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(store.count_active("u1").await.unwrap(), 1);
    }
}
