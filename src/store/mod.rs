//! Storage traits for the session and audit subsystems.
//!
//! All session mutation is expressed as conditional update semantics: each
//! method either performs its guard check and mutation atomically (SQL
//! WHERE-guarded UPDATE) or inside one critical section (in-memory store).
//! Implementations must also compute "now" themselves so timestamps are never
//! client-supplied; this keeps `last_activity` monotonic across the two
//! concurrent writers (request path and expiry sweep).

use async_trait::async_trait;
use chrono::Duration;

use crate::anomaly::SessionSample;
use crate::errors::StoreResult;
use crate::models::{
    ActivityEntry, AuditAction, AuditEntry, LogoutReason, Notification, Session, SessionSummary,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::SqlStore;

/// Fields supplied by the caller when a session row is created; lifecycle
/// timestamps are filled in by the store.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub user_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub device_info: crate::models::DeviceInfo,
    pub location_info: crate::models::LocationInfo,
}

/// A session transitioned to expired by the sweep, identified for event
/// logging.
#[derive(Debug, Clone)]
pub struct SweptSession {
    pub session_id: String,
    pub user_id: String,
}

/// Optional filters for an audit report query. Empty filter selects
/// everything (up to the row cap).
#[derive(Debug, Clone, Default)]
pub struct AuditReportFilter {
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    pub to: Option<chrono::DateTime<chrono::Utc>>,
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub table_name: Option<String>,
}

/// Durable session table operations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new active session expiring `max_age` from now.
    async fn insert_session(&self, new: NewSession, max_age: Duration) -> StoreResult<Session>;

    /// Conditional touch: match the row only while
    /// `is_active AND expires_at > now`. On a hit, bump `last_activity` to
    /// now and, when `extend` is set, slide `expires_at` forward to
    /// `max(expires_at, now + extend)` — the expiry is never shortened.
    /// Returns the updated row, or `None` when the guard matched nothing.
    async fn touch_session(
        &self,
        session_id: &str,
        extend: Option<Duration>,
    ) -> StoreResult<Option<Session>>;

    /// Slide `expires_at` forward to `max(expires_at, now + max_age)` if the
    /// session is still active. Returns whether a row was updated.
    async fn extend_session(&self, session_id: &str, max_age: Duration) -> StoreResult<bool>;

    /// Terminal transition, guarded by `is_active = TRUE`. The later of two
    /// concurrent invalidations matches zero rows and returns `false`.
    async fn invalidate_session(
        &self,
        session_id: &str,
        reason: LogoutReason,
    ) -> StoreResult<bool>;

    /// Bulk terminal transition for every active session of a user. Returns
    /// the number of rows transitioned.
    async fn invalidate_user_sessions(
        &self,
        user_id: &str,
        reason: LogoutReason,
    ) -> StoreResult<u64>;

    /// Count of currently-active sessions for a user.
    async fn count_active(&self, user_id: &str) -> StoreResult<i64>;

    /// Invalidate the `count` oldest active sessions (by `login_at`) for a
    /// user, returning the evicted session ids.
    async fn evict_oldest_active(
        &self,
        user_id: &str,
        count: i64,
        reason: LogoutReason,
    ) -> StoreResult<Vec<String>>;

    /// Active-session projections for a user, ordered by `last_activity`
    /// descending.
    async fn user_sessions(&self, user_id: &str) -> StoreResult<Vec<SessionSummary>>;

    /// One conditional bulk UPDATE flipping every row with
    /// `is_active AND expires_at <= now` to expired, returning exactly the
    /// transitioned rows. Rows lost to a racing invalidation are not
    /// returned, so callers can log one event per row without duplicates.
    async fn sweep_expired(&self) -> StoreResult<Vec<SweptSession>>;

    /// Login observations for a user within the trailing window, for the
    /// anomaly heuristics.
    async fn activity_window(
        &self,
        user_id: &str,
        window: Duration,
    ) -> StoreResult<Vec<SessionSample>>;
}

/// Write-once audit trail plus the user-visible activity feed.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_entry(&self, entry: &AuditEntry) -> StoreResult<()>;

    async fn insert_activity(&self, entry: &ActivityEntry) -> StoreResult<()>;

    /// Count of entries with the given action for a user within the trailing
    /// window.
    async fn count_recent(
        &self,
        user_id: &str,
        action: AuditAction,
        window: Duration,
    ) -> StoreResult<i64>;

    /// Filtered query over the audit trail, newest first, capped at `limit`
    /// rows.
    async fn query_entries(
        &self,
        filter: &AuditReportFilter,
        limit: i64,
    ) -> StoreResult<Vec<AuditEntry>>;
}

/// External interface recording user- and admin-facing alerts.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_user(&self, user_id: &str, notification: Notification) -> StoreResult<()>;

    /// Deliver one copy of the notification to every admin account.
    async fn broadcast_admins(&self, notification: Notification) -> StoreResult<()>;
}
