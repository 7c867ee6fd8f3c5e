//! Postgres store implementation.
//!
//! Every session mutation is a WHERE-guarded UPDATE: the database's atomic
//! conditional update is the only concurrency primitive, and `NOW()` is
//! always evaluated inside the statement so timestamps come from the storage
//! layer. Do not rewrite any of these as read-then-write.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::str::FromStr;
use std::sync::Arc;

use crate::anomaly::SessionSample;
use crate::errors::{StoreError, StoreResult};
use crate::models::{
    ActivityEntry, AuditAction, AuditEntry, AuditStatus, DeviceInfo, LocationInfo, LogoutReason,
    Notification, Session, SessionSummary,
};

use super::{
    AuditReportFilter, AuditStore, NewSession, NotificationSink, SessionStore, SweptSession,
};

const SESSION_COLUMNS: &str = "session_id, user_id, ip_address, user_agent, device_info, \
     location_info, login_at, last_activity, expires_at, is_active, logout_at, logout_reason";

const AUDIT_COLUMNS: &str = "request_id, table_name, record_id, action, user_id, user_role, \
     ip_address, user_agent, old_values, new_values, session_id, duration_ms, status, \
     error_message, created_at";

/// Postgres-backed implementation of all three store traits, sharing one
/// connection pool.
#[derive(Clone)]
pub struct SqlStore {
    pool: Arc<PgPool>,
}

impl SqlStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn row_to_session(row: &PgRow) -> Result<Session, sqlx::Error> {
    let device_info: Json<DeviceInfo> = row.try_get("device_info")?;
    let location_info: Json<LocationInfo> = row.try_get("location_info")?;
    let logout_reason: Option<String> = row.try_get("logout_reason")?;
    let logout_reason = match logout_reason {
        Some(value) => Some(LogoutReason::from_str(&value).map_err(|e| {
            sqlx::Error::Decode(e.into())
        })?),
        None => None,
    };
    Ok(Session {
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        device_info: device_info.0,
        location_info: location_info.0,
        login_at: row.try_get("login_at")?,
        last_activity: row.try_get("last_activity")?,
        expires_at: row.try_get("expires_at")?,
        is_active: row.try_get("is_active")?,
        logout_at: row.try_get("logout_at")?,
        logout_reason,
    })
}

fn row_to_audit_entry(row: &PgRow) -> StoreResult<AuditEntry> {
    let action: String = row.try_get("action").map_err(StoreError::from)?;
    let status: String = row.try_get("status").map_err(StoreError::from)?;
    Ok(AuditEntry {
        request_id: row.try_get("request_id").map_err(StoreError::from)?,
        table_name: row.try_get("table_name").map_err(StoreError::from)?,
        record_id: row.try_get("record_id").map_err(StoreError::from)?,
        action: AuditAction::from_str(&action).map_err(StoreError::Decode)?,
        user_id: row.try_get("user_id").map_err(StoreError::from)?,
        user_role: row.try_get("user_role").map_err(StoreError::from)?,
        ip_address: row.try_get("ip_address").map_err(StoreError::from)?,
        user_agent: row.try_get("user_agent").map_err(StoreError::from)?,
        old_values: row.try_get("old_values").map_err(StoreError::from)?,
        new_values: row.try_get("new_values").map_err(StoreError::from)?,
        session_id: row.try_get("session_id").map_err(StoreError::from)?,
        duration_ms: row.try_get("duration_ms").map_err(StoreError::from)?,
        status: AuditStatus::from_str(&status).map_err(StoreError::Decode)?,
        error_message: row.try_get("error_message").map_err(StoreError::from)?,
        created_at: row.try_get("created_at").map_err(StoreError::from)?,
    })
}

#[async_trait]
impl SessionStore for SqlStore {
    async fn insert_session(&self, new: NewSession, max_age: Duration) -> StoreResult<Session> {
        let sql = format!(
            "INSERT INTO user_sessions \
             (session_id, user_id, ip_address, user_agent, device_info, location_info, \
              login_at, last_activity, expires_at, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW(), \
                     NOW() + make_interval(secs => $7), TRUE) \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&new.session_id)
            .bind(&new.user_id)
            .bind(&new.ip_address)
            .bind(&new.user_agent)
            .bind(Json(&new.device_info))
            .bind(Json(&new.location_info))
            .bind(max_age.num_seconds() as f64)
            .fetch_one(&*self.pool)
            .await?;
        Ok(row_to_session(&row)?)
    }

    async fn touch_session(
        &self,
        session_id: &str,
        extend: Option<Duration>,
    ) -> StoreResult<Option<Session>> {
        // One atomic statement: the WHERE clause is the validity check, the
        // SET clause the activity bump and optional sliding extension.
        let sql = format!(
            "UPDATE user_sessions \
             SET last_activity = NOW(), \
                 expires_at = CASE WHEN $2::double precision IS NULL THEN expires_at \
                              ELSE GREATEST(expires_at, NOW() + make_interval(secs => $2)) END \
             WHERE session_id = $1 AND is_active = TRUE AND expires_at > NOW() \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(session_id)
            .bind(extend.map(|d| d.num_seconds() as f64))
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_session).transpose()?)
    }

    async fn extend_session(&self, session_id: &str, max_age: Duration) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE user_sessions \
             SET expires_at = GREATEST(expires_at, NOW() + make_interval(secs => $2)), \
                 last_activity = NOW() \
             WHERE session_id = $1 AND is_active = TRUE",
        )
        .bind(session_id)
        .bind(max_age.num_seconds() as f64)
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn invalidate_session(
        &self,
        session_id: &str,
        reason: LogoutReason,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE user_sessions \
             SET is_active = FALSE, logout_at = NOW(), logout_reason = $2 \
             WHERE session_id = $1 AND is_active = TRUE",
        )
        .bind(session_id)
        .bind(reason.as_str())
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn invalidate_user_sessions(
        &self,
        user_id: &str,
        reason: LogoutReason,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE user_sessions \
             SET is_active = FALSE, logout_at = NOW(), logout_reason = $2 \
             WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .bind(reason.as_str())
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_active(&self, user_id: &str) -> StoreResult<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM user_sessions WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .fetch_one(&*self.pool)
        .await?;
        Ok(count.0)
    }

    async fn evict_oldest_active(
        &self,
        user_id: &str,
        count: i64,
        reason: LogoutReason,
    ) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            "UPDATE user_sessions \
             SET is_active = FALSE, logout_at = NOW(), logout_reason = $2 \
             WHERE is_active = TRUE AND session_id IN ( \
                 SELECT session_id FROM user_sessions \
                 WHERE user_id = $1 AND is_active = TRUE \
                 ORDER BY login_at ASC LIMIT $3) \
             RETURNING session_id",
        )
        .bind(user_id)
        .bind(reason.as_str())
        .bind(count)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("session_id").map_err(StoreError::from))
            .collect()
    }

    async fn user_sessions(&self, user_id: &str) -> StoreResult<Vec<SessionSummary>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions \
             WHERE user_id = $1 AND is_active = TRUE \
             ORDER BY last_activity DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&*self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let session = row_to_session(row)?;
                Ok(SessionSummary::from(&session))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn sweep_expired(&self) -> StoreResult<Vec<SweptSession>> {
        // Same guard as invalidate_session, so a racing manual logout and
        // this sweep can never both claim the same row.
        let rows = sqlx::query(
            "UPDATE user_sessions \
             SET is_active = FALSE, logout_at = NOW(), logout_reason = 'session_expired' \
             WHERE is_active = TRUE AND expires_at <= NOW() \
             RETURNING session_id, user_id",
        )
        .fetch_all(&*self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(SweptSession {
                    session_id: row.try_get("session_id")?,
                    user_id: row.try_get("user_id")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn activity_window(
        &self,
        user_id: &str,
        window: Duration,
    ) -> StoreResult<Vec<SessionSample>> {
        let rows = sqlx::query(
            "SELECT ip_address, login_at FROM user_sessions \
             WHERE user_id = $1 AND login_at > NOW() - make_interval(secs => $2)",
        )
        .bind(user_id)
        .bind(window.num_seconds() as f64)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(SessionSample {
                    ip_address: row.try_get("ip_address")?,
                    login_at: row.try_get("login_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl AuditStore for SqlStore {
    async fn insert_entry(&self, entry: &AuditEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audit_trails \
             (request_id, table_name, record_id, action, user_id, user_role, ip_address, \
              user_agent, old_values, new_values, session_id, duration_ms, status, \
              error_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW())",
        )
        .bind(&entry.request_id)
        .bind(&entry.table_name)
        .bind(&entry.record_id)
        .bind(entry.action.as_str())
        .bind(&entry.user_id)
        .bind(&entry.user_role)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(&entry.session_id)
        .bind(entry.duration_ms)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn insert_activity(&self, entry: &ActivityEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO activity_feed \
             (actor_id, action, object_type, object_id, description, visibility, \
              importance, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
        )
        .bind(&entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.object_type)
        .bind(&entry.object_id)
        .bind(&entry.description)
        .bind(&entry.visibility)
        .bind(&entry.importance)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn count_recent(
        &self,
        user_id: &str,
        action: AuditAction,
        window: Duration,
    ) -> StoreResult<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM audit_trails \
             WHERE user_id = $1 AND action = $2 \
               AND created_at > NOW() - make_interval(secs => $3)",
        )
        .bind(user_id)
        .bind(action.as_str())
        .bind(window.num_seconds() as f64)
        .fetch_one(&*self.pool)
        .await?;
        Ok(count.0)
    }

    async fn query_entries(
        &self,
        filter: &AuditReportFilter,
        limit: i64,
    ) -> StoreResult<Vec<AuditEntry>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {AUDIT_COLUMNS} FROM audit_trails WHERE 1 = 1"));

        if let Some(from) = filter.from {
            builder.push(" AND created_at >= ");
            builder.push_bind::<DateTime<Utc>>(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND created_at <= ");
            builder.push_bind::<DateTime<Utc>>(to);
        }
        if let Some(ref user_id) = filter.user_id {
            builder.push(" AND user_id = ");
            builder.push_bind(user_id.clone());
        }
        if let Some(action) = filter.action {
            builder.push(" AND action = ");
            builder.push_bind(action.as_str());
        }
        if let Some(ref table_name) = filter.table_name {
            builder.push(" AND table_name = ");
            builder.push_bind(table_name.clone());
        }
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(limit);

        let rows = builder.build().fetch_all(&*self.pool).await?;
        rows.iter().map(row_to_audit_entry).collect()
    }
}

#[async_trait]
impl NotificationSink for SqlStore {
    async fn notify_user(&self, user_id: &str, notification: Notification) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO notifications \
             (user_id, title, message, type, priority, category, is_read, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, FALSE, NOW())",
        )
        .bind(user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.kind)
        .bind(&notification.priority)
        .bind(&notification.category)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn broadcast_admins(&self, notification: Notification) -> StoreResult<()> {
        // Fan out one row per admin account; the users table is
        // collaborator-owned.
        sqlx::query(
            "INSERT INTO notifications \
             (user_id, title, message, type, priority, category, is_read, created_at) \
             SELECT u.id, $1, $2, $3, $4, $5, FALSE, NOW() \
             FROM users u WHERE u.role = 'admin'",
        )
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.kind)
        .bind(&notification.priority)
        .bind(&notification.category)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }
}
