//! Audit-trail pipeline.
//!
//! [`AuditLogger`] wraps every state-changing request at the framework
//! boundary: the HTTP layer (an external collaborator) hands it a typed
//! request/response capture per request, and it classifies the action,
//! redacts sensitive fields, and persists one write-once audit entry.
//! Logging failures are caught and written to the diagnostic stream — the
//! audit path never fails the request it describes.

use chrono::{Duration, Utc};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::models::{ActivityEntry, AuditAction, AuditEntry, AuditStatus, Notification};
use crate::store::{AuditReportFilter, AuditStore, NotificationSink};

/// Field names whose values are replaced with [`REDACTED`] in persisted
/// request/response bodies. Matched case-insensitively at any nesting depth.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "apiKey",
    "creditCard",
    "ssn",
    "pin",
    "cvv",
    "accountNumber",
];

const REDACTED: &str = "[REDACTED]";

/// Actions that additionally project into the user-visible activity feed
/// when the request succeeded.
const FEED_ACTIONS: &[AuditAction] = &[
    AuditAction::Insert,
    AuditAction::Update,
    AuditAction::Delete,
    AuditAction::Login,
];

/// What the HTTP layer captured about the inbound request.
#[derive(Debug, Clone)]
pub struct RequestCapture {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub user_id: Option<String>,
    pub user_role: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    /// Request body, when the route carries one worth auditing.
    pub body: Option<Value>,
}

impl RequestCapture {
    /// Capture with a fresh correlation id and no identity attached.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method,
            path: path.into(),
            user_id: None,
            user_role: None,
            ip_address: None,
            user_agent: None,
            session_id: None,
            body: None,
        }
    }
}

/// What the HTTP layer captured about the outbound response.
#[derive(Debug, Clone)]
pub struct ResponseCapture {
    pub status: StatusCode,
    pub body: Option<Value>,
    pub error_message: Option<String>,
    pub duration: std::time::Duration,
}

/// Summary aggregate over a report's entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_events: usize,
    pub unique_users: usize,
    pub days_covered: usize,
    pub avg_duration_ms: f64,
    pub error_count: usize,
}

/// Filtered slice of the audit trail plus its summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub entries: Vec<AuditEntry>,
    pub summary: AuditSummary,
}

/// Persists audit entries and the activity feed; escalates repeated
/// authorization failures.
pub struct AuditLogger {
    config: AuditConfig,
    store: Arc<dyn AuditStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl AuditLogger {
    #[must_use]
    pub fn new(
        config: AuditConfig,
        store: Arc<dyn AuditStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
        }
    }

    /// Record one completed request/response pair. Never fails: every error
    /// is logged to the diagnostic stream and swallowed.
    pub async fn log_request(&self, request: &RequestCapture, response: &ResponseCapture) {
        let action = classify_action(&request.method, response.status);
        let (table_name, record_id) = derive_target(&request.path);
        let status = if response.status.is_success() {
            AuditStatus::Success
        } else {
            AuditStatus::Error
        };

        let entry = AuditEntry {
            request_id: request.request_id.clone(),
            table_name,
            record_id,
            action,
            user_id: request.user_id.clone(),
            user_role: request.user_role.clone(),
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
            old_values: request.body.clone().map(sanitize_data),
            new_values: response.body.clone().map(sanitize_data),
            session_id: request.session_id.clone(),
            duration_ms: response.duration.as_millis() as i64,
            status,
            error_message: response.error_message.clone(),
            created_at: Utc::now(),
        };

        self.persist(entry).await;
    }

    /// Record a login attempt: LOGIN on success, FAILED_AUTH otherwise.
    pub async fn audit_login(
        &self,
        user_id: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
        session_id: Option<String>,
        success: bool,
    ) {
        let entry = AuditEntry {
            request_id: Uuid::new_v4().to_string(),
            table_name: Some("users".to_string()),
            record_id: Some(user_id.to_string()),
            action: if success {
                AuditAction::Login
            } else {
                AuditAction::FailedAuth
            },
            user_id: Some(user_id.to_string()),
            user_role: None,
            ip_address,
            user_agent,
            old_values: None,
            new_values: None,
            session_id,
            duration_ms: 0,
            status: if success {
                AuditStatus::Success
            } else {
                AuditStatus::Error
            },
            error_message: (!success).then(|| "authentication failed".to_string()),
            created_at: Utc::now(),
        };
        self.persist(entry).await;
    }

    /// Record a bulk data export.
    pub async fn audit_data_export(
        &self,
        user_id: &str,
        user_role: Option<String>,
        table_name: &str,
        ip_address: Option<String>,
        record_count: u64,
    ) {
        let entry = AuditEntry {
            request_id: Uuid::new_v4().to_string(),
            table_name: Some(table_name.to_string()),
            record_id: None,
            action: AuditAction::Export,
            user_id: Some(user_id.to_string()),
            user_role,
            ip_address,
            user_agent: None,
            old_values: None,
            new_values: Some(serde_json::json!({ "record_count": record_count })),
            session_id: None,
            duration_ms: 0,
            status: AuditStatus::Success,
            error_message: None,
            created_at: Utc::now(),
        };
        self.persist(entry).await;
    }

    /// Record an authorization denial and escalate when a user accumulates
    /// them: the entry whose trailing-window count reaches the threshold
    /// triggers exactly one security broadcast to admin accounts.
    pub async fn audit_permission_denied(
        &self,
        user_id: &str,
        resource: &str,
        ip_address: Option<String>,
    ) {
        let entry = AuditEntry {
            request_id: Uuid::new_v4().to_string(),
            table_name: Some(resource.to_string()),
            record_id: None,
            action: AuditAction::PermissionDenied,
            user_id: Some(user_id.to_string()),
            user_role: None,
            ip_address,
            user_agent: None,
            old_values: None,
            new_values: None,
            session_id: None,
            duration_ms: 0,
            status: AuditStatus::Error,
            error_message: Some(format!("permission denied: {resource}")),
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_entry(&entry).await {
            warn!(error = %e, user_id, "failed to persist permission-denied audit entry");
            return;
        }

        let window = Duration::seconds(self.config.denied_window_secs as i64);
        match self
            .store
            .count_recent(user_id, AuditAction::PermissionDenied, window)
            .await
        {
            Ok(count) if count as u64 == self.config.denied_alert_threshold => {
                warn!(user_id, count, "repeated permission denials, alerting admins");
                let alert = Notification::security(
                    "Repeated permission denials",
                    format!(
                        "User {user_id} was denied access {count} times in the last \
                         {} minutes (latest: {resource}).",
                        self.config.denied_window_secs / 60
                    ),
                );
                if let Err(e) = self.notifier.broadcast_admins(alert).await {
                    warn!(error = %e, user_id, "failed to broadcast denial alert");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, user_id, "failed to count recent permission denials");
            }
        }
    }

    /// Read-only reporting surface over the audit trail, capped at the
    /// configured row limit. Returns `None` (with a diagnostic) on storage
    /// failure.
    pub async fn generate_audit_report(&self, filter: &AuditReportFilter) -> Option<AuditReport> {
        let entries = match self
            .store
            .query_entries(filter, self.config.report_row_cap)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "audit report query failed");
                return None;
            }
        };
        let summary = summarize(&entries);
        Some(AuditReport { entries, summary })
    }

    async fn persist(&self, entry: AuditEntry) {
        if let Err(e) = self.store.insert_entry(&entry).await {
            warn!(
                error = %e,
                request_id = %entry.request_id,
                action = %entry.action,
                "failed to persist audit entry"
            );
            return;
        }

        if entry.status == AuditStatus::Success && FEED_ACTIONS.contains(&entry.action) {
            let activity = project_activity(&entry);
            if let Err(e) = self.store.insert_activity(&activity).await {
                warn!(
                    error = %e,
                    request_id = %entry.request_id,
                    "failed to project activity feed entry"
                );
            }
        }

        info!(
            request_id = %entry.request_id,
            action = %entry.action,
            table = entry.table_name.as_deref().unwrap_or("-"),
            status = entry.status.as_str(),
            duration_ms = entry.duration_ms,
            "audit entry recorded"
        );
    }
}

/// Map the HTTP method to an audit action, with status-code overrides for
/// authentication and authorization failures.
#[must_use]
pub fn classify_action(method: &Method, status: StatusCode) -> AuditAction {
    match status {
        StatusCode::UNAUTHORIZED => return AuditAction::FailedAuth,
        StatusCode::FORBIDDEN => return AuditAction::PermissionDenied,
        _ => {}
    }
    match *method {
        Method::POST => AuditAction::Insert,
        Method::PUT | Method::PATCH => AuditAction::Update,
        Method::DELETE => AuditAction::Delete,
        _ => AuditAction::View,
    }
}

/// Best-effort mapping of a URL path to (table, record id). Not
/// schema-aware: the first meaningful segment is taken as the table, the
/// second as the record id.
#[must_use]
pub fn derive_target(path: &str) -> (Option<String>, Option<String>) {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let mut segments = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != "api" && !is_version_segment(s));
    let table = segments.next().map(str::to_string);
    let record = segments.next().map(str::to_string);
    (table, record)
}

fn is_version_segment(segment: &str) -> bool {
    segment.len() >= 2
        && segment.starts_with(['v', 'V'])
        && segment[1..].chars().all(|c| c.is_ascii_digit())
}

/// Replace the value of every sensitive field with `"[REDACTED]"`,
/// recursively, leaving all other keys untouched.
#[must_use]
pub fn sanitize_data(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if is_sensitive(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, sanitize_data(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_data).collect()),
        other => other,
    }
}

fn is_sensitive(key: &str) -> bool {
    SENSITIVE_FIELDS
        .iter()
        .any(|field| field.eq_ignore_ascii_case(key))
}

fn project_activity(entry: &AuditEntry) -> ActivityEntry {
    let actor = entry.user_id.clone().unwrap_or_else(|| "system".to_string());
    let object_type = entry
        .table_name
        .clone()
        .unwrap_or_else(|| "resource".to_string());
    let description = match entry.action {
        AuditAction::Insert => format!("{actor} created a {object_type} record"),
        AuditAction::Update => format!("{actor} updated a {object_type} record"),
        AuditAction::Delete => format!("{actor} deleted a {object_type} record"),
        AuditAction::Login => format!("{actor} signed in"),
        _ => format!("{actor} acted on {object_type}"),
    };
    ActivityEntry {
        actor_id: actor,
        action: entry.action.as_str().to_string(),
        object_type,
        object_id: entry.record_id.clone(),
        description,
        visibility: "internal".to_string(),
        importance: "normal".to_string(),
        created_at: entry.created_at,
    }
}

fn summarize(entries: &[AuditEntry]) -> AuditSummary {
    let unique_users: std::collections::HashSet<&str> = entries
        .iter()
        .filter_map(|e| e.user_id.as_deref())
        .collect();
    let days_covered: std::collections::HashSet<chrono::NaiveDate> =
        entries.iter().map(|e| e.created_at.date_naive()).collect();
    let error_count = entries
        .iter()
        .filter(|e| e.status == AuditStatus::Error)
        .count();
    let avg_duration_ms = if entries.is_empty() {
        0.0
    } else {
        entries.iter().map(|e| e.duration_ms as f64).sum::<f64>() / entries.len() as f64
    };

    AuditSummary {
        total_events: entries.len(),
        unique_users: unique_users.len(),
        days_covered: days_covered.len(),
        avg_duration_ms,
        error_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_follows_method_with_status_overrides() {
        assert_eq!(
            classify_action(&Method::POST, StatusCode::CREATED),
            AuditAction::Insert
        );
        assert_eq!(
            classify_action(&Method::PUT, StatusCode::OK),
            AuditAction::Update
        );
        assert_eq!(
            classify_action(&Method::PATCH, StatusCode::OK),
            AuditAction::Update
        );
        assert_eq!(
            classify_action(&Method::DELETE, StatusCode::NO_CONTENT),
            AuditAction::Delete
        );
        assert_eq!(
            classify_action(&Method::GET, StatusCode::OK),
            AuditAction::View
        );
        assert_eq!(
            classify_action(&Method::POST, StatusCode::UNAUTHORIZED),
            AuditAction::FailedAuth
        );
        assert_eq!(
            classify_action(&Method::GET, StatusCode::FORBIDDEN),
            AuditAction::PermissionDenied
        );
    }

    #[test]
    fn derive_target_skips_api_and_version_prefixes() {
        assert_eq!(
            derive_target("/api/v1/assessments/42"),
            (Some("assessments".to_string()), Some("42".to_string()))
        );
        assert_eq!(
            derive_target("/employees"),
            (Some("employees".to_string()), None)
        );
        assert_eq!(
            derive_target("/api/surveys/7/answers"),
            (Some("surveys".to_string()), Some("7".to_string()))
        );
        assert_eq!(derive_target("/"), (None, None));
        assert_eq!(
            derive_target("/api/v2/reports?user=3"),
            (Some("reports".to_string()), None)
        );
    }

    #[test]
    fn sanitize_redacts_every_listed_field_and_nothing_else() {
        let body = json!({
            "name": "Jordan",
            "password": "hunter2",
            "Token": "abc",
            "profile": {
                "apikey": "k-123",
                "email": "jordan@example.com",
                "cards": [{"creditCard": "4111", "label": "work"}]
            }
        });
        let clean = sanitize_data(body);
        assert_eq!(clean["name"], "Jordan");
        assert_eq!(clean["password"], REDACTED);
        assert_eq!(clean["Token"], REDACTED);
        assert_eq!(clean["profile"]["apikey"], REDACTED);
        assert_eq!(clean["profile"]["email"], "jordan@example.com");
        assert_eq!(clean["profile"]["cards"][0]["creditCard"], REDACTED);
        assert_eq!(clean["profile"]["cards"][0]["label"], "work");
    }

    #[test]
    fn sanitize_leaves_scalars_alone() {
        assert_eq!(sanitize_data(json!(42)), json!(42));
        assert_eq!(sanitize_data(json!("password")), json!("password"));
    }

    #[test]
    fn summary_over_empty_report_is_zeroes() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_events, 0);
        assert_eq!(summary.unique_users, 0);
        assert_eq!(summary.days_covered, 0);
        assert_eq!(summary.avg_duration_ms, 0.0);
        assert_eq!(summary.error_count, 0);
    }
}
