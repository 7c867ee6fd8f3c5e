//! Domain types shared across the session and audit subsystems.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One row per login event. Once `is_active` is false the session is
/// terminal; no operation transitions it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub device_info: DeviceInfo,
    pub location_info: LocationInfo,
    pub login_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub logout_at: Option<DateTime<Utc>>,
    pub logout_reason: Option<LogoutReason>,
}

/// Read-only projection of a session for "your devices" style listings.
/// Carries no token material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub ip_address: String,
    pub device_info: DeviceInfo,
    pub location_info: LocationInfo,
    pub login_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.session_id.clone(),
            ip_address: s.ip_address.clone(),
            device_info: s.device_info.clone(),
            location_info: s.location_info.clone(),
            login_at: s.login_at,
            last_activity: s.last_activity,
            expires_at: s.expires_at,
        }
    }
}

/// Tags derived from the user-agent string at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub browser: String,
    pub os: String,
    pub device: String,
}

/// Best-effort geolocation of the login IP. The shipped
/// [`crate::geo::UnknownGeoLocator`] returns all-"Unknown".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub country: String,
    pub city: String,
    pub region: String,
}

impl LocationInfo {
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            country: "Unknown".to_string(),
            city: "Unknown".to_string(),
            region: "Unknown".to_string(),
        }
    }
}

/// Why a session left the active state. Written exactly once, on the
/// terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    ManualLogout,
    SessionExpired,
    MaxSessionsExceeded,
    Security,
}

impl LogoutReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutReason::ManualLogout => "manual_logout",
            LogoutReason::SessionExpired => "session_expired",
            LogoutReason::MaxSessionsExceeded => "max_sessions_exceeded",
            LogoutReason::Security => "security",
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogoutReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual_logout" => Ok(LogoutReason::ManualLogout),
            "session_expired" => Ok(LogoutReason::SessionExpired),
            "max_sessions_exceeded" => Ok(LogoutReason::MaxSessionsExceeded),
            "security" => Ok(LogoutReason::Security),
            other => Err(format!("unknown logout reason: {other}")),
        }
    }
}

/// Classification of an audited request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
    View,
    Export,
    Login,
    Logout,
    FailedAuth,
    PermissionDenied,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Insert => "INSERT",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::View => "VIEW",
            AuditAction::Export => "EXPORT",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::FailedAuth => "FAILED_AUTH",
            AuditAction::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(AuditAction::Insert),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            "VIEW" => Ok(AuditAction::View),
            "EXPORT" => Ok(AuditAction::Export),
            "LOGIN" => Ok(AuditAction::Login),
            "LOGOUT" => Ok(AuditAction::Logout),
            "FAILED_AUTH" => Ok(AuditAction::FailedAuth),
            "PERMISSION_DENIED" => Ok(AuditAction::PermissionDenied),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// Outcome recorded on an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Error,
}

impl AuditStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Error => "error",
        }
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditStatus::Success),
            "error" => Ok(AuditStatus::Error),
            other => Err(format!("unknown audit status: {other}")),
        }
    }
}

/// One immutable row per completed state-changing request. Never mutated
/// after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub request_id: String,
    pub table_name: Option<String>,
    pub record_id: Option<String>,
    pub action: AuditAction,
    pub user_id: Option<String>,
    pub user_role: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub session_id: Option<String>,
    pub duration_ms: i64,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Human-readable projection of an audit entry for the UI activity feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub actor_id: String,
    pub action: String,
    pub object_type: String,
    pub object_id: Option<String>,
    pub description: String,
    pub visibility: String,
    pub importance: String,
    pub created_at: DateTime<Utc>,
}

/// A user- or admin-facing alert handed to the [`crate::store::NotificationSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub kind: String,
    pub priority: String,
    pub category: String,
}

impl Notification {
    /// Security-category notification with high priority.
    #[must_use]
    pub fn security(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind: "security".to_string(),
            priority: "high".to_string(),
            category: "security".to_string(),
        }
    }

    /// Informational session notification with normal priority.
    #[must_use]
    pub fn session(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind: "info".to_string(),
            priority: "normal".to_string(),
            category: "session".to_string(),
        }
    }
}
