//! Injected configuration for the session and audit subsystems.
//!
//! Everything here is constructor-injected; there is no global state. The
//! defaults match the portal's production policy.

use serde::{Deserialize, Serialize};

/// Configuration for [`crate::session_manager::SessionManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in seconds; also the sliding-extension amount.
    pub max_age_secs: u64,
    /// Maximum concurrently-active sessions per user. The oldest active
    /// session (by login time) is evicted when the cap would be exceeded.
    pub max_sessions: usize,
    /// When true, every successful validation pushes the expiry forward by
    /// `max_age_secs` from now (sliding expiration).
    pub extend_on_activity: bool,
    /// HMAC secret for the signed bearer token issued at login.
    pub token_secret: String,
    /// Thresholds for the login anomaly heuristics.
    pub anomaly: AnomalyThresholds,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 1800, // 30 minutes
            max_sessions: 5,
            extend_on_activity: true,
            token_secret: "insecure-dev-secret".to_string(),
            anomaly: AnomalyThresholds::default(),
        }
    }
}

/// Thresholds for [`crate::anomaly::AnomalyDetector`], evaluated over a
/// trailing window of login activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyThresholds {
    /// Window length in seconds (default: one hour).
    pub window_secs: u64,
    /// Distinct source IPs above this count are suspicious.
    pub max_distinct_ips: usize,
    /// Logins above this count within the window are suspicious.
    pub max_logins: usize,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            max_distinct_ips: 3,
            max_logins: 10,
        }
    }
}

/// Configuration for [`crate::cleanup::CleanupScheduler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Seconds between expiry sweeps.
    pub interval_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Configuration for [`crate::audit::AuditLogger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// PERMISSION_DENIED entries per user within the window that trigger a
    /// security broadcast to admin accounts.
    pub denied_alert_threshold: u64,
    /// Trailing window (seconds) for the permission-denied count.
    pub denied_window_secs: u64,
    /// Hard cap on rows returned by a single audit report.
    pub report_row_cap: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            denied_alert_threshold: 5,
            denied_window_secs: 3600,
            report_row_cap: 1000,
        }
    }
}
