//! Session lifecycle orchestration.
//!
//! [`SessionManager`] owns create/validate/extend/invalidate for user
//! sessions, enforces the per-user concurrency cap, and runs the login
//! anomaly policy. Every storage failure here is caught, logged, and turned
//! into a safe return value: session bookkeeping fails open so a storage
//! hiccup never fails the caller's request. Credential checks are the auth
//! layer's job and must fail closed there — the two policies are not
//! interchangeable.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::anomaly::{AnomalyDetector, AnomalyReport};
use crate::config::SessionConfig;
use crate::device::classify_device;
use crate::geo::GeoLocator;
use crate::models::{LogoutReason, Notification, Session, SessionSummary};
use crate::store::{NewSession, NotificationSink, SessionStore};
use crate::token::sign_session_token;

/// Result of a successful login, handed back to the authentication flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    /// HMAC-signed bearer token. An integrity pre-check only; the session
    /// row remains authoritative.
    pub token: String,
}

/// Orchestrates session state transitions over an injected store.
pub struct SessionManager {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn NotificationSink>,
    geo: Arc<dyn GeoLocator>,
    detector: AnomalyDetector,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn NotificationSink>,
        geo: Arc<dyn GeoLocator>,
    ) -> Self {
        let detector = AnomalyDetector::new(config.anomaly.clone());
        Self {
            config,
            store,
            notifier,
            geo,
            detector,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn max_age(&self) -> Duration {
        Duration::seconds(self.config.max_age_secs as i64)
    }

    /// Create a session for an already-authenticated user. The caller has
    /// verified credentials; this method never re-checks them.
    ///
    /// If the user is at the concurrency cap, the oldest active sessions (by
    /// login time) are invalidated with reason `max_sessions_exceeded` before
    /// the new row is inserted, so the cap holds at all observable times.
    pub async fn create_session(
        &self,
        user_id: &str,
        ip_address: &str,
        user_agent: &str,
    ) -> Option<CreatedSession> {
        let active = match self.store.count_active(user_id).await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, user_id, "failed to count active sessions");
                return None;
            }
        };

        let cap = self.config.max_sessions as i64;
        if active >= cap {
            let excess = active - cap + 1;
            match self
                .store
                .evict_oldest_active(user_id, excess, LogoutReason::MaxSessionsExceeded)
                .await
            {
                Ok(evicted) => {
                    for session_id in &evicted {
                        info!(
                            session_id = %session_id,
                            user_id,
                            reason = %LogoutReason::MaxSessionsExceeded,
                            "session evicted"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, user_id, "failed to evict oldest session");
                    return None;
                }
            }
        }

        let new = NewSession {
            session_id: generate_session_id(),
            user_id: user_id.to_string(),
            ip_address: ip_address.to_string(),
            user_agent: user_agent.to_string(),
            device_info: classify_device(user_agent),
            location_info: self.geo.locate(ip_address).await,
        };

        let session = match self.store.insert_session(new, self.max_age()).await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, user_id, "failed to insert session");
                return None;
            }
        };

        let token = sign_session_token(
            &self.config.token_secret,
            &session.session_id,
            user_id,
            session.login_at.timestamp(),
        )?;

        let notification = Notification::session(
            "New login to your account",
            format!(
                "{} on {} ({}) from {}",
                session.device_info.browser,
                session.device_info.os,
                session.device_info.device,
                session.ip_address
            ),
        );
        if let Err(e) = self.notifier.notify_user(user_id, notification).await {
            warn!(error = %e, user_id, "failed to enqueue login notification");
        }

        info!(session_id = %session.session_id, user_id, "session created");
        Some(CreatedSession {
            session_id: session.session_id,
            expires_at: session.expires_at,
            token,
        })
    }

    /// Resolve a session identifier to its row, if active and unexpired.
    ///
    /// `last_activity` is bumped on every hit. With `extend_on_activity` the
    /// expiry also slides forward by `max_age` from now (never shortened).
    /// A malformed or unknown id is "no session", not an error.
    pub async fn validate_session(&self, session_id: &str) -> Option<Session> {
        if session_id.trim().is_empty() {
            return None;
        }
        let extend = self.config.extend_on_activity.then(|| self.max_age());
        match self.store.touch_session(session_id, extend).await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, session_id, "session validation query failed");
                None
            }
        }
    }

    /// Unconditionally slide the expiry to `max_age` from now. Silently
    /// ignored (with a log line) when the session is no longer active.
    pub async fn extend_session(&self, session_id: &str) -> bool {
        match self.store.extend_session(session_id, self.max_age()).await {
            Ok(true) => {
                debug!(session_id, "session extended");
                true
            }
            Ok(false) => {
                debug!(session_id, "extend ignored: session not active");
                false
            }
            Err(e) => {
                error!(error = %e, session_id, "failed to extend session");
                false
            }
        }
    }

    /// Terminal transition. The guard in the store makes this
    /// exactly-once: the loser of a race with another invalidation or the
    /// expiry sweep observes zero affected rows and is a no-op.
    pub async fn invalidate_session(&self, session_id: &str, reason: LogoutReason) -> bool {
        match self.store.invalidate_session(session_id, reason).await {
            Ok(true) => {
                info!(session_id, reason = %reason, "session invalidated");
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!(error = %e, session_id, "failed to invalidate session");
                false
            }
        }
    }

    /// Invalidate every active session of a user and tell them about it.
    pub async fn invalidate_all_user_sessions(
        &self,
        user_id: &str,
        reason: LogoutReason,
    ) -> u64 {
        let count = match self.store.invalidate_user_sessions(user_id, reason).await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, user_id, "failed to invalidate user sessions");
                return 0;
            }
        };
        if count > 0 {
            info!(user_id, count, reason = %reason, "all user sessions invalidated");
            let notification = Notification::security(
                "You have been signed out everywhere",
                format!("{count} active session(s) were ended ({reason})."),
            );
            if let Err(e) = self.notifier.notify_user(user_id, notification).await {
                warn!(error = %e, user_id, "failed to enqueue sign-out notification");
            }
        }
        count
    }

    /// Active sessions for the "your devices" screen; no token material.
    pub async fn get_user_sessions(&self, user_id: &str) -> Vec<SessionSummary> {
        match self.store.user_sessions(user_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(error = %e, user_id, "failed to list user sessions");
                Vec::new()
            }
        }
    }

    /// Evaluate the trailing login window against the anomaly thresholds.
    ///
    /// Called explicitly by the authentication flow after each successful
    /// login; deliberately not run per request. On suspicion the user gets a
    /// security alert and every admin account is notified.
    pub async fn detect_suspicious_activity(&self, user_id: &str) -> bool {
        let window = Duration::seconds(self.detector.window_secs() as i64);
        let samples = match self.store.activity_window(user_id, window).await {
            Ok(samples) => samples,
            Err(e) => {
                error!(error = %e, user_id, "failed to load activity window");
                return false;
            }
        };

        let report = self.detector.evaluate(&samples);
        if report.suspicious {
            warn!(
                user_id,
                distinct_ips = report.distinct_ips,
                login_count = report.login_count,
                "suspicious login activity detected"
            );
            self.handle_suspicious_activity(user_id, &report).await;
        }
        report.suspicious
    }

    async fn handle_suspicious_activity(&self, user_id: &str, report: &AnomalyReport) {
        let detail = format!(
            "{} logins from {} distinct IP addresses within the last {} minutes.",
            report.login_count,
            report.distinct_ips,
            report.window_secs / 60
        );

        let user_alert = Notification::security(
            "Unusual sign-in activity on your account",
            format!("{detail} If this was not you, change your password."),
        );
        if let Err(e) = self.notifier.notify_user(user_id, user_alert).await {
            warn!(error = %e, user_id, "failed to enqueue user security alert");
        }

        let admin_alert = Notification::security(
            "Suspicious login activity",
            format!("User {user_id}: {detail}"),
        );
        if let Err(e) = self.notifier.broadcast_admins(admin_alert).await {
            warn!(error = %e, user_id, "failed to broadcast admin security alert");
        }
    }
}

/// 32 bytes of CSPRNG output, base64url encoded. Never contains a dot, which
/// the token format relies on.
fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    URL_SAFE_NO_PAD.encode(bytes)
}
