//! Login anomaly heuristics.
//!
//! Evaluates a user's recent login activity against configured thresholds.
//! Only the well-defined heuristics are implemented: distinct source IPs and
//! login count within the window. Geolocation-based checks wait on a real
//! [`crate::geo::GeoLocator`] implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::AnomalyThresholds;

/// One login observation inside the evaluation window.
#[derive(Debug, Clone)]
pub struct SessionSample {
    pub ip_address: String,
    pub login_at: DateTime<Utc>,
}

/// Outcome of an anomaly evaluation, with the supporting counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub suspicious: bool,
    pub distinct_ips: usize,
    pub login_count: usize,
    pub window_secs: u64,
}

/// Threshold-based login anomaly detector.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    thresholds: AnomalyThresholds,
}

impl AnomalyDetector {
    #[must_use]
    pub fn new(thresholds: AnomalyThresholds) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub fn window_secs(&self) -> u64 {
        self.thresholds.window_secs
    }

    /// Evaluate the window. Any single threshold breach marks the activity
    /// suspicious.
    #[must_use]
    pub fn evaluate(&self, samples: &[SessionSample]) -> AnomalyReport {
        let distinct_ips: HashSet<&str> =
            samples.iter().map(|s| s.ip_address.as_str()).collect();
        let distinct_ips = distinct_ips.len();
        let login_count = samples.len();

        let suspicious = distinct_ips > self.thresholds.max_distinct_ips
            || login_count > self.thresholds.max_logins;

        AnomalyReport {
            suspicious,
            distinct_ips,
            login_count,
            window_secs: self.thresholds.window_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ip: &str) -> SessionSample {
        SessionSample {
            ip_address: ip.to_string(),
            login_at: Utc::now(),
        }
    }

    #[test]
    fn quiet_activity_is_not_suspicious() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        let samples = vec![sample("10.0.0.1"), sample("10.0.0.1"), sample("10.0.0.2")];
        let report = detector.evaluate(&samples);
        assert!(!report.suspicious);
        assert_eq!(report.distinct_ips, 2);
        assert_eq!(report.login_count, 3);
    }

    #[test]
    fn too_many_distinct_ips_is_suspicious() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        let samples = vec![
            sample("10.0.0.1"),
            sample("10.0.0.2"),
            sample("10.0.0.3"),
            sample("10.0.0.4"),
        ];
        assert!(detector.evaluate(&samples).suspicious);
    }

    #[test]
    fn exactly_at_threshold_is_not_suspicious() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        let samples = vec![sample("10.0.0.1"), sample("10.0.0.2"), sample("10.0.0.3")];
        assert!(!detector.evaluate(&samples).suspicious);
    }

    #[test]
    fn login_storm_from_one_ip_is_suspicious() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        let samples: Vec<_> = (0..11).map(|_| sample("10.0.0.1")).collect();
        let report = detector.evaluate(&samples);
        assert!(report.suspicious);
        assert_eq!(report.distinct_ips, 1);
        assert_eq!(report.login_count, 11);
    }

    #[test]
    fn empty_window_is_quiet() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        assert!(!detector.evaluate(&[]).suspicious);
    }
}
