//! Geolocation collaborator.
//!
//! The portal records a best-effort location for each login. No valid
//! geolocation source is wired in yet, so the shipped implementation reports
//! every field as "Unknown"; the trait is the seam where a real provider
//! plugs in.

use async_trait::async_trait;

use crate::models::LocationInfo;

/// Maps a client IP address to a coarse location.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: &str) -> LocationInfo;
}

/// Placeholder locator: every lookup is "Unknown".
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownGeoLocator;

#[async_trait]
impl GeoLocator for UnknownGeoLocator {
    async fn locate(&self, _ip: &str) -> LocationInfo {
        LocationInfo::unknown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_locator_reports_unknown_everywhere() {
        let location = UnknownGeoLocator.locate("203.0.113.7").await;
        assert_eq!(location, LocationInfo::unknown());
    }
}
