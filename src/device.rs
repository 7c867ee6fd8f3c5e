//! User-agent classification.
//!
//! Pure best-effort tagging of the login user-agent into browser, operating
//! system, and device class. Unrecognized strings fall back to "Unknown".

use crate::models::DeviceInfo;

/// Classify a raw user-agent string into coarse device tags.
#[must_use]
pub fn classify_device(user_agent: &str) -> DeviceInfo {
    let ua = user_agent.to_ascii_lowercase();

    // Order matters: Edge and Opera embed "chrome", Chrome embeds "safari".
    let browser = if ua.contains("edg/") || ua.contains("edge") {
        "Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("firefox") {
        "Firefox"
    } else if ua.contains("chrome") {
        "Chrome"
    } else if ua.contains("safari") {
        "Safari"
    } else {
        "Unknown"
    };

    let os = if ua.contains("windows") {
        "Windows"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
        "iOS"
    } else if ua.contains("mac os") || ua.contains("macintosh") {
        "macOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    };

    let device = if ua.contains("ipad") || ua.contains("tablet") {
        "Tablet"
    } else if ua.contains("mobile") || ua.contains("iphone") || ua.contains("android") {
        "Mobile"
    } else if ua.is_empty() {
        "Unknown"
    } else {
        "Desktop"
    };

    DeviceInfo {
        browser: browser.to_string(),
        os: os.to_string(),
        device: device.to_string(),
    }
}
