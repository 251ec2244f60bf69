//! Device fingerprinting and classification
//!
//! - Fingerprint hashing from client signals
//! - Device type detection from the user agent
//! - Human-readable device names ("Chrome on Windows")

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Device class derived from the user agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    Unknown,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Mobile => write!(f, "mobile"),
            DeviceType::Tablet => write!(f, "tablet"),
            DeviceType::Desktop => write!(f, "desktop"),
            DeviceType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Client signals plus the hash derived from them
///
/// Two fingerprints identify the same device iff their hashes match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// SHA-256 over the signals, hex encoded
    pub hash: String,
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    pub timezone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webgl: Option<String>,
}

impl DeviceFingerprint {
    /// Build a fingerprint from the mandatory signals
    pub fn from_signals(
        user_agent: impl Into<String>,
        platform: impl Into<String>,
        language: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        let mut fingerprint = Self {
            hash: String::new(),
            user_agent: user_agent.into(),
            platform: platform.into(),
            language: language.into(),
            timezone: timezone.into(),
            screen_resolution: None,
            canvas: None,
            webgl: None,
        };
        fingerprint.rehash();
        fingerprint
    }

    pub fn with_screen_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.screen_resolution = Some(resolution.into());
        self.rehash();
        self
    }

    pub fn with_canvas(mut self, canvas: impl Into<String>) -> Self {
        self.canvas = Some(canvas.into());
        self.rehash();
        self
    }

    pub fn with_webgl(mut self, webgl: impl Into<String>) -> Self {
        self.webgl = Some(webgl.into());
        self.rehash();
        self
    }

    pub fn same_device(&self, other: &DeviceFingerprint) -> bool {
        self.hash == other.hash
    }

    fn rehash(&mut self) {
        let mut hasher = Sha256::new();
        // Length-prefix every signal so ("ab", "c") and ("a", "bc") differ
        for signal in [&self.user_agent, &self.platform, &self.language, &self.timezone] {
            hasher.update((signal.len() as u64).to_le_bytes());
            hasher.update(signal.as_bytes());
        }
        // Optional signals also carry a presence byte so "" differs from absent
        for signal in [&self.screen_resolution, &self.canvas, &self.webgl] {
            match signal {
                Some(value) => {
                    hasher.update([1u8]);
                    hasher.update((value.len() as u64).to_le_bytes());
                    hasher.update(value.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        self.hash = format!("{:x}", hasher.finalize());
    }
}

/// Device class and display name parsed from a user agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub device_name: String,
}

/// Best-effort user-agent classification; unknown values are acceptable
pub fn classify_user_agent(user_agent: &str) -> DeviceInfo {
    let ua = user_agent.to_lowercase();

    let device_type = if ua.trim().is_empty() {
        DeviceType::Unknown
    } else if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
        DeviceType::Tablet
    } else if ua.contains("mobile")
        || ua.contains("iphone")
        || ua.contains("ipod")
        || ua.contains("android")
        || ua.contains("windows phone")
    {
        DeviceType::Mobile
    } else if ua.contains("windows") || ua.contains("macintosh") || ua.contains("x11") || ua.contains("linux") {
        DeviceType::Desktop
    } else {
        DeviceType::Unknown
    };

    let device_name = match (detect_browser(user_agent), detect_os(user_agent)) {
        (Some(browser), Some(os)) => format!("{} on {}", browser, os),
        (Some(browser), None) => browser.to_string(),
        (None, Some(os)) => os.to_string(),
        (None, None) => "Unknown device".to_string(),
    };

    DeviceInfo {
        device_type,
        device_name,
    }
}

fn detect_browser(ua: &str) -> Option<&'static str> {
    // Order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari
    if ua.contains("Edg/") || ua.contains("Edge/") {
        Some("Edge")
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        Some("Opera")
    } else if ua.contains("Firefox/") {
        Some("Firefox")
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        Some("Chrome")
    } else if ua.contains("Safari/") {
        Some("Safari")
    } else {
        None
    }
}

fn detect_os(ua: &str) -> Option<&'static str> {
    // iOS before macOS: iOS agents contain "like Mac OS X"
    if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        Some("iOS")
    } else if ua.contains("Android") {
        Some("Android")
    } else if ua.contains("Windows") {
        Some("Windows")
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        Some("macOS")
    } else if ua.contains("Linux") || ua.contains("X11") {
        Some("Linux")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const CHROME_ANDROID_TABLET: &str = "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn test_fingerprint_hash_is_stable() {
        let a = DeviceFingerprint::from_signals("Mozilla/5.0", "Win32", "pt-BR", "America/Sao_Paulo");
        let b = DeviceFingerprint::from_signals("Mozilla/5.0", "Win32", "pt-BR", "America/Sao_Paulo");
        assert!(a.same_device(&b));
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn test_optional_signals_change_hash() {
        let base = DeviceFingerprint::from_signals("Mozilla/5.0", "Win32", "pt-BR", "America/Sao_Paulo");
        let with_screen = base.clone().with_screen_resolution("1920x1080");
        assert!(!base.same_device(&with_screen));
    }

    #[test]
    fn test_empty_optional_signal_differs_from_absent() {
        let base = DeviceFingerprint::from_signals("Mozilla/5.0", "Win32", "pt-BR", "America/Sao_Paulo");
        assert!(!base.same_device(&base.clone().with_canvas("")));
        assert!(!base
            .clone()
            .with_canvas("")
            .same_device(&base.clone().with_webgl("")));
    }

    #[test]
    fn test_signal_boundaries_matter() {
        let a = DeviceFingerprint::from_signals("ab", "c", "", "");
        let b = DeviceFingerprint::from_signals("a", "bc", "", "");
        assert!(!a.same_device(&b));
    }

    #[test]
    fn test_classify_desktop() {
        let info = classify_user_agent(CHROME_WINDOWS);
        assert_eq!(info.device_type, DeviceType::Desktop);
        assert_eq!(info.device_name, "Chrome on Windows");
    }

    #[test]
    fn test_classify_mobile() {
        let info = classify_user_agent(SAFARI_IPHONE);
        assert_eq!(info.device_type, DeviceType::Mobile);
        assert_eq!(info.device_name, "Safari on iOS");
    }

    #[test]
    fn test_classify_tablet() {
        let info = classify_user_agent(CHROME_ANDROID_TABLET);
        assert_eq!(info.device_type, DeviceType::Tablet);
        assert_eq!(info.device_name, "Chrome on Android");
    }

    #[test]
    fn test_classify_unknown() {
        let info = classify_user_agent("");
        assert_eq!(info.device_type, DeviceType::Unknown);
        assert_eq!(info.device_name, "Unknown device");
        assert_eq!(classify_user_agent("curl/8.0").device_type, DeviceType::Unknown);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(DeviceType::Tablet.to_string(), "tablet");
    }
}
