//! User-agent classification.

use std::sync::LazyLock;

use lr_core::{DeviceClassifier, DeviceInfo, ReportError};
use regex::Regex;

/// Known clients, checked in order. Browsers that embed another engine's
/// token (Edge carries `Chrome/`, Chrome carries `Safari/`) come first.
static CLIENT_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("VLC", r"(?i)\bVLC/(\d+)"),
        ("Winamp", r"(?i)\bWinamp(?:MPEG)?/(\d+)"),
        ("iTunes", r"\biTunes/(\d+)"),
        ("foobar2000", r"\bfoobar2000/(\d+)"),
        ("Edge", r"\bEdg(?:e|A|iOS)?/(\d+)"),
        ("Firefox", r"\b(?:Firefox|FxiOS)/(\d+)"),
        ("Chrome", r"\b(?:Chrome|CriOS)/(\d+)"),
        ("Safari", r"\bVersion/(\d+)[\d.]*\b.*\bSafari/"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).unwrap()))
    .collect()
});

static MOBILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:Mobile|Android|iPhone|iPad)\b").unwrap());

/// Pattern-based classifier for common players and browsers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexClassifier;

impl RegexClassifier {
    /// Client name with major version, e.g. `Firefox 126`.
    pub fn client(user_agent: &str) -> Option<String> {
        CLIENT_PATTERNS.iter().find_map(|(name, re)| {
            re.captures(user_agent)
                .map(|caps| format!("{name} {}", &caps[1]))
        })
    }

    pub fn is_mobile(user_agent: &str) -> bool {
        MOBILE_RE.is_match(user_agent)
    }
}

impl DeviceClassifier for RegexClassifier {
    fn classify(&self, user_agent: &str) -> Result<DeviceInfo, ReportError> {
        let info = DeviceInfo {
            client: Self::client(user_agent),
            is_mobile: Self::is_mobile(user_agent),
        };
        tracing::trace!(user_agent, client = ?info.client, info.is_mobile, "classified user agent");
        Ok(info)
    }
}
