use serde::{Deserialize, Serialize};

const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Provider connection settings, stored as opaque JSON on the provider row
/// and parsed per dialect at dispatch time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    /// Anthropic API version header; other dialects ignore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Outbound proxy for this provider's egress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// Newline-or-semicolon separated substring matchers that escalate a
    /// 200/429 body into a hard failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_matchers: Option<String>,
    /// Suppress `stream_options.include_usage` injection for upstreams that
    /// reject unknown fields.
    #[serde(default)]
    pub omit_usage_opt: bool,
}

impl UpstreamConfig {
    pub fn parse(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    pub fn anthropic_version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_ANTHROPIC_VERSION)
    }

    /// Compiled fingerprint matchers: lowercased, whitespace-compacted.
    pub fn fingerprints(&self) -> Vec<String> {
        self.error_matchers
            .as_deref()
            .unwrap_or_default()
            .split(['\n', ';'])
            .map(compact)
            .filter(|matcher| !matcher.is_empty())
            .collect()
    }

    /// Whether any declared fingerprint occurs in `body`, compared
    /// case-insensitively with runs of whitespace collapsed.
    pub fn body_matches_fingerprint(&self, body: &str) -> bool {
        let fingerprints = self.fingerprints();
        if fingerprints.is_empty() {
            return false;
        }
        let haystack = compact(body);
        fingerprints
            .iter()
            .any(|fingerprint| haystack.contains(fingerprint.as_str()))
    }
}

fn compact(value: &str) -> String {
    value
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_config() {
        let config = UpstreamConfig::parse(&json!({
            "base_url": "https://api.openai.com/v1",
            "api_key": "sk-x",
        }))
        .unwrap();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert!(config.proxy_url.is_none());
        assert_eq!(config.anthropic_version(), DEFAULT_ANTHROPIC_VERSION);
    }

    #[test]
    fn fingerprints_split_on_newline_and_semicolon() {
        let config = UpstreamConfig {
            error_matchers: Some("\"status\":\"439\"\nQuota   Exceeded; ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.fingerprints(),
            vec!["\"status\":\"439\"".to_string(), "quota exceeded".to_string()]
        );
        assert!(config.body_matches_fingerprint("{\"STATUS\":\"439\",\"msg\":\"x\"}"));
        assert!(config.body_matches_fingerprint("daily quota\nexceeded for key"));
        assert!(!config.body_matches_fingerprint("all good"));
    }

    #[test]
    fn no_matchers_never_match() {
        let config = UpstreamConfig::default();
        assert!(!config.body_matches_fingerprint("anything"));
    }
}
