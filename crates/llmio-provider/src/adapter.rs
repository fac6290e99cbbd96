use bytes::Bytes;
use serde_json::Value;

use crate::config::UpstreamConfig;
use crate::dialect::Dialect;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A fully built upstream HTTP request. IO happens in a higher layer.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

/// Caller headers that never pass through to an upstream, regardless of the
/// binding's pass-through flag.
const BLOCKED_PASSTHROUGH: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-goog-api-key",
    "host",
    "content-length",
    "content-type",
    "accept-encoding",
    "connection",
    "transfer-encoding",
];

/// Dialect-specific request construction. One adapter per provider row,
/// built from its dialect tag and parsed config.
#[derive(Debug, Clone)]
pub struct Adapter {
    dialect: Dialect,
    config: UpstreamConfig,
}

impl Adapter {
    pub fn new(dialect: Dialect, config: UpstreamConfig) -> Self {
        Self { dialect, config }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Build the chat-completion request: rewrite the `model` field (or path
    /// segment), attach the dialect's auth header, merge pass-through and
    /// per-binding headers.
    pub fn chat_request(
        &self,
        upstream_model: &str,
        body: &Bytes,
        stream: bool,
        passthrough: &[(String, String)],
        binding_headers: &[(String, String)],
    ) -> Result<UpstreamRequest, AdapterError> {
        let url = match self.dialect {
            Dialect::OpenAI => format!("{}/chat/completions", self.base()),
            Dialect::OpenAIResponses => format!("{}/responses", self.base()),
            Dialect::Anthropic => format!("{}/messages", self.base()),
            Dialect::Gemini => {
                let action = if stream {
                    "streamGenerateContent"
                } else {
                    "generateContent"
                };
                let suffix = if stream { "?alt=sse" } else { "" };
                format!(
                    "{}/v1beta/models/{}:{}{}",
                    self.base(),
                    upstream_model,
                    action,
                    suffix
                )
            }
        };

        let body = match self.dialect {
            // Gemini carries the model in the path; the body is untouched.
            Dialect::Gemini => body.clone(),
            _ => self.rewrite_body(upstream_model, body, stream)?,
        };

        let mut headers = self.base_headers();
        for (name, value) in passthrough {
            let lowered = name.to_lowercase();
            if BLOCKED_PASSTHROUGH.contains(&lowered.as_str()) {
                continue;
            }
            header_set(&mut headers, &lowered, value);
        }
        for (name, value) in binding_headers {
            header_set(&mut headers, &name.to_lowercase(), value);
        }

        Ok(UpstreamRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(body),
        })
    }

    /// Anthropic token counter, forwarded without usage processing.
    pub fn count_tokens_request(
        &self,
        upstream_model: &str,
        body: &Bytes,
    ) -> Result<UpstreamRequest, AdapterError> {
        let url = format!("{}/messages/count_tokens", self.base());
        let body = self.rewrite_body(upstream_model, body, false)?;
        Ok(UpstreamRequest {
            method: HttpMethod::Post,
            url,
            headers: self.base_headers(),
            body: Some(body),
        })
    }

    /// GET of the upstream model catalog.
    pub fn models_request(&self) -> UpstreamRequest {
        let url = match self.dialect {
            Dialect::OpenAI | Dialect::OpenAIResponses | Dialect::Anthropic => {
                format!("{}/models", self.base())
            }
            Dialect::Gemini => format!("{}/v1beta/models", self.base()),
        };
        UpstreamRequest {
            method: HttpMethod::Get,
            url,
            headers: self.base_headers(),
            body: None,
        }
    }

    /// Model identifiers out of a catalog response body.
    pub fn parse_models(&self, body: &[u8]) -> Vec<String> {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return Vec::new();
        };
        match self.dialect {
            Dialect::OpenAI | Dialect::OpenAIResponses | Dialect::Anthropic => value
                .get("data")
                .and_then(Value::as_array)
                .map(|items| collect_strings(items, "id"))
                .unwrap_or_default(),
            Dialect::Gemini => value
                .get("models")
                .and_then(Value::as_array)
                .map(|items| collect_strings(items, "name"))
                .unwrap_or_default(),
        }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn base_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(
            "content-type".to_string(),
            "application/json".to_string(),
        )];
        match self.dialect {
            Dialect::OpenAI | Dialect::OpenAIResponses => headers.push((
                "authorization".to_string(),
                format!("Bearer {}", self.config.api_key),
            )),
            Dialect::Anthropic => {
                headers.push(("x-api-key".to_string(), self.config.api_key.clone()));
                headers.push((
                    "anthropic-version".to_string(),
                    self.config.anthropic_version().to_string(),
                ));
            }
            Dialect::Gemini => headers.push((
                "x-goog-api-key".to_string(),
                self.config.api_key.clone(),
            )),
        }
        headers
    }

    fn rewrite_body(
        &self,
        upstream_model: &str,
        body: &Bytes,
        stream: bool,
    ) -> Result<Bytes, AdapterError> {
        let mut value: Value = serde_json::from_slice(body)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "model".to_string(),
                Value::String(upstream_model.to_string()),
            );
            // Without this flag a streamed OpenAI-Chat response carries no
            // usage payload and extraction would silently report zeros.
            if self.dialect == Dialect::OpenAI && stream && !self.config.omit_usage_opt {
                let options = object
                    .entry("stream_options")
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if let Some(options) = options.as_object_mut() {
                    options
                        .entry("include_usage")
                        .or_insert(Value::Bool(true));
                }
            }
        }
        Ok(Bytes::from(serde_json::to_vec(&value)?))
    }
}

fn header_set(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(slot) = headers.iter_mut().find(|(existing, _)| existing == name) {
        slot.1 = value.to_string();
    } else {
        headers.push((name.to_string(), value.to_string()));
    }
}

fn collect_strings(items: &[Value], key: &str) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.get(key))
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter(dialect: Dialect) -> Adapter {
        Adapter::new(
            dialect,
            UpstreamConfig {
                base_url: "https://upstream.example/v1/".to_string(),
                api_key: "key-1".to_string(),
                ..Default::default()
            },
        )
    }

    fn header<'a>(req: &'a UpstreamRequest, name: &str) -> Option<&'a str> {
        req.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn openai_chat_rewrites_model_and_injects_usage_option() {
        let body = Bytes::from(
            json!({"model": "public-name", "stream": true, "messages": []}).to_string(),
        );
        let req = adapter(Dialect::OpenAI)
            .chat_request("gpt-4o-mini", &body, true, &[], &[])
            .unwrap();

        assert_eq!(req.url, "https://upstream.example/v1/chat/completions");
        assert_eq!(header(&req, "authorization"), Some("Bearer key-1"));

        let sent: Value = serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
        assert_eq!(sent["model"], "gpt-4o-mini");
        assert_eq!(sent["stream_options"]["include_usage"], true);
    }

    #[test]
    fn usage_option_injection_can_be_opted_out() {
        let adapter = Adapter::new(
            Dialect::OpenAI,
            UpstreamConfig {
                base_url: "https://upstream.example/v1".to_string(),
                api_key: "key-1".to_string(),
                omit_usage_opt: true,
                ..Default::default()
            },
        );
        let body = Bytes::from(json!({"model": "m", "stream": true}).to_string());
        let req = adapter.chat_request("up", &body, true, &[], &[]).unwrap();
        let sent: Value = serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
        assert!(sent.get("stream_options").is_none());
    }

    #[test]
    fn caller_supplied_stream_options_survive() {
        let body = Bytes::from(
            json!({"model": "m", "stream_options": {"include_usage": false}}).to_string(),
        );
        let req = adapter(Dialect::OpenAI)
            .chat_request("up", &body, true, &[], &[])
            .unwrap();
        let sent: Value = serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
        assert_eq!(sent["stream_options"]["include_usage"], false);
    }

    #[test]
    fn anthropic_uses_api_key_and_version_headers() {
        let body = Bytes::from(json!({"model": "m", "messages": []}).to_string());
        let req = adapter(Dialect::Anthropic)
            .chat_request("claude-x", &body, false, &[], &[])
            .unwrap();
        assert_eq!(req.url, "https://upstream.example/v1/messages");
        assert_eq!(header(&req, "x-api-key"), Some("key-1"));
        assert_eq!(header(&req, "anthropic-version"), Some("2023-06-01"));
        assert!(header(&req, "authorization").is_none());
    }

    #[test]
    fn gemini_puts_model_in_path_and_leaves_body_alone() {
        let adapter = Adapter::new(
            Dialect::Gemini,
            UpstreamConfig {
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                api_key: "key-1".to_string(),
                ..Default::default()
            },
        );
        let body = Bytes::from(json!({"contents": []}).to_string());
        let req = adapter
            .chat_request("gemini-pro", &body, true, &[], &[])
            .unwrap();
        assert_eq!(
            req.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:streamGenerateContent?alt=sse"
        );
        assert_eq!(header(&req, "x-goog-api-key"), Some("key-1"));
        assert_eq!(req.body.as_ref().unwrap(), &body);
    }

    #[test]
    fn passthrough_skips_auth_but_binding_headers_override() {
        let body = Bytes::from(json!({"model": "m"}).to_string());
        let passthrough = vec![
            ("Authorization".to_string(), "Bearer caller".to_string()),
            ("x-session".to_string(), "abc".to_string()),
        ];
        let binding = vec![("x-extra".to_string(), "on".to_string())];
        let req = adapter(Dialect::OpenAI)
            .chat_request("up", &body, false, &passthrough, &binding)
            .unwrap();
        assert_eq!(header(&req, "authorization"), Some("Bearer key-1"));
        assert_eq!(header(&req, "x-session"), Some("abc"));
        assert_eq!(header(&req, "x-extra"), Some("on"));
    }

    #[test]
    fn parses_catalog_per_dialect() {
        let openai = adapter(Dialect::OpenAI);
        let models =
            openai.parse_models(json!({"data": [{"id": "a"}, {"id": "b"}]}).to_string().as_bytes());
        assert_eq!(models, vec!["a", "b"]);

        let gemini = adapter(Dialect::Gemini);
        let models = gemini.parse_models(
            json!({"models": [{"name": "models/gemini-pro"}]})
                .to_string()
                .as_bytes(),
        );
        assert_eq!(models, vec!["models/gemini-pro"]);
    }
}
