use serde_json::Value;

use crate::dialect::Dialect;
use crate::sse::LineScanner;
use crate::usage::Usage;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("stream event exceeds scanner buffer")]
    Overflow,
}

/// Incremental usage extraction over a streamed response body.
///
/// The scanner consumes the same bytes that are forwarded to the client and
/// keeps whatever usage it has seen so far; truncation or scan failure never
/// discards an already-extracted value.
#[derive(Debug)]
pub struct UsageScanner {
    dialect: Dialect,
    lines: LineScanner,
    /// Name of the most recent `event:` field, cleared at event boundaries.
    event: Option<String>,
    usage: Option<Usage>,
    failed: bool,
}

impl UsageScanner {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            lines: LineScanner::new(),
            event: None,
            usage: None,
            failed: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), ScanError> {
        if self.failed {
            return Err(ScanError::Overflow);
        }
        let Some(lines) = self.lines.push(chunk) else {
            self.failed = true;
            return Err(ScanError::Overflow);
        };
        for line in lines {
            self.handle_line(&line);
        }
        Ok(())
    }

    pub fn finish(mut self) -> Option<Usage> {
        if !self.failed
            && let Some(line) = self.lines.finish()
        {
            self.handle_line(&line);
        }
        self.usage
    }

    fn handle_line(&mut self, line: &[u8]) {
        if line.is_empty() {
            self.event = None;
            return;
        }
        let Ok(text) = std::str::from_utf8(line) else {
            return;
        };
        if let Some(name) = text.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
            return;
        }
        let data = match text.strip_prefix("data:") {
            Some(data) => data.trim_start(),
            // Gemini without alt=sse streams bare JSON objects, one per line.
            None if self.dialect == Dialect::Gemini => text.trim(),
            None => return,
        };
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        let data = if self.dialect == Dialect::Gemini {
            // Chunks inside a JSON array arrive as ",{...}" / "[{...}" lines.
            data.trim_start_matches(['[', ','])
                .trim_end_matches([']', ','])
                .trim()
        } else {
            data
        };
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return;
        };
        self.extract(&value);
    }

    fn extract(&mut self, value: &Value) {
        let found = match self.dialect {
            // Usage rides the final chunk when stream_options.include_usage
            // is set; earlier chunks carry an explicit null.
            Dialect::OpenAI => value.get("usage").and_then(Usage::from_value),
            Dialect::OpenAIResponses => {
                let completed = self.event.as_deref() == Some("response.completed")
                    || value.get("type").and_then(Value::as_str)
                        == Some("response.completed");
                if completed {
                    value
                        .get("response")
                        .and_then(|response| response.get("usage"))
                        .and_then(Usage::from_value)
                } else {
                    None
                }
            }
            Dialect::Anthropic => {
                if self.event.as_deref() == Some("message_delta")
                    || value.get("type").and_then(Value::as_str) == Some("message_delta")
                {
                    value.get("usage").and_then(Usage::from_value)
                } else {
                    None
                }
            }
            // Every chunk repeats the running totals; the last one wins.
            Dialect::Gemini => value.get("usageMetadata").and_then(Usage::from_value),
        };
        if let Some(found) = found {
            match &mut self.usage {
                Some(usage) => usage.merge(found),
                None => self.usage = Some(found),
            }
        }
    }
}

/// Usage out of a fully buffered (non-stream) response body.
pub fn parse_buffered_usage(dialect: Dialect, body: &[u8]) -> Option<Usage> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match dialect {
        Dialect::Gemini => value.get("usageMetadata").and_then(Usage::from_value),
        _ => value.get("usage").and_then(Usage::from_value),
    }
}
