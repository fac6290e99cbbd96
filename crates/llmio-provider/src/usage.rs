use serde_json::Value;

/// Token accounting extracted from an upstream response. Field names vary by
/// dialect (`prompt_tokens` / `input_tokens` / `promptTokenCount`), so
/// extraction is name-tolerant and normalized afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub prompt_tokens_details: Option<Value>,
}

impl Usage {
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut usage = Usage {
            prompt_tokens: pick(object, &["prompt_tokens", "input_tokens", "promptTokenCount"]),
            completion_tokens: pick(
                object,
                &["completion_tokens", "output_tokens", "candidatesTokenCount"],
            ),
            total_tokens: pick(object, &["total_tokens", "totalTokenCount"]),
            prompt_tokens_details: object
                .get("prompt_tokens_details")
                .or_else(|| object.get("promptTokensDetails"))
                .filter(|details| !details.is_null())
                .cloned(),
        };
        if usage.prompt_tokens == 0 && usage.completion_tokens == 0 && usage.total_tokens == 0 {
            return None;
        }
        if usage.total_tokens == 0 {
            usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
        }
        Some(usage)
    }

    /// Later events win field-by-field; Anthropic splits input and output
    /// accounting across separate stream events.
    pub fn merge(&mut self, other: Usage) {
        if other.prompt_tokens > 0 {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens > 0 {
            self.completion_tokens = other.completion_tokens;
        }
        self.total_tokens = if other.total_tokens > self.prompt_tokens + self.completion_tokens {
            other.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        };
        if other.prompt_tokens_details.is_some() {
            self.prompt_tokens_details = other.prompt_tokens_details;
        }
    }
}

fn pick(object: &serde_json::Map<String, Value>, names: &[&str]) -> i64 {
    names
        .iter()
        .filter_map(|name| object.get(*name))
        .filter_map(Value::as_i64)
        .next()
        .unwrap_or(0)
}
