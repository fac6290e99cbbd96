use serde_json::Value;

use crate::dialect::Dialect;

/// Capabilities a request demands from a binding, detected from the raw body
/// before any upstream is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFeatures {
    pub tools: bool,
    pub structured_output: bool,
    pub vision: bool,
}

pub fn detect_features(dialect: Dialect, body: &Value) -> RequestFeatures {
    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .is_some_and(|tools| !tools.is_empty());

    let structured_output = match dialect {
        Dialect::OpenAI | Dialect::Anthropic => body.get("response_format").is_some(),
        Dialect::OpenAIResponses => body
            .get("text")
            .and_then(|text| text.get("format"))
            .is_some(),
        Dialect::Gemini => body
            .get("generationConfig")
            .is_some_and(|config| {
                config.get("responseSchema").is_some() || config.get("responseMimeType").is_some()
            }),
    };

    let vision = match dialect {
        Dialect::OpenAI => messages_have_part(body, "messages", &["image_url"]),
        Dialect::OpenAIResponses => messages_have_part(body, "input", &["input_image"]),
        Dialect::Anthropic => messages_have_part(body, "messages", &["image"]),
        Dialect::Gemini => gemini_has_inline_media(body),
    };

    RequestFeatures {
        tools,
        structured_output,
        vision,
    }
}

fn messages_have_part(body: &Value, list_key: &str, part_types: &[&str]) -> bool {
    let Some(messages) = body.get(list_key).and_then(Value::as_array) else {
        return false;
    };
    messages.iter().any(|message| {
        message
            .get("content")
            .and_then(Value::as_array)
            .is_some_and(|parts| {
                parts.iter().any(|part| {
                    part.get("type")
                        .and_then(Value::as_str)
                        .is_some_and(|kind| part_types.contains(&kind))
                })
            })
    })
}

fn gemini_has_inline_media(body: &Value) -> bool {
    let Some(contents) = body.get("contents").and_then(Value::as_array) else {
        return false;
    };
    contents.iter().any(|content| {
        content
            .get("parts")
            .and_then(Value::as_array)
            .is_some_and(|parts| {
                parts.iter().any(|part| {
                    part.get("inline_data").is_some()
                        || part.get("inlineData").is_some()
                        || part.get("file_data").is_some()
                        || part.get("fileData").is_some()
                })
            })
    })
}
