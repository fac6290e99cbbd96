use serde::{Deserialize, Serialize};

/// Wire-protocol shape an upstream provider speaks. The tag is stored on the
/// provider row and drives adapter construction; no open class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "openai-res")]
    OpenAIResponses,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
}

impl Dialect {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(Dialect::OpenAI),
            "openai-res" => Some(Dialect::OpenAIResponses),
            "anthropic" => Some(Dialect::Anthropic),
            "gemini" => Some(Dialect::Gemini),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::OpenAI => "openai",
            Dialect::OpenAIResponses => "openai-res",
            Dialect::Anthropic => "anthropic",
            Dialect::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
