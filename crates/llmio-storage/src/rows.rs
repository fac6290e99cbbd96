use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use llmio_provider::Usage;

/// Plain data rows handed to the routing core. Entity models stay private to
/// this crate.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRow {
    pub id: i64,
    pub name: String,
    pub dialect: String,
    pub config: Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelRow {
    pub id: i64,
    pub name: String,
    pub remark: Option<String>,
    pub max_retry: i32,
    pub time_out: i32,
    pub io_log: bool,
    pub strategy: String,
    pub breaker: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingRow {
    pub id: i64,
    pub model_id: i64,
    pub provider_id: i64,
    pub provider_model: String,
    pub tool_call: bool,
    pub structured_output: bool,
    pub image: bool,
    pub with_header: bool,
    pub status: bool,
    pub customer_headers: Vec<(String, String)>,
    pub weight: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthKeyRow {
    pub id: i64,
    pub name: String,
    pub key: String,
    pub enabled: bool,
    pub allow_all: bool,
    pub allow_models: Vec<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub usage_count: i64,
    pub last_used_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
        }
    }
}

/// One dispatched attempt (or completed request), ready to persist.
#[derive(Debug, Clone)]
pub struct ChatLogDraft {
    pub name: String,
    pub provider_model: String,
    pub provider_name: String,
    pub status: LogStatus,
    pub style: String,
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
    pub auth_key_id: i64,
    pub error: Option<String>,
    pub retry: i32,
    pub proxy_time_ms: i64,
    pub first_chunk_ms: i64,
    pub chunk_time_ms: i64,
    pub tps: f64,
    pub size: i64,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatLogRow {
    pub id: i64,
    pub name: String,
    pub provider_model: String,
    pub provider_name: String,
    pub status: String,
    pub style: String,
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
    pub auth_key_id: i64,
    pub error: Option<String>,
    pub retry: i32,
    pub proxy_time_ms: i64,
    pub first_chunk_ms: i64,
    pub chunk_time_ms: i64,
    pub tps: f64,
    pub size: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub prompt_tokens_details: Option<Value>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatLogFilter {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatLogPage {
    pub total: u64,
    pub rows: Vec<ChatLogRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInput {
    pub name: String,
    #[serde(rename = "type")]
    pub dialect: String,
    pub config: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInput {
    pub name: String,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default = "default_max_retry")]
    pub max_retry: i32,
    #[serde(default = "default_time_out")]
    pub time_out: i32,
    #[serde(default)]
    pub io_log: bool,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub breaker: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindingInput {
    pub model_id: i64,
    pub provider_id: i64,
    pub provider_model: String,
    #[serde(default)]
    pub tool_call: bool,
    #[serde(default)]
    pub structured_output: bool,
    #[serde(default)]
    pub image: bool,
    #[serde(default)]
    pub with_header: bool,
    #[serde(default = "default_status")]
    pub status: bool,
    #[serde(default)]
    pub customer_headers: Vec<(String, String)>,
    #[serde(default = "default_weight")]
    pub weight: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthKeyInput {
    pub name: String,
    #[serde(default = "default_status")]
    pub enabled: bool,
    #[serde(default)]
    pub allow_all: bool,
    #[serde(default)]
    pub allow_models: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<OffsetDateTime>,
}

fn default_max_retry() -> i32 {
    3
}

fn default_time_out() -> i32 {
    30
}

fn default_strategy() -> String {
    "lottery".to_string()
}

fn default_status() -> bool {
    true
}

fn default_weight() -> i64 {
    1
}
