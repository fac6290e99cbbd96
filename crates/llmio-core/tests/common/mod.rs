#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use time::OffsetDateTime;

use llmio_storage::{
    AuthKeyInput, AuthKeyRow, BindingInput, BindingRow, ChatLogDraft, ChatLogFilter, ChatLogPage,
    ModelInput, ModelRow, ProviderInput, ProviderRow, Storage, StorageResult,
};

/// In-memory storage fake with just enough behavior for routing tests.
#[derive(Default)]
pub struct TestStorage {
    pub models: Vec<ModelRow>,
    pub bindings: Vec<(BindingRow, ProviderRow)>,
    pub auth_keys: Vec<AuthKeyRow>,
    pub touch_delay: Duration,
    pub touch_count: AtomicU64,
    pub usage_bumps: AtomicU64,
    pub logs: Mutex<Vec<ChatLogDraft>>,
    pub ios: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl TestStorage {
    pub async fn wait_for_logs(&self, count: usize) -> Vec<ChatLogDraft> {
        for _ in 0..100 {
            {
                let logs = self.logs.lock().await;
                if logs.len() >= count {
                    return logs.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.logs.lock().await.clone()
    }
}

#[async_trait]
impl Storage for TestStorage {
    async fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn migrate(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn find_model(&self, name: &str) -> StorageResult<Option<ModelRow>> {
        Ok(self.models.iter().find(|model| model.name == name).cloned())
    }

    async fn list_model_names(&self) -> StorageResult<Vec<ModelRow>> {
        Ok(self.models.clone())
    }

    async fn bindings_for_model(
        &self,
        model_id: i64,
    ) -> StorageResult<Vec<(BindingRow, ProviderRow)>> {
        Ok(self
            .bindings
            .iter()
            .filter(|(binding, _)| binding.model_id == model_id && binding.status)
            .cloned()
            .collect())
    }

    async fn touch_auth_key(
        &self,
        key: &str,
        _now: OffsetDateTime,
    ) -> StorageResult<Option<AuthKeyRow>> {
        self.touch_count.fetch_add(1, Ordering::SeqCst);
        if !self.touch_delay.is_zero() {
            tokio::time::sleep(self.touch_delay).await;
        }
        Ok(self.auth_keys.iter().find(|row| row.key == key).cloned())
    }

    async fn bump_auth_key_usage(&self, _id: i64) -> StorageResult<()> {
        self.usage_bumps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_chat_log(&self, draft: &ChatLogDraft) -> StorageResult<i64> {
        let mut logs = self.logs.lock().await;
        logs.push(draft.clone());
        Ok(logs.len() as i64)
    }

    async fn insert_chat_io(
        &self,
        _chat_log_id: i64,
        request: &[u8],
        response: &[u8],
    ) -> StorageResult<()> {
        self.ios.lock().await.push((request.to_vec(), response.to_vec()));
        Ok(())
    }

    async fn chat_logs(&self, _filter: &ChatLogFilter) -> StorageResult<ChatLogPage> {
        Ok(ChatLogPage {
            total: 0,
            rows: Vec::new(),
        })
    }

    async fn list_providers(&self) -> StorageResult<Vec<ProviderRow>> {
        Ok(Vec::new())
    }

    async fn get_provider(&self, _id: i64) -> StorageResult<Option<ProviderRow>> {
        Ok(None)
    }

    async fn create_provider(&self, _input: &ProviderInput) -> StorageResult<i64> {
        Ok(0)
    }

    async fn update_provider(&self, _id: i64, _input: &ProviderInput) -> StorageResult<()> {
        Ok(())
    }

    async fn delete_provider(&self, _id: i64) -> StorageResult<()> {
        Ok(())
    }

    async fn create_model(&self, _input: &ModelInput) -> StorageResult<i64> {
        Ok(0)
    }

    async fn update_model(&self, _id: i64, _input: &ModelInput) -> StorageResult<()> {
        Ok(())
    }

    async fn delete_model(&self, _id: i64) -> StorageResult<()> {
        Ok(())
    }

    async fn list_bindings(&self, _model_id: Option<i64>) -> StorageResult<Vec<BindingRow>> {
        Ok(Vec::new())
    }

    async fn create_binding(&self, _input: &BindingInput) -> StorageResult<i64> {
        Ok(0)
    }

    async fn update_binding(&self, _id: i64, _input: &BindingInput) -> StorageResult<()> {
        Ok(())
    }

    async fn delete_binding(&self, _id: i64) -> StorageResult<()> {
        Ok(())
    }

    async fn list_auth_keys(&self) -> StorageResult<Vec<AuthKeyRow>> {
        Ok(self.auth_keys.clone())
    }

    async fn create_auth_key(&self, _input: &AuthKeyInput, _key: &str) -> StorageResult<i64> {
        Ok(0)
    }

    async fn update_auth_key(&self, _id: i64, _input: &AuthKeyInput) -> StorageResult<()> {
        Ok(())
    }

    async fn delete_auth_key(&self, _id: i64) -> StorageResult<()> {
        Ok(())
    }

    async fn config_get(&self, _key: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    async fn config_set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Ok(())
    }
}

pub fn model_row(id: i64, name: &str, strategy: &str, breaker: bool) -> ModelRow {
    ModelRow {
        id,
        name: name.to_string(),
        remark: None,
        max_retry: 3,
        time_out: 30,
        io_log: false,
        strategy: strategy.to_string(),
        breaker,
    }
}

pub fn provider_row(id: i64, name: &str, dialect: &str, base_url: &str) -> ProviderRow {
    ProviderRow {
        id,
        name: name.to_string(),
        dialect: dialect.to_string(),
        config: serde_json::json!({"base_url": base_url, "api_key": "upstream-key"}),
        created_at: OffsetDateTime::UNIX_EPOCH,
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

pub fn binding_row(id: i64, model_id: i64, provider_id: i64, weight: i64) -> BindingRow {
    BindingRow {
        id,
        model_id,
        provider_id,
        provider_model: "upstream-model".to_string(),
        tool_call: false,
        structured_output: false,
        image: false,
        with_header: false,
        status: true,
        customer_headers: Vec::new(),
        weight,
    }
}

pub fn auth_key_row(id: i64, key: &str, enabled: bool) -> AuthKeyRow {
    AuthKeyRow {
        id,
        name: format!("key-{id}"),
        key: key.to_string(),
        enabled,
        allow_all: true,
        allow_models: Vec::new(),
        expires_at: None,
        usage_count: 0,
        last_used_at: None,
    }
}

/// One canned upstream exchange: status line extras, headers, body, and an
/// optional pause inserted between body segments.
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub segments: Vec<Vec<u8>>,
    pub pause_between: Duration,
}

impl CannedResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            segments: vec![body.as_bytes().to_vec()],
            pause_between: Duration::ZERO,
        }
    }

    pub fn sse(segments: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            segments: segments.iter().map(|s| s.as_bytes().to_vec()).collect(),
            pause_between: Duration::ZERO,
        }
    }
}

/// Minimal hand-rolled HTTP/1.1 upstream. Serves the canned responses in
/// order, one connection each, and records every request it saw.
pub struct FakeUpstream {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<String>>>,
}

pub async fn spawn_upstream(responses: Vec<CannedResponse>) -> FakeUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let seen = requests.clone();
    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let seen = seen.clone();
            tokio::spawn(async move {
                let raw = read_request(&mut socket).await;
                seen.lock().await.push(raw);

                let reason = match response.status {
                    200 => "OK",
                    429 => "Too Many Requests",
                    500 => "Internal Server Error",
                    _ => "Error",
                };
                let body_len: usize =
                    response.segments.iter().map(|segment| segment.len()).sum();
                let head = format!(
                    "HTTP/1.1 {} {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    response.status, reason, response.content_type, body_len,
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for segment in &response.segments {
                    if socket.write_all(segment).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                    if !response.pause_between.is_zero() {
                        tokio::time::sleep(response.pause_between).await;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    FakeUpstream {
        base_url: format!("http://{addr}"),
        requests,
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let Ok(n) = socket.read(&mut chunk).await else {
            break;
        };
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = find_header_end(&buffer) {
            let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.trim()
                        .eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if buffer.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buffer).to_string()
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}
