use async_trait::async_trait;
use time::OffsetDateTime;

use crate::rows::{
    AuthKeyInput, AuthKeyRow, BindingInput, BindingRow, ChatLogDraft, ChatLogFilter, ChatLogPage,
    ModelInput, ModelRow, ProviderInput, ProviderRow,
};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
}

/// Typed data access for the routing core and the thin admin surface.
/// No business logic lives behind this trait.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync; enabled at every boot.
    async fn sync(&self) -> StorageResult<()>;
    /// One-shot data migrations that schema sync cannot express.
    async fn migrate(&self) -> StorageResult<()>;

    // Resolver reads.
    async fn find_model(&self, name: &str) -> StorageResult<Option<ModelRow>>;
    async fn list_model_names(&self) -> StorageResult<Vec<ModelRow>>;
    /// Enabled bindings for a model, joined with their providers.
    async fn bindings_for_model(
        &self,
        model_id: i64,
    ) -> StorageResult<Vec<(BindingRow, ProviderRow)>>;

    // Auth.
    /// Find an auth key by its opaque value and stamp `last_used_at` in the
    /// same round trip.
    async fn touch_auth_key(
        &self,
        key: &str,
        now: OffsetDateTime,
    ) -> StorageResult<Option<AuthKeyRow>>;
    async fn bump_auth_key_usage(&self, id: i64) -> StorageResult<()>;

    // Chat logs.
    async fn insert_chat_log(&self, draft: &ChatLogDraft) -> StorageResult<i64>;
    async fn insert_chat_io(
        &self,
        chat_log_id: i64,
        request: &[u8],
        response: &[u8],
    ) -> StorageResult<()>;
    async fn chat_logs(&self, filter: &ChatLogFilter) -> StorageResult<ChatLogPage>;

    // Admin CRUD.
    async fn list_providers(&self) -> StorageResult<Vec<ProviderRow>>;
    async fn get_provider(&self, id: i64) -> StorageResult<Option<ProviderRow>>;
    async fn create_provider(&self, input: &ProviderInput) -> StorageResult<i64>;
    async fn update_provider(&self, id: i64, input: &ProviderInput) -> StorageResult<()>;
    async fn delete_provider(&self, id: i64) -> StorageResult<()>;

    async fn create_model(&self, input: &ModelInput) -> StorageResult<i64>;
    async fn update_model(&self, id: i64, input: &ModelInput) -> StorageResult<()>;
    async fn delete_model(&self, id: i64) -> StorageResult<()>;

    async fn list_bindings(&self, model_id: Option<i64>) -> StorageResult<Vec<BindingRow>>;
    async fn create_binding(&self, input: &BindingInput) -> StorageResult<i64>;
    async fn update_binding(&self, id: i64, input: &BindingInput) -> StorageResult<()>;
    async fn delete_binding(&self, id: i64) -> StorageResult<()>;

    async fn list_auth_keys(&self) -> StorageResult<Vec<AuthKeyRow>>;
    async fn create_auth_key(&self, input: &AuthKeyInput, key: &str) -> StorageResult<i64>;
    async fn update_auth_key(&self, id: i64, input: &AuthKeyInput) -> StorageResult<()>;
    async fn delete_auth_key(&self, id: i64) -> StorageResult<()>;

    async fn config_get(&self, key: &str) -> StorageResult<Option<String>>;
    async fn config_set(&self, key: &str, value: &str) -> StorageResult<()>;
}
