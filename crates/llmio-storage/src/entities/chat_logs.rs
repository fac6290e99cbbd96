use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "chat_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Logical model name the caller asked for.
    pub name: String,
    pub provider_model: String,
    pub provider_name: String,
    /// success | error.
    pub status: String,
    /// Dialect tag of the downstream request.
    pub style: String,
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
    /// 0 means the admin token was used.
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
    pub prompt_tokens_details: Option<Json>,
    pub created_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub ios: HasMany<super::chat_ios::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
