use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Schema,
};
use async_trait::async_trait;
use time::OffsetDateTime;

use crate::entities;
use crate::rows::{
    AuthKeyInput, AuthKeyRow, BindingInput, BindingRow, ChatLogDraft, ChatLogFilter, ChatLogPage,
    ChatLogRow, ModelInput, ModelRow, ProviderInput, ProviderRow,
};
use crate::storage::{Storage, StorageError, StorageResult};

const DEFAULT_LOG_PAGE_SIZE: u64 = 20;
const MAX_LOG_PAGE_SIZE: u64 = 200;

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        // Cascade deletes on bindings and io blobs rely on this in sqlite.
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Providers)
            .register(entities::Models)
            .register(entities::ModelProviders)
            .register(entities::AuthKeys)
            .register(entities::ChatLogs)
            .register(entities::ChatIos)
            .register(entities::Configs)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn migrate(&self) -> StorageResult<()> {
        // Bindings created before the enable flag existed carry NULL.
        self.db
            .execute_unprepared("UPDATE model_providers SET status = 1 WHERE status IS NULL")
            .await?;
        Ok(())
    }

    async fn find_model(&self, name: &str) -> StorageResult<Option<ModelRow>> {
        use entities::models::Column;
        let row = entities::Models::find()
            .filter(Column::Name.eq(name))
            .one(&self.db)
            .await?;
        Ok(row.map(model_row))
    }

    async fn list_model_names(&self) -> StorageResult<Vec<ModelRow>> {
        use entities::models::Column;
        let rows = entities::Models::find()
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(model_row).collect())
    }

    async fn bindings_for_model(
        &self,
        model_id: i64,
    ) -> StorageResult<Vec<(BindingRow, ProviderRow)>> {
        use entities::model_providers::Column;
        let bindings = entities::ModelProviders::find()
            .filter(Column::ModelId.eq(model_id))
            .filter(Column::Status.eq(true))
            .all(&self.db)
            .await?;
        if bindings.is_empty() {
            return Ok(Vec::new());
        }

        use entities::providers::Column as ProviderColumn;
        let provider_ids: Vec<i64> = bindings.iter().map(|binding| binding.provider_id).collect();
        let providers = entities::Providers::find()
            .filter(ProviderColumn::Id.is_in(provider_ids))
            .all(&self.db)
            .await?;

        let mut joined = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let Some(provider) = providers
                .iter()
                .find(|provider| provider.id == binding.provider_id)
            else {
                continue;
            };
            joined.push((binding_row(binding), provider_row(provider.clone())));
        }
        Ok(joined)
    }

    async fn touch_auth_key(
        &self,
        key: &str,
        now: OffsetDateTime,
    ) -> StorageResult<Option<AuthKeyRow>> {
        use entities::auth_keys::Column;
        let Some(model) = entities::AuthKeys::find()
            .filter(Column::Key.eq(key))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let mut active: entities::auth_keys::ActiveModel = model.clone().into();
        active.last_used_at = ActiveValue::Set(Some(now));
        let updated = active.update(&self.db).await?;
        Ok(Some(auth_key_row(updated)))
    }

    async fn bump_auth_key_usage(&self, id: i64) -> StorageResult<()> {
        use entities::auth_keys::Column;
        entities::AuthKeys::update_many()
            .col_expr(Column::UsageCount, Expr::col(Column::UsageCount).add(1))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_chat_log(&self, draft: &ChatLogDraft) -> StorageResult<i64> {
        let active = entities::chat_logs::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(draft.name.clone()),
            provider_model: ActiveValue::Set(draft.provider_model.clone()),
            provider_name: ActiveValue::Set(draft.provider_name.clone()),
            status: ActiveValue::Set(draft.status.as_str().to_string()),
            style: ActiveValue::Set(draft.style.clone()),
            user_agent: ActiveValue::Set(draft.user_agent.clone()),
            remote_ip: ActiveValue::Set(draft.remote_ip.clone()),
            auth_key_id: ActiveValue::Set(draft.auth_key_id),
            error: ActiveValue::Set(draft.error.clone()),
            retry: ActiveValue::Set(draft.retry),
            proxy_time_ms: ActiveValue::Set(draft.proxy_time_ms),
            first_chunk_ms: ActiveValue::Set(draft.first_chunk_ms),
            chunk_time_ms: ActiveValue::Set(draft.chunk_time_ms),
            tps: ActiveValue::Set(draft.tps),
            size: ActiveValue::Set(draft.size),
            prompt_tokens: ActiveValue::Set(draft.usage.prompt_tokens),
            completion_tokens: ActiveValue::Set(draft.usage.completion_tokens),
            total_tokens: ActiveValue::Set(draft.usage.total_tokens),
            prompt_tokens_details: ActiveValue::Set(draft.usage.prompt_tokens_details.clone()),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let inserted = entities::ChatLogs::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn insert_chat_io(
        &self,
        chat_log_id: i64,
        request: &[u8],
        response: &[u8],
    ) -> StorageResult<()> {
        let active = entities::chat_ios::ActiveModel {
            id: ActiveValue::NotSet,
            chat_log_id: ActiveValue::Set(chat_log_id),
            request: ActiveValue::Set(String::from_utf8_lossy(request).to_string()),
            response: ActiveValue::Set(String::from_utf8_lossy(response).to_string()),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::ChatIos::insert(active).exec(&self.db).await?;
        Ok(())
    }

    async fn chat_logs(&self, filter: &ChatLogFilter) -> StorageResult<ChatLogPage> {
        use entities::chat_logs::Column;
        let mut query = entities::ChatLogs::find();
        if let Some(model) = &filter.model {
            query = query.filter(Column::Name.eq(model));
        }
        if let Some(provider) = &filter.provider {
            query = query.filter(Column::ProviderName.eq(provider));
        }
        if let Some(status) = &filter.status {
            query = query.filter(Column::Status.eq(status));
        }

        let total = query.clone().count(&self.db).await?;
        let page_size = match filter.page_size {
            0 => DEFAULT_LOG_PAGE_SIZE,
            size => size.min(MAX_LOG_PAGE_SIZE),
        };
        let rows = query
            .order_by_desc(Column::Id)
            .offset(filter.page.saturating_sub(1).saturating_mul(page_size))
            .limit(page_size)
            .all(&self.db)
            .await?;
        Ok(ChatLogPage {
            total,
            rows: rows.into_iter().map(chat_log_row).collect(),
        })
    }

    async fn list_providers(&self) -> StorageResult<Vec<ProviderRow>> {
        use entities::providers::Column;
        let rows = entities::Providers::find()
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(provider_row).collect())
    }

    async fn get_provider(&self, id: i64) -> StorageResult<Option<ProviderRow>> {
        let row = entities::Providers::find_by_id(id).one(&self.db).await?;
        Ok(row.map(provider_row))
    }

    async fn create_provider(&self, input: &ProviderInput) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::providers::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(input.name.clone()),
            dialect: ActiveValue::Set(input.dialect.clone()),
            config: ActiveValue::Set(input.config.clone()),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = entities::Providers::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn update_provider(&self, id: i64, input: &ProviderInput) -> StorageResult<()> {
        let model = entities::Providers::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound("provider"))?;
        let mut active: entities::providers::ActiveModel = model.into();
        active.name = ActiveValue::Set(input.name.clone());
        active.dialect = ActiveValue::Set(input.dialect.clone());
        active.config = ActiveValue::Set(input.config.clone());
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn delete_provider(&self, id: i64) -> StorageResult<()> {
        entities::Providers::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    async fn create_model(&self, input: &ModelInput) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::models::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(input.name.clone()),
            remark: ActiveValue::Set(input.remark.clone()),
            max_retry: ActiveValue::Set(input.max_retry),
            time_out: ActiveValue::Set(input.time_out),
            io_log: ActiveValue::Set(input.io_log),
            strategy: ActiveValue::Set(input.strategy.clone()),
            breaker: ActiveValue::Set(input.breaker),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = entities::Models::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn update_model(&self, id: i64, input: &ModelInput) -> StorageResult<()> {
        let model = entities::Models::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound("model"))?;
        let mut active: entities::models::ActiveModel = model.into();
        active.name = ActiveValue::Set(input.name.clone());
        active.remark = ActiveValue::Set(input.remark.clone());
        active.max_retry = ActiveValue::Set(input.max_retry);
        active.time_out = ActiveValue::Set(input.time_out);
        active.io_log = ActiveValue::Set(input.io_log);
        active.strategy = ActiveValue::Set(input.strategy.clone());
        active.breaker = ActiveValue::Set(input.breaker);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn delete_model(&self, id: i64) -> StorageResult<()> {
        entities::Models::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    async fn list_bindings(&self, model_id: Option<i64>) -> StorageResult<Vec<BindingRow>> {
        use entities::model_providers::Column;
        let mut query = entities::ModelProviders::find().order_by_asc(Column::Id);
        if let Some(model_id) = model_id {
            query = query.filter(Column::ModelId.eq(model_id));
        }
        let rows = query.all(&self.db).await?;
        Ok(rows.into_iter().map(binding_row).collect())
    }

    async fn create_binding(&self, input: &BindingInput) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::model_providers::ActiveModel {
            id: ActiveValue::NotSet,
            model_id: ActiveValue::Set(input.model_id),
            provider_id: ActiveValue::Set(input.provider_id),
            provider_model: ActiveValue::Set(input.provider_model.clone()),
            tool_call: ActiveValue::Set(input.tool_call),
            structured_output: ActiveValue::Set(input.structured_output),
            image: ActiveValue::Set(input.image),
            with_header: ActiveValue::Set(input.with_header),
            status: ActiveValue::Set(input.status),
            customer_headers: ActiveValue::Set(headers_json(&input.customer_headers)),
            weight: ActiveValue::Set(input.weight),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = entities::ModelProviders::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn update_binding(&self, id: i64, input: &BindingInput) -> StorageResult<()> {
        let model = entities::ModelProviders::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound("binding"))?;
        let mut active: entities::model_providers::ActiveModel = model.into();
        active.model_id = ActiveValue::Set(input.model_id);
        active.provider_id = ActiveValue::Set(input.provider_id);
        active.provider_model = ActiveValue::Set(input.provider_model.clone());
        active.tool_call = ActiveValue::Set(input.tool_call);
        active.structured_output = ActiveValue::Set(input.structured_output);
        active.image = ActiveValue::Set(input.image);
        active.with_header = ActiveValue::Set(input.with_header);
        active.status = ActiveValue::Set(input.status);
        active.customer_headers = ActiveValue::Set(headers_json(&input.customer_headers));
        active.weight = ActiveValue::Set(input.weight);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn delete_binding(&self, id: i64) -> StorageResult<()> {
        entities::ModelProviders::delete_by_id(id)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn list_auth_keys(&self) -> StorageResult<Vec<AuthKeyRow>> {
        use entities::auth_keys::Column;
        let rows = entities::AuthKeys::find()
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(auth_key_row).collect())
    }

    async fn create_auth_key(&self, input: &AuthKeyInput, key: &str) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::auth_keys::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(input.name.clone()),
            key: ActiveValue::Set(key.to_string()),
            enabled: ActiveValue::Set(input.enabled),
            allow_all: ActiveValue::Set(input.allow_all),
            allow_models: ActiveValue::Set(serde_json::json!(input.allow_models)),
            expires_at: ActiveValue::Set(input.expires_at),
            usage_count: ActiveValue::Set(0),
            last_used_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = entities::AuthKeys::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn update_auth_key(&self, id: i64, input: &AuthKeyInput) -> StorageResult<()> {
        let model = entities::AuthKeys::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound("auth key"))?;
        let mut active: entities::auth_keys::ActiveModel = model.into();
        active.name = ActiveValue::Set(input.name.clone());
        active.enabled = ActiveValue::Set(input.enabled);
        active.allow_all = ActiveValue::Set(input.allow_all);
        active.allow_models = ActiveValue::Set(serde_json::json!(input.allow_models));
        active.expires_at = ActiveValue::Set(input.expires_at);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn delete_auth_key(&self, id: i64) -> StorageResult<()> {
        entities::AuthKeys::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    async fn config_get(&self, key: &str) -> StorageResult<Option<String>> {
        use entities::configs::Column;
        let row = entities::Configs::find()
            .filter(Column::Key.eq(key))
            .one(&self.db)
            .await?;
        Ok(row.map(|model| model.value))
    }

    async fn config_set(&self, key: &str, value: &str) -> StorageResult<()> {
        use entities::configs::Column;
        let now = OffsetDateTime::now_utc();
        match entities::Configs::find()
            .filter(Column::Key.eq(key))
            .one(&self.db)
            .await?
        {
            Some(model) => {
                let mut active: entities::configs::ActiveModel = model.into();
                active.value = ActiveValue::Set(value.to_string());
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = entities::configs::ActiveModel {
                    id: ActiveValue::NotSet,
                    key: ActiveValue::Set(key.to_string()),
                    value: ActiveValue::Set(value.to_string()),
                    updated_at: ActiveValue::Set(now),
                };
                entities::Configs::insert(active).exec(&self.db).await?;
            }
        }
        Ok(())
    }
}

fn provider_row(model: entities::providers::Model) -> ProviderRow {
    ProviderRow {
        id: model.id,
        name: model.name,
        dialect: model.dialect,
        config: model.config,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

fn model_row(model: entities::models::Model) -> ModelRow {
    ModelRow {
        id: model.id,
        name: model.name,
        remark: model.remark,
        max_retry: model.max_retry,
        time_out: model.time_out,
        io_log: model.io_log,
        strategy: model.strategy,
        breaker: model.breaker,
    }
}

fn binding_row(model: entities::model_providers::Model) -> BindingRow {
    let customer_headers = model
        .customer_headers
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|value| (name.clone(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();
    BindingRow {
        id: model.id,
        model_id: model.model_id,
        provider_id: model.provider_id,
        provider_model: model.provider_model,
        tool_call: model.tool_call,
        structured_output: model.structured_output,
        image: model.image,
        with_header: model.with_header,
        status: model.status,
        customer_headers,
        weight: model.weight,
    }
}

fn auth_key_row(model: entities::auth_keys::Model) -> AuthKeyRow {
    let allow_models = model
        .allow_models
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    AuthKeyRow {
        id: model.id,
        name: model.name,
        key: model.key,
        enabled: model.enabled,
        allow_all: model.allow_all,
        allow_models,
        expires_at: model.expires_at,
        usage_count: model.usage_count,
        last_used_at: model.last_used_at,
    }
}

fn chat_log_row(model: entities::chat_logs::Model) -> ChatLogRow {
    ChatLogRow {
        id: model.id,
        name: model.name,
        provider_model: model.provider_model,
        provider_name: model.provider_name,
        status: model.status,
        style: model.style,
        user_agent: model.user_agent,
        remote_ip: model.remote_ip,
        auth_key_id: model.auth_key_id,
        error: model.error,
        retry: model.retry,
        proxy_time_ms: model.proxy_time_ms,
        first_chunk_ms: model.first_chunk_ms,
        chunk_time_ms: model.chunk_time_ms,
        tps: model.tps,
        size: model.size,
        prompt_tokens: model.prompt_tokens,
        completion_tokens: model.completion_tokens,
        total_tokens: model.total_tokens,
        prompt_tokens_details: model.prompt_tokens_details,
        created_at: model.created_at,
    }
}

fn headers_json(headers: &[(String, String)]) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for (name, value) in headers {
        object.insert(name.clone(), serde_json::Value::String(value.clone()));
    }
    serde_json::Value::Object(object)
}
