use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, put};
use axum::Router;
use serde::Deserialize;
use serde_json::{Value, json};

use llmio_core::generate_auth_key;
use llmio_provider::{Adapter, Dialect, UpstreamConfig};
use llmio_storage::{
    AuthKeyInput, BindingInput, ChatLogFilter, ModelInput, ProviderInput, StorageError,
};

use crate::state::AppState;

/// Admin responses use the `{code, message, data}` envelope; logical errors
/// stay HTTP 200, only missing/invalid admin credentials are 401.
fn ok(data: impl serde::Serialize) -> Response {
    Json(json!({"code": 0, "message": "ok", "data": data})).into_response()
}

fn fail(code: i32, message: impl std::fmt::Display) -> Response {
    Json(json!({"code": code, "message": message.to_string(), "data": Value::Null}))
        .into_response()
}

fn storage_fail(err: StorageError) -> Response {
    fail(1, err)
}

pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/providers", get(list_providers).post(create_provider))
        .route("/providers/{id}", put(update_provider).delete(delete_provider))
        .route("/providers/{id}/models", get(probe_provider_models))
        .route("/models", get(list_models).post(create_model))
        .route("/models/{id}", put(update_model).delete(delete_model))
        .route("/model-providers", get(list_bindings).post(create_binding))
        .route("/model-providers/{id}", put(update_binding).delete(delete_binding))
        .route("/keys", get(list_keys).post(create_key))
        .route("/keys/{id}", put(update_key).delete(delete_key))
        .route("/logs", get(list_logs))
        .route("/config/{key}", get(get_config).put(set_config))
        .layer(middleware::from_fn_with_state(state.clone(), admin_guard))
        .with_state(state)
}

async fn admin_guard(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.auth.admin_token() else {
        return next.run(request).await;
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("Bearer "))
        .map(str::trim);
    if presented != Some(expected) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": 401, "message": "invalid admin token", "data": Value::Null})),
        )
            .into_response();
    }
    next.run(request).await
}

async fn list_providers(State(state): State<AppState>) -> Response {
    match state.storage.list_providers().await {
        Ok(rows) => ok(rows),
        Err(err) => storage_fail(err),
    }
}

async fn create_provider(
    State(state): State<AppState>,
    Json(input): Json<ProviderInput>,
) -> Response {
    if Dialect::parse(&input.dialect).is_none() {
        return fail(2, format!("unknown provider type: {}", input.dialect));
    }
    if let Err(err) = UpstreamConfig::parse(&input.config) {
        return fail(2, format!("invalid provider config: {err}"));
    }
    match state.storage.create_provider(&input).await {
        Ok(id) => ok(json!({"id": id})),
        Err(err) => storage_fail(err),
    }
}

async fn update_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<ProviderInput>,
) -> Response {
    if Dialect::parse(&input.dialect).is_none() {
        return fail(2, format!("unknown provider type: {}", input.dialect));
    }
    match state.storage.update_provider(id, &input).await {
        Ok(()) => ok(Value::Null),
        Err(err) => storage_fail(err),
    }
}

async fn delete_provider(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.storage.delete_provider(id).await {
        Ok(()) => ok(Value::Null),
        Err(err) => storage_fail(err),
    }
}

/// Probe the upstream catalog with the provider's own credentials.
async fn probe_provider_models(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let provider = match state.storage.get_provider(id).await {
        Ok(Some(provider)) => provider,
        Ok(None) => return fail(2, "provider not found"),
        Err(err) => return storage_fail(err),
    };
    let Some(dialect) = Dialect::parse(&provider.dialect) else {
        return fail(2, format!("unknown provider type: {}", provider.dialect));
    };
    let config = match UpstreamConfig::parse(&provider.config) {
        Ok(config) => config,
        Err(err) => return fail(2, format!("invalid provider config: {err}")),
    };
    let adapter = Adapter::new(dialect, config);
    let request = adapter.models_request();

    let client = match wreq::Client::builder().build() {
        Ok(client) => client,
        Err(err) => return fail(3, err),
    };
    let mut builder = client.get(&request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    let body = match builder.send().await {
        Ok(response) => response.bytes().await.unwrap_or_default(),
        Err(err) => return fail(3, format!("upstream catalog fetch failed: {err}")),
    };
    ok(adapter.parse_models(&body))
}

async fn list_models(State(state): State<AppState>) -> Response {
    match state.storage.list_model_names().await {
        Ok(rows) => ok(rows),
        Err(err) => storage_fail(err),
    }
}

async fn create_model(State(state): State<AppState>, Json(input): Json<ModelInput>) -> Response {
    match state.storage.create_model(&input).await {
        Ok(id) => ok(json!({"id": id})),
        Err(err) => storage_fail(err),
    }
}

async fn update_model(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<ModelInput>,
) -> Response {
    match state.storage.update_model(id, &input).await {
        Ok(()) => ok(Value::Null),
        Err(err) => storage_fail(err),
    }
}

async fn delete_model(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.storage.delete_model(id).await {
        Ok(()) => ok(Value::Null),
        Err(err) => storage_fail(err),
    }
}

#[derive(Debug, Deserialize)]
struct BindingQuery {
    model_id: Option<i64>,
}

async fn list_bindings(
    State(state): State<AppState>,
    Query(query): Query<BindingQuery>,
) -> Response {
    match state.storage.list_bindings(query.model_id).await {
        Ok(rows) => ok(rows),
        Err(err) => storage_fail(err),
    }
}

async fn create_binding(
    State(state): State<AppState>,
    Json(input): Json<BindingInput>,
) -> Response {
    if input.weight <= 0 {
        return fail(2, "weight must be positive");
    }
    match state.storage.create_binding(&input).await {
        Ok(id) => ok(json!({"id": id})),
        Err(err) => storage_fail(err),
    }
}

async fn update_binding(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<BindingInput>,
) -> Response {
    if input.weight <= 0 {
        return fail(2, "weight must be positive");
    }
    match state.storage.update_binding(id, &input).await {
        Ok(()) => ok(Value::Null),
        Err(err) => storage_fail(err),
    }
}

async fn delete_binding(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.storage.delete_binding(id).await {
        Ok(()) => ok(Value::Null),
        Err(err) => storage_fail(err),
    }
}

async fn list_keys(State(state): State<AppState>) -> Response {
    match state.storage.list_auth_keys().await {
        Ok(rows) => ok(rows),
        Err(err) => storage_fail(err),
    }
}

async fn create_key(State(state): State<AppState>, Json(input): Json<AuthKeyInput>) -> Response {
    if !input.allow_all && input.allow_models.is_empty() {
        return fail(2, "allow_models must not be empty unless allow_all is set");
    }
    let key = generate_auth_key();
    match state.storage.create_auth_key(&input, &key).await {
        Ok(id) => ok(json!({"id": id, "key": key})),
        Err(err) => storage_fail(err),
    }
}

async fn update_key(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<AuthKeyInput>,
) -> Response {
    if !input.allow_all && input.allow_models.is_empty() {
        return fail(2, "allow_models must not be empty unless allow_all is set");
    }
    match state.storage.update_auth_key(id, &input).await {
        Ok(()) => ok(Value::Null),
        Err(err) => storage_fail(err),
    }
}

async fn delete_key(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.storage.delete_auth_key(id).await {
        Ok(()) => ok(Value::Null),
        Err(err) => storage_fail(err),
    }
}

async fn list_logs(
    State(state): State<AppState>,
    Query(filter): Query<ChatLogFilter>,
) -> Response {
    match state.storage.chat_logs(&filter).await {
        Ok(page) => ok(page),
        Err(err) => storage_fail(err),
    }
}

async fn get_config(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.storage.config_get(&key).await {
        Ok(value) => ok(json!({"key": key, "value": value})),
        Err(err) => storage_fail(err),
    }
}

#[derive(Debug, Deserialize)]
struct ConfigBody {
    value: String,
}

async fn set_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ConfigBody>,
) -> Response {
    match state.storage.config_set(&key, &body.value).await {
        Ok(()) => ok(Value::Null),
        Err(err) => storage_fail(err),
    }
}
