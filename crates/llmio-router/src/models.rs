use axum::Json;
use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use llmio_provider::Dialect;

use crate::llm::extract_token;
use crate::state::AppState;

/// Advertise the logical models this caller is allowed to use, in the shape
/// of each dialect's catalog endpoint.
pub async fn openai_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    listing(state, Dialect::OpenAI, headers, None).await
}

pub async fn anthropic_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    listing(state, Dialect::Anthropic, headers, None).await
}

pub async fn gemini_models(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    listing(state, Dialect::Gemini, headers, query).await
}

async fn listing(
    state: AppState,
    dialect: Dialect,
    headers: HeaderMap,
    query: Option<String>,
) -> Response {
    let token = extract_token(dialect, &headers, query.as_deref());
    let principal = match state.auth.authorize(token.as_deref()).await {
        Ok(principal) => principal,
        Err(err) => return crate::llm::error_response(dialect, &err),
    };

    let models = match state.storage.list_model_names().await {
        Ok(models) => models,
        Err(err) => {
            return crate::llm::error_response(dialect, &err.into());
        }
    };
    let allowed: Vec<_> = models
        .into_iter()
        .filter(|model| principal.allows(&model.name))
        .collect();

    let body = match dialect {
        Dialect::OpenAI | Dialect::OpenAIResponses => json!({
            "object": "list",
            "data": allowed
                .iter()
                .map(|model| json!({
                    "id": model.name,
                    "object": "model",
                    "owned_by": "llmio",
                }))
                .collect::<Vec<_>>(),
        }),
        Dialect::Anthropic => json!({
            "data": allowed
                .iter()
                .map(|model| json!({
                    "type": "model",
                    "id": model.name,
                    "display_name": model.remark.clone().unwrap_or_else(|| model.name.clone()),
                }))
                .collect::<Vec<_>>(),
            "has_more": false,
        }),
        Dialect::Gemini => json!({
            "models": allowed
                .iter()
                .map(|model| json!({
                    "name": format!("models/{}", model.name),
                    "displayName": model.name,
                }))
                .collect::<Vec<_>>(),
        }),
    };
    Json(body).into_response()
}
