use axum::Router;
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use llmio_core::{ChatOp, DispatchError, Outbound, RequestEnvelope, RequestMeta};
use llmio_provider::{Dialect, detect_features};

use crate::models;
use crate::state::AppState;

pub fn llm_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/responses", post(openai_responses))
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1/messages/count_tokens", post(anthropic_count_tokens))
        .route("/v1/models", get(models::openai_models))
        .route("/v1/messages/models", get(models::anthropic_models))
        .route("/v1beta/models", get(models::gemini_models))
        .route("/v1beta/models/{*model_action}", post(gemini_generate))
        .with_state(state)
}

async fn openai_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = match parse_json(Dialect::OpenAI, &body) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let model = json_model(&parsed);
    let stream = parsed
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    serve(
        state,
        Dialect::OpenAI,
        ChatOp::Chat,
        model,
        stream,
        parsed,
        body,
        headers,
        None,
    )
    .await
}

async fn openai_responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = match parse_json(Dialect::OpenAIResponses, &body) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let model = json_model(&parsed);
    let stream = parsed
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    serve(
        state,
        Dialect::OpenAIResponses,
        ChatOp::Chat,
        model,
        stream,
        parsed,
        body,
        headers,
        None,
    )
    .await
}

async fn anthropic_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = match parse_json(Dialect::Anthropic, &body) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let model = json_model(&parsed);
    let stream = parsed
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    serve(
        state,
        Dialect::Anthropic,
        ChatOp::Chat,
        model,
        stream,
        parsed,
        body,
        headers,
        None,
    )
    .await
}

async fn anthropic_count_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = match parse_json(Dialect::Anthropic, &body) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let model = json_model(&parsed);
    serve(
        state,
        Dialect::Anthropic,
        ChatOp::CountTokens,
        model,
        false,
        parsed,
        body,
        headers,
        None,
    )
    .await
}

async fn gemini_generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((model, action)) = model_action.split_once(':') else {
        return error_response(
            Dialect::Gemini,
            &DispatchError::BadRequest("missing model action".to_string()),
        );
    };
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            return error_response(
                Dialect::Gemini,
                &DispatchError::BadRequest(format!("unknown action: {action}")),
            );
        }
    };
    let parsed = match parse_json(Dialect::Gemini, &body) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    serve(
        state,
        Dialect::Gemini,
        ChatOp::Chat,
        model.to_string(),
        stream,
        parsed,
        body,
        headers,
        query.as_deref(),
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn serve(
    state: AppState,
    dialect: Dialect,
    op: ChatOp,
    model: String,
    stream: bool,
    parsed: Value,
    body: Bytes,
    headers: HeaderMap,
    query: Option<&str>,
) -> Response {
    let token = extract_token(dialect, &headers, query);
    let principal = match state.auth.authorize(token.as_deref()).await {
        Ok(principal) => principal,
        Err(err) => return error_response(dialect, &err),
    };

    let envelope = RequestEnvelope {
        dialect,
        model,
        stream,
        body,
        features: detect_features(dialect, &parsed),
        op,
        passthrough: plain_headers(&headers),
    };
    let meta = RequestMeta {
        user_agent: header_value(&headers, header::USER_AGENT.as_str()),
        remote_ip: remote_ip(&headers),
    };
    info!(
        event = "llm_request",
        dialect = %dialect,
        model = %envelope.model,
        stream,
        auth_key_id = principal.auth_key_id,
    );

    match state.dispatcher.dispatch(envelope, &principal, &meta).await {
        Ok(outbound) => success_response(dialect, stream, outbound),
        Err(err) => error_response(dialect, &err),
    }
}

fn success_response(dialect: Dialect, stream: bool, outbound: Outbound) -> Response {
    match outbound {
        Outbound::Buffered {
            status,
            content_type,
            body,
        } => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            set_content_type(&mut response, content_type, "application/json");
            response
        }
        Outbound::Stream {
            status,
            content_type,
            body,
        } => {
            let mut response = Response::new(Body::from_stream(ReceiverStream::new(body)));
            *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            let fallback = if stream && dialect != Dialect::Gemini {
                "text/event-stream"
            } else {
                "application/json"
            };
            set_content_type(&mut response, content_type, fallback);
            // Intermediaries must not buffer or reshape the stream.
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
        }
    }
}

fn set_content_type(response: &mut Response, value: Option<String>, fallback: &'static str) {
    let header_value = value
        .and_then(|value| HeaderValue::from_str(&value).ok())
        .unwrap_or_else(|| HeaderValue::from_static(fallback));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header_value);
}

pub(crate) fn error_response(dialect: Dialect, err: &DispatchError) -> Response {
    let body = match dialect {
        Dialect::Anthropic => serde_json::json!({
            "type": "error",
            "error": {"type": err.error_type(), "message": err.to_string()},
        }),
        _ => err.body(),
    };
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() =
        StatusCode::from_u16(err.status().as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn parse_json(dialect: Dialect, body: &Bytes) -> Result<Value, Response> {
    if body.is_empty() {
        return Err(error_response(
            dialect,
            &DispatchError::BadRequest("missing request body".to_string()),
        ));
    }
    serde_json::from_slice(body).map_err(|err| {
        error_response(
            dialect,
            &DispatchError::BadRequest(format!("invalid json: {err}")),
        )
    })
}

fn json_model(parsed: &Value) -> String {
    parsed
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn extract_token(
    dialect: Dialect,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Option<String> {
    match dialect {
        Dialect::OpenAI | Dialect::OpenAIResponses => bearer_token(headers),
        Dialect::Anthropic => header_value(headers, "x-api-key").or_else(|| bearer_token(headers)),
        Dialect::Gemini => header_value(headers, "x-goog-api-key")
            .or_else(|| query_key(query))
            .or_else(|| bearer_token(headers)),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = header_value(headers, header::AUTHORIZATION.as_str())?;
    let auth = auth.trim();
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
}

fn query_key(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("key="))
        .map(str::to_string)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn plain_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn remote_ip(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .map(|chain| chain.split(',').next().unwrap_or_default().trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_value(headers, "x-real-ip"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_credentials_per_dialect() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok-1"));
        assert_eq!(
            extract_token(Dialect::OpenAI, &headers, None).as_deref(),
            Some("tok-1")
        );

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("tok-2"));
        assert_eq!(
            extract_token(Dialect::Anthropic, &headers, None).as_deref(),
            Some("tok-2")
        );

        let headers = HeaderMap::new();
        assert_eq!(
            extract_token(Dialect::Gemini, &headers, Some("alt=sse&key=tok-3")).as_deref(),
            Some("tok-3")
        );
        assert!(extract_token(Dialect::OpenAI, &headers, None).is_none());
    }

    #[test]
    fn forwarded_chain_yields_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.1.2.3, 172.16.0.1"),
        );
        assert_eq!(remote_ip(&headers).as_deref(), Some("10.1.2.3"));
    }
}
