mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use llmio_balance::{BreakerConfig, BreakerRegistry, BreakerState};
use llmio_core::{ChatOp, DispatchError, Dispatcher, Outbound, Principal, RequestEnvelope,
    RequestMeta};
use llmio_provider::{Dialect, RequestFeatures};
use llmio_storage::{LogSink, LogStatus, Storage};

use common::{
    CannedResponse, TestStorage, binding_row, model_row, provider_row, spawn_upstream,
};

fn envelope(model: &str, stream: bool, body: serde_json::Value) -> RequestEnvelope {
    RequestEnvelope {
        dialect: Dialect::OpenAI,
        model: model.to_string(),
        stream,
        body: Bytes::from(body.to_string()),
        features: RequestFeatures::default(),
        op: ChatOp::Chat,
        passthrough: Vec::new(),
    }
}

fn dispatcher(storage: Arc<TestStorage>, breakers: BreakerConfig) -> Dispatcher {
    let storage: Arc<dyn Storage> = storage;
    let sink = LogSink::spawn(storage.clone());
    Dispatcher::new(storage, sink, Arc::new(BreakerRegistry::new(breakers)))
}

async fn collect_stream(
    mut body: tokio::sync::mpsc::Receiver<Result<Bytes, std::io::Error>>,
) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = body.recv().await {
        out.extend_from_slice(&chunk.expect("stream chunk"));
    }
    out
}

#[tokio::test]
async fn happy_openai_stream_forwards_bytes_and_logs_usage() {
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}],\"usage\":null}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":7,\"total_tokens\":17}}\n\n",
        "data: [DONE]\n\n",
    );
    let upstream = spawn_upstream(vec![CannedResponse::sse(&[sse_body])]).await;

    let storage = Arc::new(TestStorage {
        models: vec![model_row(1, "m", "lottery", false)],
        bindings: vec![(
            binding_row(11, 1, 21, 10),
            provider_row(21, "up", "openai", &upstream.base_url),
        )],
        ..Default::default()
    });
    let dispatcher = dispatcher(storage.clone(), BreakerConfig::default());

    let outbound = dispatcher
        .dispatch(
            envelope("m", true, serde_json::json!({"model": "m", "stream": true, "messages": []})),
            &Principal::admin(),
            &RequestMeta::default(),
        )
        .await
        .expect("dispatch");

    let Outbound::Stream { status, body, .. } = outbound else {
        panic!("expected stream outbound");
    };
    assert_eq!(status, 200);
    let forwarded = collect_stream(body).await;
    assert_eq!(forwarded, sse_body.as_bytes());

    // The upstream saw the rewritten model and the injected usage option.
    let requests = upstream.requests.lock().await;
    assert!(requests[0].contains("\"model\":\"upstream-model\""));
    assert!(requests[0].contains("\"include_usage\":true"));
    drop(requests);

    let logs = storage.wait_for_logs(1).await;
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.status, LogStatus::Success);
    assert_eq!(log.retry, 0);
    assert_eq!(log.usage.prompt_tokens, 10);
    assert_eq!(log.usage.completion_tokens, 7);
    assert_eq!(log.usage.total_tokens, 17);
    assert_eq!(log.size as usize, sse_body.len());
    assert!(log.proxy_time_ms >= log.first_chunk_ms);
}

#[tokio::test]
async fn rate_limited_binding_is_demoted_then_peer_succeeds() {
    let upstream = spawn_upstream(vec![
        CannedResponse::json(429, r#"{"error":{"message":"rate limited"}}"#),
        CannedResponse::json(
            200,
            r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        ),
    ])
    .await;

    let storage = Arc::new(TestStorage {
        models: vec![model_row(1, "m", "lottery", true)],
        bindings: vec![
            (
                binding_row(11, 1, 21, 10),
                provider_row(21, "up-a", "openai", &upstream.base_url),
            ),
            (
                binding_row(12, 1, 22, 10),
                provider_row(22, "up-b", "openai", &upstream.base_url),
            ),
        ],
        ..Default::default()
    });
    let dispatcher = dispatcher(storage.clone(), BreakerConfig::default());

    let outbound = dispatcher
        .dispatch(
            envelope("m", false, serde_json::json!({"model": "m", "messages": []})),
            &Principal::admin(),
            &RequestMeta::default(),
        )
        .await
        .expect("dispatch");

    let Outbound::Buffered { status, body, .. } = outbound else {
        panic!("expected buffered outbound");
    };
    assert_eq!(status, 200);
    assert!(body.windows(7).any(|w| w == b"\"usage\""));

    let logs = storage.wait_for_logs(2).await;
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].status, LogStatus::Error);
    assert_eq!(logs[0].retry, 0);
    assert_eq!(logs[1].status, LogStatus::Success);
    assert_eq!(logs[1].retry, 1);

    // A lone 429 demotes the weight but never trips the breaker.
    for binding_id in [11, 12] {
        assert_ne!(
            dispatcher.breakers().state(binding_id),
            Some(BreakerState::Open)
        );
    }
}

#[tokio::test]
async fn hard_failure_cascade_exhausts_pool_and_trips_breakers() {
    let upstream = spawn_upstream(vec![
        CannedResponse::json(500, "upstream exploded"),
        CannedResponse::json(500, "upstream exploded"),
    ])
    .await;

    let storage = Arc::new(TestStorage {
        models: vec![model_row(1, "m", "lottery", true)],
        bindings: vec![
            (
                binding_row(11, 1, 21, 10),
                provider_row(21, "up-a", "openai", &upstream.base_url),
            ),
            (
                binding_row(12, 1, 22, 10),
                provider_row(22, "up-b", "openai", &upstream.base_url),
            ),
        ],
        ..Default::default()
    });
    let dispatcher = dispatcher(
        storage.clone(),
        BreakerConfig {
            max_failures: 1,
            sleep_window: Duration::from_secs(60),
            half_open_max: 1,
        },
    );

    let err = dispatcher
        .dispatch(
            envelope("m", false, serde_json::json!({"model": "m", "messages": []})),
            &Principal::admin(),
            &RequestMeta::default(),
        )
        .await
        .expect_err("all upstreams down");

    match err {
        DispatchError::Upstream { status, message } => {
            assert_eq!(status, Some(500));
            assert!(message.contains("500"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let logs = storage.wait_for_logs(2).await;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|log| log.status == LogStatus::Error));

    assert_eq!(dispatcher.breakers().state(11), Some(BreakerState::Open));
    assert_eq!(dispatcher.breakers().state(12), Some(BreakerState::Open));
}

#[tokio::test]
async fn capability_filter_rejects_before_any_upstream_call() {
    // No upstream is spawned: a hit would fail the test with a connect error
    // instead of NoEligibleBinding.
    let storage = Arc::new(TestStorage {
        models: vec![model_row(1, "m", "lottery", false)],
        bindings: vec![(
            binding_row(11, 1, 21, 10),
            provider_row(21, "up", "openai", "http://127.0.0.1:9"),
        )],
        ..Default::default()
    });
    let dispatcher = dispatcher(storage, BreakerConfig::default());

    let mut request = envelope(
        "m",
        false,
        serde_json::json!({"model": "m", "tools": [{"type": "function"}]}),
    );
    request.features = RequestFeatures {
        tools: true,
        ..Default::default()
    };

    let err = dispatcher
        .dispatch(request, &Principal::admin(), &RequestMeta::default())
        .await
        .expect_err("binding lacks tool_call");
    assert!(matches!(err, DispatchError::NoEligibleBinding));

    let mut request = envelope("m", false, serde_json::json!({"model": "m"}));
    request.features = RequestFeatures {
        vision: true,
        ..Default::default()
    };
    let err = dispatcher
        .dispatch(request, &Principal::admin(), &RequestMeta::default())
        .await
        .expect_err("binding lacks image capability");
    assert!(matches!(err, DispatchError::NoEligibleBinding));
}

#[tokio::test]
async fn unknown_model_and_disallowed_model_map_to_distinct_errors() {
    let storage = Arc::new(TestStorage {
        models: vec![model_row(1, "m", "lottery", false)],
        bindings: vec![(
            binding_row(11, 1, 21, 10),
            provider_row(21, "up", "openai", "http://127.0.0.1:9"),
        )],
        ..Default::default()
    });
    let dispatcher = dispatcher(storage, BreakerConfig::default());

    let err = dispatcher
        .dispatch(
            envelope("missing", false, serde_json::json!({"model": "missing"})),
            &Principal::admin(),
            &RequestMeta::default(),
        )
        .await
        .expect_err("unknown model");
    assert!(matches!(err, DispatchError::ModelNotFound(_)));

    let restricted = Principal {
        auth_key_id: 7,
        allow_all: false,
        allow_models: ["other".to_string()].into_iter().collect(),
    };
    let err = dispatcher
        .dispatch(
            envelope("m", false, serde_json::json!({"model": "m"})),
            &restricted,
            &RequestMeta::default(),
        )
        .await
        .expect_err("model not in allow list");
    assert!(matches!(err, DispatchError::Forbidden));
}

#[tokio::test]
async fn fingerprinted_success_body_is_retried_on_peer() {
    let upstream = spawn_upstream(vec![
        CannedResponse::json(200, r#"{"status":"439","message":"hidden failure"}"#),
        CannedResponse::json(
            200,
            r#"{"choices":[],"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}}"#,
        ),
    ])
    .await;

    let fingerprinted = {
        let mut provider = provider_row(21, "up-a", "openai", &upstream.base_url);
        provider.config = serde_json::json!({
            "base_url": upstream.base_url,
            "api_key": "upstream-key",
            "error_matchers": "\"status\":\"439\"",
        });
        provider
    };
    // Rotor keeps the selection order deterministic: the heavier
    // fingerprinted binding is probed first, its peer second.
    let storage = Arc::new(TestStorage {
        models: vec![model_row(1, "m", "rotor", false)],
        bindings: vec![
            (binding_row(11, 1, 21, 10), fingerprinted),
            (
                binding_row(12, 1, 22, 5),
                provider_row(22, "up-b", "openai", &upstream.base_url),
            ),
        ],
        ..Default::default()
    });
    let dispatcher = dispatcher(storage.clone(), BreakerConfig::default());

    let outbound = dispatcher
        .dispatch(
            envelope("m", false, serde_json::json!({"model": "m"})),
            &Principal::admin(),
            &RequestMeta::default(),
        )
        .await
        .expect("second binding succeeds");
    let Outbound::Buffered { body, .. } = outbound else {
        panic!("expected buffered outbound");
    };
    assert!(!body.windows(5).any(|w| w == b"\"439\""));

    let logs = storage.wait_for_logs(2).await;
    assert_eq!(logs[0].status, LogStatus::Error);
    assert!(logs[0]
        .error
        .as_deref()
        .unwrap()
        .contains("fingerprint"));
    assert_eq!(logs[1].status, LogStatus::Success);
}

#[tokio::test]
async fn client_disconnect_finalizes_error_log_promptly() {
    let slow = CannedResponse {
        status: 200,
        content_type: "text/event-stream",
        segments: vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec(),
            b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n".to_vec(),
            b"data: {\"choices\":[{\"delta\":{\"content\":\"c\"}}]}\n\n".to_vec(),
        ],
        pause_between: Duration::from_millis(200),
    };
    let upstream = spawn_upstream(vec![slow]).await;

    let storage = Arc::new(TestStorage {
        models: vec![model_row(1, "m", "lottery", false)],
        bindings: vec![(
            binding_row(11, 1, 21, 10),
            provider_row(21, "up", "openai", &upstream.base_url),
        )],
        ..Default::default()
    });
    let dispatcher = dispatcher(storage.clone(), BreakerConfig::default());

    let outbound = dispatcher
        .dispatch(
            envelope("m", true, serde_json::json!({"model": "m", "stream": true})),
            &Principal::admin(),
            &RequestMeta::default(),
        )
        .await
        .expect("dispatch");
    let Outbound::Stream { mut body, .. } = outbound else {
        panic!("expected stream outbound");
    };

    // Read one chunk, then hang up.
    let first = body.recv().await.expect("first chunk").expect("chunk ok");
    assert!(!first.is_empty());
    drop(body);

    let logs = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let logs = storage.logs.lock().await.clone();
            if !logs.is_empty() {
                return logs;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("log written within a second");

    assert_eq!(logs[0].status, LogStatus::Error);
    assert!(logs[0].error.as_deref().unwrap().contains("canceled"));
}

#[tokio::test]
async fn empty_model_is_a_bad_request() {
    let storage = Arc::new(TestStorage::default());
    let dispatcher = dispatcher(storage, BreakerConfig::default());
    let err = dispatcher
        .dispatch(
            envelope("", false, serde_json::json!({})),
            &Principal::admin(),
            &RequestMeta::default(),
        )
        .await
        .expect_err("missing model");
    assert!(matches!(err, DispatchError::BadRequest(_)));
}
