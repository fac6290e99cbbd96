use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{info, warn};

use llmio_balance::{BalanceError, Balancer, BreakerRegistry, GuardedBalancer, Strategy};
use llmio_provider::{
    Adapter, Dialect, HttpMethod, RequestFeatures, UpstreamConfig, UpstreamRequest, Usage,
    UsageScanner, parse_buffered_usage,
};
use llmio_storage::{ChatLogDraft, LogEntry, LogSink, LogStatus, Storage};

use crate::client::ClientCache;
use crate::error::DispatchError;
use crate::principal::Principal;
use crate::resolver::{ResolvedRoute, RouteChoice, resolve};
use crate::tee::{TeeParams, spawn_tee, tokens_per_second};

/// Wall-clock budget for the whole retry loop, independent of per-attempt
/// timeouts.
const RETRY_WALL: Duration = Duration::from_secs(20);
/// How much of an upstream error body lands in the log / surfaced error.
const ERROR_SNIPPET_MAX: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOp {
    Chat,
    /// Anthropic token counter; forwarded without usage processing.
    CountTokens,
}

/// Parsed request envelope handed over by the HTTP edge.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub dialect: Dialect,
    pub model: String,
    pub stream: bool,
    pub body: Bytes,
    pub features: RequestFeatures,
    pub op: ChatOp,
    /// Raw caller headers, forwarded upstream only for bindings that opt in.
    pub passthrough: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
}

/// What goes back to the edge on success: either a fully buffered body or a
/// live stream whose bytes are simultaneously fed to the usage processor.
pub enum Outbound {
    Buffered {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },
    Stream {
        status: u16,
        content_type: Option<String>,
        body: mpsc::Receiver<Result<Bytes, io::Error>>,
    },
}

pub struct Dispatcher {
    storage: Arc<dyn Storage>,
    sink: LogSink,
    clients: ClientCache,
    breakers: Arc<BreakerRegistry>,
}

impl Dispatcher {
    pub fn new(
        storage: Arc<dyn Storage>,
        sink: LogSink,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            storage,
            sink,
            clients: ClientCache::new(),
            breakers,
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// The central loop: pick a binding, call its upstream, classify
    /// failures, demote or evict, and hand the first healthy response back.
    /// Nothing is retried after the first byte has been forwarded.
    pub async fn dispatch(
        &self,
        envelope: RequestEnvelope,
        principal: &Principal,
        meta: &RequestMeta,
    ) -> Result<Outbound, DispatchError> {
        if envelope.model.trim().is_empty() {
            return Err(DispatchError::BadRequest("model is required".to_string()));
        }

        let route = resolve(&self.storage, &envelope.model, envelope.features, principal).await?;
        let max_retry = route.model.max_retry.max(1);
        let response_timeout = Duration::from_secs(route.model.time_out.max(1) as u64);
        // Streams need a fast first byte; the full deadline is reserved for
        // buffered responses.
        let header_timeout = if envelope.stream {
            response_timeout / 3
        } else {
            response_timeout
        };

        let candidates: Vec<(i64, i64)> = route
            .choices
            .iter()
            .map(|choice| (choice.binding.id, choice.binding.weight))
            .collect();
        let mut balancer: Box<dyn Balancer> =
            Strategy::parse(&route.model.strategy).build(&candidates);
        if route.model.breaker {
            balancer = Box::new(GuardedBalancer::new(balancer, self.breakers.clone()));
        }

        let deadline = Instant::now() + RETRY_WALL;
        let mut last_error: Option<DispatchError> = None;

        for retry in 0..max_retry {
            if Instant::now() >= deadline {
                return Err(DispatchError::RetryTimeout);
            }
            let binding_id = match balancer.pop() {
                Ok(id) => id,
                Err(BalanceError::Exhausted) => {
                    return Err(last_error.unwrap_or(DispatchError::NoEligibleBinding));
                }
            };
            let Some(choice) = route.choice(binding_id) else {
                balancer.delete(binding_id);
                continue;
            };

            match self
                .attempt(&envelope, principal, meta, &route, choice, retry, header_timeout)
                .await
            {
                AttemptOutcome::Done(outbound) => {
                    if route.model.breaker {
                        self.breakers.record_success(binding_id);
                    }
                    return Ok(outbound);
                }
                AttemptOutcome::Fatal(err) => return Err(err),
                AttemptOutcome::Retry { demote_only, error } => {
                    if demote_only {
                        balancer.reduce(binding_id);
                    } else {
                        balancer.delete(binding_id);
                    }
                    warn!(
                        event = "attempt_failed",
                        model = %envelope.model,
                        provider = %choice.provider.name,
                        binding_id,
                        retry,
                        demote_only,
                        error = %error,
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or(DispatchError::NoEligibleBinding))
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        envelope: &RequestEnvelope,
        principal: &Principal,
        meta: &RequestMeta,
        route: &ResolvedRoute,
        choice: &RouteChoice,
        retry: i32,
        header_timeout: Duration,
    ) -> AttemptOutcome {
        let started = Instant::now();

        let Some(dialect) = Dialect::parse(&choice.provider.dialect) else {
            let error = format!("unknown provider dialect: {}", choice.provider.dialect);
            self.record_error(envelope, principal, meta, route, choice, retry, started, &error);
            return AttemptOutcome::Retry {
                demote_only: false,
                error: DispatchError::Upstream {
                    status: None,
                    message: error,
                },
            };
        };
        let config = match UpstreamConfig::parse(&choice.provider.config) {
            Ok(config) => config,
            Err(err) => {
                let error = format!("invalid provider config: {err}");
                self.record_error(envelope, principal, meta, route, choice, retry, started, &error);
                return AttemptOutcome::Retry {
                    demote_only: false,
                    error: DispatchError::Upstream {
                        status: None,
                        message: error,
                    },
                };
            }
        };
        let adapter = Adapter::new(dialect, config);

        let passthrough: &[(String, String)] = if choice.binding.with_header {
            &envelope.passthrough
        } else {
            &[]
        };
        let request = match envelope.op {
            ChatOp::Chat => adapter.chat_request(
                &choice.binding.provider_model,
                &envelope.body,
                envelope.stream,
                passthrough,
                &choice.binding.customer_headers,
            ),
            ChatOp::CountTokens => {
                adapter.count_tokens_request(&choice.binding.provider_model, &envelope.body)
            }
        };
        let request = match request {
            Ok(request) => request,
            // A body that does not parse will not parse for any binding.
            Err(err) => return AttemptOutcome::Fatal(DispatchError::BadRequest(err.to_string())),
        };

        let client = match self
            .clients
            .get(header_timeout, adapter.config().proxy_url.as_deref())
        {
            Ok(client) => client,
            Err(err) => {
                self.record_error(
                    envelope, principal, meta, route, choice, retry, started,
                    &err.to_string(),
                );
                return AttemptOutcome::Retry {
                    demote_only: false,
                    error: err,
                };
            }
        };

        info!(
            event = "upstream_attempt",
            model = %route.model.name,
            provider = %choice.provider.name,
            upstream_model = %choice.binding.provider_model,
            retry,
            stream = envelope.stream,
        );

        let response = match tokio::time::timeout(
            header_timeout,
            send_request(&client, &request),
        )
        .await
        {
            Err(_) => {
                let error = format!(
                    "upstream response headers not received within {}s",
                    header_timeout.as_secs()
                );
                self.record_error(envelope, principal, meta, route, choice, retry, started, &error);
                return AttemptOutcome::Retry {
                    demote_only: false,
                    error: DispatchError::Upstream {
                        status: None,
                        message: error,
                    },
                };
            }
            Ok(Err(err)) => {
                let error = format!("upstream transport error: {err}");
                self.record_error(envelope, principal, meta, route, choice, retry, started, &error);
                return AttemptOutcome::Retry {
                    demote_only: false,
                    error: DispatchError::Upstream {
                        status: None,
                        message: error,
                    },
                };
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.bytes().await.unwrap_or_default();
            let text = String::from_utf8_lossy(&body);
            // 429 demotes unless the body also matches a declared error
            // fingerprint, which escalates to a hard eviction.
            let demote_only =
                status == 429 && !adapter.config().body_matches_fingerprint(&text);
            let error = format!("upstream status {status}: {}", snippet(&text));
            self.record_error(envelope, principal, meta, route, choice, retry, started, &error);
            return AttemptOutcome::Retry {
                demote_only,
                error: DispatchError::Upstream {
                    status: Some(status),
                    message: error,
                },
            };
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if envelope.stream {
            let draft = self.draft(envelope, principal, meta, route, choice, LogStatus::Success);
            let io_request = route.model.io_log.then(|| envelope.body.clone());
            let body = spawn_tee(
                response,
                TeeParams {
                    draft,
                    sink: self.sink.clone(),
                    scanner: UsageScanner::new(dialect),
                    started,
                    retry,
                    io_request,
                },
            );
            return AttemptOutcome::Done(Outbound::Stream {
                status,
                content_type,
                body,
            });
        }

        // Buffered path: the whole body is in hand, so fingerprinted error
        // bodies behind a 200 can still be retried on another binding.
        let header_elapsed = started.elapsed();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                let error = format!("upstream body read failed: {err}");
                self.record_error(envelope, principal, meta, route, choice, retry, started, &error);
                return AttemptOutcome::Retry {
                    demote_only: false,
                    error: DispatchError::Upstream {
                        status: None,
                        message: error,
                    },
                };
            }
        };
        let text = String::from_utf8_lossy(&body);
        if adapter.config().body_matches_fingerprint(&text) {
            let error = format!("upstream error fingerprint matched: {}", snippet(&text));
            self.record_error(envelope, principal, meta, route, choice, retry, started, &error);
            return AttemptOutcome::Retry {
                demote_only: false,
                error: DispatchError::Upstream {
                    status: Some(status),
                    message: error,
                },
            };
        }

        let usage = match envelope.op {
            ChatOp::Chat => parse_buffered_usage(dialect, &body).unwrap_or_default(),
            ChatOp::CountTokens => Usage::default(),
        };
        let proxy_time = started.elapsed();
        let chunk_time = proxy_time.saturating_sub(header_elapsed);
        let mut draft = self.draft(envelope, principal, meta, route, choice, LogStatus::Success);
        draft.retry = retry;
        draft.proxy_time_ms = proxy_time.as_millis() as i64;
        draft.first_chunk_ms = header_elapsed.as_millis() as i64;
        draft.chunk_time_ms = chunk_time.as_millis() as i64;
        draft.tps = tokens_per_second(usage.total_tokens, chunk_time);
        draft.size = body.len() as i64;
        draft.usage = usage;
        let io = route
            .model
            .io_log
            .then(|| (envelope.body.to_vec(), body.to_vec()));
        self.sink.submit(LogEntry { draft, io });

        AttemptOutcome::Done(Outbound::Buffered {
            status,
            content_type,
            body,
        })
    }

    fn draft(
        &self,
        envelope: &RequestEnvelope,
        principal: &Principal,
        meta: &RequestMeta,
        route: &ResolvedRoute,
        choice: &RouteChoice,
        status: LogStatus,
    ) -> ChatLogDraft {
        ChatLogDraft {
            name: route.model.name.clone(),
            provider_model: choice.binding.provider_model.clone(),
            provider_name: choice.provider.name.clone(),
            status,
            style: envelope.dialect.as_str().to_string(),
            user_agent: meta.user_agent.clone(),
            remote_ip: meta.remote_ip.clone(),
            auth_key_id: principal.auth_key_id,
            error: None,
            retry: 0,
            proxy_time_ms: 0,
            first_chunk_ms: 0,
            chunk_time_ms: 0,
            tps: 0.0,
            size: 0,
            usage: Usage::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_error(
        &self,
        envelope: &RequestEnvelope,
        principal: &Principal,
        meta: &RequestMeta,
        route: &ResolvedRoute,
        choice: &RouteChoice,
        retry: i32,
        started: Instant,
        error: &str,
    ) {
        let mut draft = self.draft(envelope, principal, meta, route, choice, LogStatus::Error);
        draft.error = Some(error.to_string());
        draft.retry = retry;
        draft.proxy_time_ms = started.elapsed().as_millis() as i64;
        self.sink.submit(LogEntry { draft, io: None });
    }
}

enum AttemptOutcome {
    Done(Outbound),
    /// Not worth trying another binding.
    Fatal(DispatchError),
    Retry {
        demote_only: bool,
        error: DispatchError,
    },
}

async fn send_request(
    client: &wreq::Client,
    request: &UpstreamRequest,
) -> Result<wreq::Response, wreq::Error> {
    let method = match request.method {
        HttpMethod::Get => wreq::Method::GET,
        HttpMethod::Post => wreq::Method::POST,
    };
    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }
    builder.send().await
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= ERROR_SNIPPET_MAX {
        return trimmed.to_string();
    }
    let mut end = ERROR_SNIPPET_MAX;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
