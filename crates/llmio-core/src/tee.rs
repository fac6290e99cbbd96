use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use llmio_provider::UsageScanner;
use llmio_storage::{ChatLogDraft, LogEntry, LogSink, LogStatus};

const CLIENT_CHANNEL_DEPTH: usize = 16;
/// Past this many queued chunks the processor starts losing data and the
/// log is marked truncated.
const PROCESSOR_CHANNEL_DEPTH: usize = 64;
const IO_CAPTURE_MAX: usize = 1024 * 1024;

pub(crate) struct TeeParams {
    pub draft: ChatLogDraft,
    pub sink: LogSink,
    pub scanner: UsageScanner,
    pub started: Instant,
    pub retry: i32,
    /// `Some(request_bytes)` turns on IO capture for this request.
    pub io_request: Option<Bytes>,
}

/// Split the upstream body into the client forward path and the usage
/// processor. The client path is never blocked by the processor: processor
/// sends are non-blocking and excess is discarded (the log then ends as
/// `log-truncated`). The pump outlives the request handler and submits the
/// final chat log when both sides are done.
pub(crate) fn spawn_tee(
    response: wreq::Response,
    params: TeeParams,
) -> mpsc::Receiver<Result<Bytes, io::Error>> {
    let (client_tx, client_rx) = mpsc::channel::<Result<Bytes, io::Error>>(CLIENT_CHANNEL_DEPTH);
    let (processor_tx, mut processor_rx) = mpsc::channel::<Bytes>(PROCESSOR_CHANNEL_DEPTH);

    let TeeParams {
        mut draft,
        sink,
        scanner,
        started,
        retry,
        io_request,
    } = params;
    let capture_io = io_request.is_some();

    let processor = tokio::spawn(async move {
        let mut scanner = scanner;
        let mut scan_error: Option<String> = None;
        let mut captured: Vec<u8> = Vec::new();
        while let Some(chunk) = processor_rx.recv().await {
            if capture_io && captured.len() < IO_CAPTURE_MAX {
                let room = IO_CAPTURE_MAX - captured.len();
                captured.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            if scan_error.is_none()
                && let Err(err) = scanner.push(&chunk)
            {
                scan_error = Some(err.to_string());
            }
        }
        (scanner.finish(), scan_error, captured)
    });

    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        let mut first_chunk: Option<Duration> = None;
        let mut size: u64 = 0;
        let mut truncated = false;
        let mut client_gone = false;
        let mut upstream_error: Option<String> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    if first_chunk.is_none() {
                        first_chunk = Some(started.elapsed());
                    }
                    size += chunk.len() as u64;
                    if client_tx.send(Ok(chunk.clone())).await.is_err() {
                        client_gone = true;
                        break;
                    }
                    if processor_tx.try_send(chunk).is_err() {
                        truncated = true;
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    let _ = client_tx
                        .send(Err(io::Error::other(message.clone())))
                        .await;
                    upstream_error = Some(message);
                    break;
                }
            }
        }
        drop(processor_tx);

        let (usage, scan_error, captured) = match processor.await {
            Ok(outcome) => outcome,
            Err(_) => (None, Some("usage processor aborted".to_string()), Vec::new()),
        };

        let proxy_time = started.elapsed();
        let first = first_chunk.unwrap_or(proxy_time);
        let chunk_time = proxy_time.saturating_sub(first);
        draft.usage = usage.unwrap_or_default();
        draft.retry = retry;
        draft.proxy_time_ms = proxy_time.as_millis() as i64;
        draft.first_chunk_ms = first.as_millis() as i64;
        draft.chunk_time_ms = chunk_time.as_millis() as i64;
        draft.tps = tokens_per_second(draft.usage.total_tokens, chunk_time);
        draft.size = size as i64;

        if client_gone {
            draft.status = LogStatus::Error;
            draft.error = Some("context canceled: client disconnected".to_string());
        } else if let Some(message) = upstream_error {
            draft.status = LogStatus::Error;
            draft.error = Some(message);
        } else if truncated {
            draft.status = LogStatus::Error;
            draft.error = Some("log-truncated".to_string());
        } else if let Some(message) = scan_error {
            draft.status = LogStatus::Error;
            draft.error = Some(message);
        }

        debug!(
            event = "stream_finished",
            model = %draft.name,
            provider = %draft.provider_name,
            status = draft.status.as_str(),
            size,
            total_tokens = draft.usage.total_tokens,
        );
        let io = io_request.map(|request| (request.to_vec(), captured));
        sink.submit(LogEntry { draft, io });
    });

    client_rx
}

pub(crate) fn tokens_per_second(total_tokens: i64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if total_tokens <= 0 || seconds <= 0.0 {
        return 0.0;
    }
    total_tokens as f64 / seconds
}
