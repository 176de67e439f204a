//! The pipeline engine (§4.3): decode, encode, dispatch, retry, re-encode.
//! Grounded on the teacher's single-pass request handling in
//! `llm/policy/mod.rs`'s `Policy::apply`, generalized into an explicit
//! attempt loop with capability-checked retry instead of the teacher's
//! fixed single-provider call.

pub mod executor;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use crate::canonical::LlmResponse;
use crate::error::{AxonError, Result};
use crate::http_types::{Request, Response};
use crate::middleware::{MiddlewareChain, RequestContext};
use crate::stream::BoxEventStream;
use crate::transformer::{HttpError, Inbound, Outbound};
use crate::usage::{LlmInfo, NoopUsageRecorder, UsageRecorder, UsageRequestInfo, UsageResponseInfo};
use executor::{Executor, ExecutorOptions, ReqwestExecutor};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
	pub max_channel_retries: u32,
	pub max_same_channel_retries: u32,
	pub retry_delay: Duration,
}

impl Default for PipelineConfig {
	fn default() -> Self {
		PipelineConfig {
			max_channel_retries: 0,
			max_same_channel_retries: 0,
			retry_delay: Duration::from_millis(0),
		}
	}
}

/// The outcome of `Pipeline::process` (§4.3 "tagged either `{unary}` or
/// `{stream}`").
pub enum ProcessOutcome {
	Unary(Response),
	Stream(BoxEventStream),
}

/// Per-request execution history: one entry per executor dispatch, kept for
/// observability (§7 "execution history is persisted with per-attempt
/// status codes").
#[derive(Debug, Clone)]
pub struct AttemptRecord {
	pub attempt: u32,
	pub same_channel_attempt: u32,
	pub status: Option<http::StatusCode>,
	pub error: Option<String>,
}

pub struct Pipeline {
	pub inbound: Arc<dyn Inbound>,
	pub outbound: Box<dyn Outbound>,
	pub middlewares: MiddlewareChain,
	pub config: PipelineConfig,
	pub executor: Arc<dyn Executor>,
	pub usage_recorder: Arc<dyn UsageRecorder>,
}

impl Pipeline {
	pub fn new(inbound: Arc<dyn Inbound>, outbound: Box<dyn Outbound>, config: PipelineConfig) -> Self {
		Pipeline {
			inbound,
			outbound,
			middlewares: MiddlewareChain::new(),
			config,
			executor: Arc::new(ReqwestExecutor::new()),
			usage_recorder: Arc::new(NoopUsageRecorder),
		}
	}

	pub fn with_usage_recorder(mut self, recorder: Arc<dyn UsageRecorder>) -> Self {
		self.usage_recorder = recorder;
		self
	}

	/// Runs the attempt loop in full: decode, forward middlewares, encode,
	/// dispatch with retry, reverse middlewares, re-encode. Returns the
	/// final outcome along with the execution history for observability.
	pub async fn process(
		&mut self,
		http_request: Request,
	) -> (Result<ProcessOutcome>, Vec<AttemptRecord>) {
		let ctx = RequestContext {
			trace_id: header_value(&http_request, "ah-trace-id"),
			thread_id: header_value(&http_request, "ah-thread-id"),
		};
		let mut history = Vec::new();

		let llm_request = match self.inbound.transform_request(http_request) {
			Ok(r) => r,
			Err(e) => return (Err(e), history),
		};
		let llm_request = match self.middlewares.run_inbound_llm_request(llm_request, &ctx).await {
			Ok(r) => r,
			Err(e) => return (Err(e), history),
		};
		let is_stream = llm_request.stream;

		let mut attempt = 0u32;
		let mut same_channel_attempt = 0u32;
		let mut channels_tried = 0u32;

		loop {
			let outcome = self.dispatch_once(&llm_request, &ctx).await;
			match outcome {
				Ok((status, raw_outcome)) => {
					tracing::debug!(
						model = %llm_request.model,
						provider = self.outbound.provider(),
						attempt,
						same_channel_attempt,
						status = status.as_u16(),
						"dispatch succeeded"
					);
					history.push(AttemptRecord {
						attempt,
						same_channel_attempt,
						status: Some(status),
						error: None,
					});
					let request_info =
						UsageRequestInfo::from_request(&llm_request, Some(self.outbound.provider().into()));
					let is_unary = matches!(raw_outcome, RawOutcome::Unary(_));
					let result = self.finish_success(raw_outcome, is_stream, &ctx, &request_info).await;
					if is_unary && result.is_err() {
						self.usage_recorder.record(&LlmInfo::canceled(request_info));
					}
					return (result, history);
				},
				Err(err) => {
					let status = upstream_status(&err);
					tracing::warn!(
						model = %llm_request.model,
						provider = self.outbound.provider(),
						attempt,
						same_channel_attempt,
						error = %err,
						"dispatch attempt failed"
					);
					history.push(AttemptRecord {
						attempt,
						same_channel_attempt,
						status,
						error: Some(err.to_string()),
					});
					self.middlewares.run_outbound_raw_error(&err, &ctx).await;

					let can_retry_same_channel = same_channel_attempt < self.config.max_same_channel_retries
						&& self
							.outbound
							.as_channel_retryable()
							.map(|r| r.can_retry(&err))
							.unwrap_or(false);

					if can_retry_same_channel {
						if let Some(r) = self.outbound.as_channel_retryable() {
							r.prepare_for_retry();
						}
						same_channel_attempt += 1;
						attempt += 1;
						continue;
					}

					let can_retry_next_channel = channels_tried < self.config.max_channel_retries
						&& self.outbound.as_retryable().map(|r| r.has_more_channels()).unwrap_or(false);

					if can_retry_next_channel {
						if let Some(r) = self.outbound.as_retryable() {
							r.next_channel();
						}
						channels_tried += 1;
						tracing::info!(attempt = attempt + 1, channels_tried, "retrying on next channel");
						same_channel_attempt = 0;
						attempt += 1;
						if self.config.retry_delay > Duration::ZERO {
							tokio::time::sleep(self.config.retry_delay).await;
						}
						continue;
					}

					return (Err(err), history);
				},
			}
		}
	}

	/// Encode + merge headers + finalize auth + forward middleware + single
	/// executor dispatch (§4.3 steps 2-5). Credential resolution is left to
	/// outbound implementations that need it (e.g. the OAuth-backed Codex
	/// outbound resolves its token inside `transform_request`).
	async fn dispatch_once(
		&self,
		llm_request: &crate::canonical::LlmRequest,
		ctx: &RequestContext,
	) -> Result<(http::StatusCode, RawOutcome)> {
		let raw_request = self.outbound.transform_request(llm_request)?;
		let raw_request = merge_inbound_headers(raw_request, llm_request);
		let raw_request = self.middlewares.run_outbound_raw_request(raw_request, ctx).await?;

		let executor = self.outbound.customize_executor(self.executor.clone());
		let opts = ExecutorOptions::default();
		let raw_response = executor.execute(raw_request, &opts).await?;
		let status = raw_response.status();

		if !status.is_success() {
			let (parts, body) = raw_response.into_parts();
			let response_for_err = http::Response::from_parts(parts, crate::http_types::Body::empty());
			let bytes = body
				.collect()
				.await
				.map_err(|e| AxonError::Transformer(format!("reading error body: {e}")))?;
			return Err(self.outbound.transform_error(&response_for_err, &bytes));
		}

		let content_type = raw_response
			.headers()
			.get(http::header::CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.unwrap_or("");
		if content_type.contains("text/event-stream") {
			Ok((status, RawOutcome::Stream(raw_response)))
		} else {
			Ok((status, RawOutcome::Unary(raw_response)))
		}
	}

	async fn finish_success(
		&self,
		raw: RawOutcome,
		_is_stream: bool,
		ctx: &RequestContext,
		request_info: &UsageRequestInfo,
	) -> Result<ProcessOutcome> {
		match raw {
			RawOutcome::Unary(resp) => {
				let resp = self.middlewares.run_outbound_raw_response(resp, ctx).await?;
				let llm_resp = self.outbound.transform_response(resp)?;
				let llm_resp = self.middlewares.run_outbound_llm_response(llm_resp, ctx).await?;
				self.usage_recorder.record(&LlmInfo::completed(
					request_info.clone(),
					UsageResponseInfo::from_response(&llm_resp),
				));
				let http_resp = self.inbound.transform_response(llm_resp)?;
				let http_resp = self.middlewares.run_inbound_raw_response(http_resp, ctx).await?;
				Ok(ProcessOutcome::Unary(http_resp))
			},
			RawOutcome::Stream(resp) => {
				let (_, body) = resp.into_parts();
				let raw_stream = crate::sse::decode_sse_body(body);
				let raw_stream = self.middlewares.run_outbound_raw_stream(raw_stream, ctx).await?;
				let canonical_stream = self.outbound.transform_stream(raw_stream);
				let canonical_stream =
					self.middlewares.run_outbound_llm_stream(canonical_stream, ctx).await?;
				let wire_stream = self.inbound.transform_stream(canonical_stream);
				Ok(ProcessOutcome::Stream(wire_stream))
			},
		}
	}

	/// Renders a terminal `AxonError` into the inbound's wire error shape —
	/// the last step of propagation described in §7.
	pub fn render_error(&self, err: &AxonError) -> Response {
		self.inbound.transform_error(HttpError::from_axon(err))
	}

	/// Replays a captured SSE event log through `aggregate_stream_chunks` to
	/// produce the same body a non-stream call would have returned (§8
	/// invariant 2), used when a client requested unary but the upstream is
	/// stream-only (e.g. Codex, see `crate::codex`).
	pub fn aggregate(&self, events: &[crate::stream::StreamEvent]) -> Result<LlmResponse> {
		self.inbound.aggregate_stream_chunks(events)
	}
}

enum RawOutcome {
	Unary(Response),
	Stream(Response),
}

fn upstream_status(err: &AxonError) -> Option<http::StatusCode> {
	match err {
		AxonError::RetryableUpstream { status, .. } => *status,
		AxonError::PermanentUpstream { status, .. } => *status,
		_ => Some(err.status_code()),
	}
}

fn header_value(req: &Request, name: &str) -> Option<String> {
	req.headers().get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

/// Merges the original inbound request's headers into the outbound request,
/// outbound winning on conflict (§4.3 step 3). Hop-by-hop and
/// content-framing headers are never copied across formats.
fn merge_inbound_headers(mut outbound_req: Request, llm_request: &crate::canonical::LlmRequest) -> Request {
	const SKIP: &[&str] = &[
		"host",
		"content-length",
		"content-type",
		"authorization",
		"connection",
		"transfer-encoding",
	];
	if let Some(raw) = &llm_request.raw_request {
		let inbound_headers = &raw.parts().headers;
		for (name, value) in inbound_headers.iter() {
			if SKIP.contains(&name.as_str().to_ascii_lowercase().as_str()) {
				continue;
			}
			if !outbound_req.headers().contains_key(name) {
				outbound_req.headers_mut().insert(name.clone(), value.clone());
			}
		}
	}
	outbound_req
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::canonical::LlmRequest;
	use crate::http_types::Body;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicU32, Ordering};

	struct EchoInbound;

	#[async_trait]
	impl Inbound for EchoInbound {
		fn api_format(&self) -> &'static str {
			"echo"
		}
		fn transform_request(&self, req: Request) -> Result<LlmRequest> {
			let (_parts, _body) = req.into_parts();
			Ok(LlmRequest::new("m", vec![crate::canonical::Message::user("hi")]))
		}
		fn transform_response(&self, resp: LlmResponse) -> Result<Response> {
			Ok(crate::http_types::json_response(
				http::StatusCode::OK,
				&serde_json::json!({"id": resp.id}),
			))
		}
		fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
			stream
		}
		fn transform_error(&self, err: HttpError) -> Response {
			crate::http_types::json_response(err.status, &err.body)
		}
		fn aggregate_stream_chunks(&self, _events: &[crate::stream::StreamEvent]) -> Result<LlmResponse> {
			unimplemented!()
		}
	}

	struct FlakyOutbound;

	#[async_trait]
	impl Outbound for FlakyOutbound {
		fn provider(&self) -> &'static str {
			"flaky"
		}
		fn transform_request(&self, _req: &LlmRequest) -> Result<Request> {
			Ok(http::Request::builder().method(http::Method::POST).uri("http://unused").body(Body::empty()).unwrap())
		}
		fn transform_response(&self, _resp: Response) -> Result<LlmResponse> {
			Ok(LlmResponse { id: "ok".into(), model: "m".into(), created: 0, choices: vec![], usage: None })
		}
		fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
			stream
		}
		fn transform_error(&self, resp: &Response, _body: &[u8]) -> AxonError {
			AxonError::from_upstream_status(resp.status(), "err".to_string())
		}
		fn as_channel_retryable(&mut self) -> Option<&mut dyn retry::ChannelRetryable> {
			Some(self)
		}
	}

	impl retry::ChannelRetryable for FlakyOutbound {
		fn prepare_for_retry(&mut self) {}
	}

	struct FlakyExecutor {
		attempts: std::sync::Arc<AtomicU32>,
		fail_first_n: u32,
	}

	#[async_trait]
	impl Executor for FlakyExecutor {
		async fn execute(&self, _req: Request, _opts: &ExecutorOptions) -> Result<Response> {
			let n = self.attempts.fetch_add(1, Ordering::SeqCst);
			if n < self.fail_first_n {
				Ok(http::Response::builder()
					.status(http::StatusCode::TOO_MANY_REQUESTS)
					.body(Body::from_bytes("rate limited"))
					.unwrap())
			} else {
				Ok(http::Response::builder().status(http::StatusCode::OK).body(Body::from_bytes("{}")).unwrap())
			}
		}
	}

	#[tokio::test]
	async fn same_channel_retry_recovers_after_transient_429s() {
		let attempts = std::sync::Arc::new(AtomicU32::new(0));
		let outbound = Box::new(FlakyOutbound);
		let mut pipeline = Pipeline::new(
			Arc::new(EchoInbound),
			outbound,
			PipelineConfig {
				max_channel_retries: 0,
				max_same_channel_retries: 2,
				retry_delay: Duration::ZERO,
			},
		);
		pipeline.executor = Arc::new(FlakyExecutor { attempts: attempts.clone(), fail_first_n: 2 });

		let req = http::Request::builder()
			.method(http::Method::POST)
			.uri("http://localhost/v1/chat/completions")
			.body(Body::from_bytes("{}"))
			.unwrap();
		let (result, history) = pipeline.process(req).await;
		assert!(result.is_ok(), "expected eventual success, got {:?}", result.err());
		assert_eq!(attempts.load(Ordering::SeqCst), 3);
		assert_eq!(history.len(), 3);
		assert_eq!(history.last().unwrap().same_channel_attempt, 2);
	}

	struct MultiChannelOutbound {
		channel: std::sync::Arc<AtomicU32>,
		more_channels: bool,
	}

	#[async_trait]
	impl Outbound for MultiChannelOutbound {
		fn provider(&self) -> &'static str {
			"multi"
		}
		fn transform_request(&self, _req: &LlmRequest) -> Result<Request> {
			Ok(http::Request::builder().method(http::Method::POST).uri("http://unused").body(Body::empty()).unwrap())
		}
		fn transform_response(&self, _resp: Response) -> Result<LlmResponse> {
			Ok(LlmResponse { id: "ok".into(), model: "m".into(), created: 0, choices: vec![], usage: None })
		}
		fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
			stream
		}
		fn transform_error(&self, resp: &Response, _body: &[u8]) -> AxonError {
			AxonError::from_upstream_status(resp.status(), "err".to_string())
		}
		fn as_channel_retryable(&mut self) -> Option<&mut dyn retry::ChannelRetryable> {
			Some(self)
		}
		fn as_retryable(&mut self) -> Option<&mut dyn retry::Retryable> {
			Some(self)
		}
	}

	impl retry::ChannelRetryable for MultiChannelOutbound {
		fn prepare_for_retry(&mut self) {}
	}

	impl retry::Retryable for MultiChannelOutbound {
		fn has_more_channels(&self) -> bool {
			self.more_channels
		}
		fn next_channel(&mut self) {
			self.channel.fetch_add(1, Ordering::SeqCst);
			self.more_channels = false;
		}
	}

	struct ChannelAwareExecutor {
		channel: std::sync::Arc<AtomicU32>,
	}

	#[async_trait]
	impl Executor for ChannelAwareExecutor {
		async fn execute(&self, _req: Request, _opts: &ExecutorOptions) -> Result<Response> {
			if self.channel.load(Ordering::SeqCst) == 0 {
				Ok(http::Response::builder()
					.status(http::StatusCode::SERVICE_UNAVAILABLE)
					.body(Body::from_bytes("unavailable"))
					.unwrap())
			} else {
				Ok(http::Response::builder().status(http::StatusCode::OK).body(Body::from_bytes("{}")).unwrap())
			}
		}
	}

	#[tokio::test]
	async fn exhausting_the_same_channel_budget_still_leaves_the_cross_channel_budget_for_failover() {
		let channel = std::sync::Arc::new(AtomicU32::new(0));
		let outbound = Box::new(MultiChannelOutbound { channel: channel.clone(), more_channels: true });
		let mut pipeline = Pipeline::new(
			Arc::new(EchoInbound),
			outbound,
			PipelineConfig {
				max_channel_retries: 1,
				max_same_channel_retries: 2,
				retry_delay: Duration::ZERO,
			},
		);
		pipeline.executor = Arc::new(ChannelAwareExecutor { channel: channel.clone() });

		let req = http::Request::builder()
			.method(http::Method::POST)
			.uri("http://localhost/v1/chat/completions")
			.body(Body::from_bytes("{}"))
			.unwrap();
		let (result, history) = pipeline.process(req).await;
		assert!(
			result.is_ok(),
			"channel B should still get its own failover budget after A's same-channel retries ran out, got {:?}",
			result.err()
		);
		assert_eq!(history.len(), 4, "2 same-channel retries on A (3 dispatches) then 1 success on B");
		assert_eq!(channel.load(Ordering::SeqCst), 1);
	}

	struct RecordingUsageRecorder {
		completed: std::sync::Arc<std::sync::Mutex<Vec<crate::usage::LlmInfo>>>,
	}

	impl UsageRecorder for RecordingUsageRecorder {
		fn record(&self, info: &crate::usage::LlmInfo) {
			self.completed.lock().unwrap().push(info.clone());
		}
	}

	#[tokio::test]
	async fn records_usage_once_on_a_successful_unary_response() {
		let completed = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
		let recorder = Arc::new(RecordingUsageRecorder { completed: completed.clone() });
		let outbound = Box::new(FlakyOutbound);
		let mut pipeline = Pipeline::new(Arc::new(EchoInbound), outbound, PipelineConfig::default())
			.with_usage_recorder(recorder);
		pipeline.executor =
			Arc::new(FlakyExecutor { attempts: std::sync::Arc::new(AtomicU32::new(0)), fail_first_n: 0 });

		let req = http::Request::builder()
			.method(http::Method::POST)
			.uri("http://localhost/v1/chat/completions")
			.body(Body::from_bytes("{}"))
			.unwrap();
		let (result, _history) = pipeline.process(req).await;
		assert!(result.is_ok());
		let recorded = completed.lock().unwrap();
		assert_eq!(recorded.len(), 1);
		assert!(!recorded[0].canceled);
	}
}
