//! Inbound/outbound transformer capability traits (§4.1).
//!
//! Grounded on the teacher's closed-variant-plus-capability-trait design:
//! `llm::AIProvider` is a fixed enum of provider capabilities rather than a
//! `dyn` hierarchy of subclasses (see `llm/mod.rs`'s `AIProvider` and
//! `RequestType`/`ResponseType` in `llm/types/mod.rs`). This crate keeps the
//! same shape: `Inbound`/`Outbound` are object-safe traits implemented once
//! per vendor format, and new providers are added by implementing the trait,
//! never by subclassing (§9 "Dynamic dispatch over transformers").

use async_trait::async_trait;

use crate::canonical::{LlmRequest, LlmResponse};
use crate::error::{AxonError, Result};
use crate::http_types::{Request, Response};
use crate::pipeline::retry::{ChannelRetryable, Retryable};
use crate::stream::BoxEventStream;

pub mod anthropic_messages;
pub mod gemini;
pub mod jina;
pub mod models_catalogue;
pub mod openai_completions;
pub mod openai_responses;
pub mod vercel_ai_sdk;

/// `{status, body}` produced by `transform_error`, ready to write to the wire
/// (§7).
#[derive(Debug, Clone)]
pub struct HttpError {
	pub status: http::StatusCode,
	pub body: serde_json::Value,
}

impl HttpError {
	pub fn from_axon(e: &AxonError) -> Self {
		HttpError { status: e.status_code(), body: e.generic_body() }
	}
}

/// A decoder/encoder pair for one vendor wire format on the client-facing
/// side. `transform_request` must be idempotent and must not mutate shared
/// request state (§4.1); implementations here are pure functions over their
/// input bytes.
#[async_trait]
pub trait Inbound: Send + Sync {
	fn api_format(&self) -> &'static str;

	fn transform_request(&self, req: Request) -> Result<LlmRequest>;

	fn transform_response(&self, resp: LlmResponse) -> Result<Response>;

	/// Lazily re-encodes a canonical response stream into this format's wire
	/// framing. Must not buffer: each item arrives, is encoded, and is handed
	/// onward (§5 back-pressure).
	fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream;

	fn transform_error(&self, err: HttpError) -> Response;

	/// Pure function of its input events (§4.1, §8 invariant 2): produces the
	/// same bytes a non-stream call would have returned.
	fn aggregate_stream_chunks(&self, events: &[crate::stream::StreamEvent]) -> Result<LlmResponse>;
}

/// The provider-facing half. `transform_error` here goes the other way:
/// provider HTTP error -> canonical error.
#[async_trait]
pub trait Outbound: Send + Sync {
	fn provider(&self) -> &'static str;

	fn transform_request(&self, req: &LlmRequest) -> Result<Request>;

	fn transform_response(&self, resp: Response) -> Result<LlmResponse>;

	fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream;

	fn transform_error(&self, resp: &Response, body: &[u8]) -> AxonError;

	/// Optional transport-level wrapper extension point (§4.3, §9). Most
	/// outbounds return `None`; Codex overrides this to fake a unary call over
	/// an SSE-only upstream (`codex::CodexExecutor`).
	fn customize_executor(
		&self,
		inner: std::sync::Arc<dyn crate::pipeline::executor::Executor>,
	) -> std::sync::Arc<dyn crate::pipeline::executor::Executor> {
		inner
	}

	/// Capability check (§9 "Retry state on the outbound"): the pipeline
	/// calls this rather than assuming every outbound can retry within a
	/// channel. Channel-selecting outbounds (`channel::ChannelOutbound`)
	/// override it; bare per-vendor outbounds return `None`.
	fn as_channel_retryable(&mut self) -> Option<&mut dyn ChannelRetryable> {
		None
	}

	/// Capability check for cross-channel retry; same rationale as
	/// `as_channel_retryable`.
	fn as_retryable(&mut self) -> Option<&mut dyn Retryable> {
		None
	}
}
