//! Codex (OpenAI backend) outbound quirks (§4.1, §4.3, §9; §8 "Codex
//! compatibility"). Codex forbids sampling parameters and token caps,
//! requires its system instructions to lead the conversation, and only
//! answers over SSE even when the client asked for a single JSON body.
//! `CodexExecutor` is the sole extension point for that last quirk
//! (`Outbound::customize_executor`): it drains the inner SSE stream and
//! replays it through the same aggregation path a non-stream call would
//! have used, so the rest of the pipeline never has to know Codex can't
//! actually do unary.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::canonical::LlmRequest;
use crate::error::{AxonError, Result};
use crate::http_types::{Body, Request, Response};
use crate::pipeline::executor::{Executor, ExecutorOptions};
use crate::stream::BoxEventStream;
use crate::transformer::openai_completions::{self, OpenAiCompletionsInbound, OpenAiCompletionsOutbound};
use crate::transformer::{Inbound, Outbound};

/// The literal prefix every Codex CLI system message begins with. A request
/// whose leading message doesn't start with this gets one prepended (§4.1).
pub const CODEX_CLI_PROMPT_PREFIX: &str = "You are Codex, based on GPT-5. You are running as a coding agent in the Codex CLI";

pub struct CodexOutbound {
	inner: OpenAiCompletionsOutbound,
}

impl Default for CodexOutbound {
	fn default() -> Self {
		CodexOutbound { inner: OpenAiCompletionsOutbound::default() }
	}
}

#[async_trait]
impl Outbound for CodexOutbound {
	fn provider(&self) -> &'static str {
		"codex"
	}

	fn transform_request(&self, req: &LlmRequest) -> Result<Request> {
		let mut wire = openai_completions::encode_request(req);
		wire.temperature = None;
		wire.top_p = None;
		wire.max_tokens = None;
		wire.max_completion_tokens = None;
		wire.frequency_penalty = None;
		wire.presence_penalty = None;
		wire.stream = Some(true);
		wire.store = Some(false);
		ensure_codex_instructions(&mut wire.messages);

		let body = Body::from_json(&wire).map_err(|e| AxonError::Transformer(e.to_string()))?;
		http::Request::builder()
			.method(http::Method::POST)
			.uri(format!("{}/v1/chat/completions", self.inner.base_url))
			.header(http::header::CONTENT_TYPE, "application/json")
			.body(body)
			.map_err(|e| AxonError::Transformer(e.to_string()))
	}

	fn transform_response(&self, resp: Response) -> Result<crate::canonical::LlmResponse> {
		self.inner.transform_response(resp)
	}

	fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
		self.inner.transform_stream(stream)
	}

	fn transform_error(&self, resp: &Response, body: &[u8]) -> AxonError {
		self.inner.transform_error(resp, body)
	}

	fn customize_executor(&self, inner: Arc<dyn Executor>) -> Arc<dyn Executor> {
		Arc::new(CodexExecutor { inner })
	}
}

fn ensure_codex_instructions(messages: &mut Vec<openai_completions::WireMessage>) {
	let leads_with_prefix = messages
		.first()
		.and_then(|m| m.content.as_ref())
		.and_then(|c| c.as_str())
		.map(|s| s.starts_with(CODEX_CLI_PROMPT_PREFIX))
		.unwrap_or(false);
	if leads_with_prefix {
		return;
	}
	messages.insert(
		0,
		openai_completions::WireMessage {
			role: "system".to_string(),
			content: Some(serde_json::Value::String(CODEX_CLI_PROMPT_PREFIX.to_string())),
			tool_calls: None,
			tool_call_id: None,
			name: None,
		},
	);
}

/// Wraps a base executor to fake a unary response out of Codex's SSE-only
/// upstream (§4.3 step 5, §9 "Customizable executor"). The inner SSE stream
/// is fully drained and closed within this call, never leaked to the
/// caller — the one sanctioned exception to "never buffer a whole stream"
/// (§9), scoped entirely to this transport quirk.
struct CodexExecutor {
	inner: Arc<dyn Executor>,
}

#[async_trait]
impl Executor for CodexExecutor {
	async fn execute(&self, req: Request, opts: &ExecutorOptions) -> Result<Response> {
		let resp = self.inner.execute(req, opts).await?;
		if !resp.status().is_success() {
			return Ok(resp);
		}
		let (parts, body) = resp.into_parts();
		let mut events = crate::sse::decode_sse_body(body);
		let mut collected = Vec::new();
		while let Some(next) = events.next().await {
			collected.push(next?);
		}

		let aggregated = OpenAiCompletionsInbound.aggregate_stream_chunks(&collected)?;
		let wire = openai_completions::encode_response(&aggregated);
		let bytes = serde_json::to_vec(&wire).map_err(|e| AxonError::Transformer(e.to_string()))?;

		let mut builder = http::Response::builder().status(http::StatusCode::OK);
		for (name, value) in parts.headers.iter() {
			if name == http::header::CONTENT_TYPE || name == http::header::CONTENT_LENGTH {
				continue;
			}
			builder = builder.header(name, value);
		}
		builder
			.header(http::header::CONTENT_TYPE, "application/json")
			.body(Body::Full(Bytes::from(bytes)))
			.map_err(|e| AxonError::Transformer(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::canonical::{Message, SamplingOptions};

	#[test]
	fn strips_sampling_params_and_injects_the_codex_prompt_prefix() {
		let mut req = LlmRequest::new("gpt-5-codex", vec![Message::user("hi")]);
		req.sampling = SamplingOptions { temperature: Some(0.9), ..Default::default() };
		let outbound = CodexOutbound::default();
		let http_req = outbound.transform_request(&req).unwrap();
		let (parts, body) = http_req.into_parts();
		assert_eq!(parts.uri.path(), "/v1/chat/completions");
		let bytes = match body {
			crate::http_types::Body::Full(b) => b,
			_ => panic!("expected buffered body"),
		};
		let wire: openai_completions::WireRequest = serde_json::from_slice(&bytes).unwrap();
		assert!(wire.temperature.is_none());
		assert_eq!(wire.stream, Some(true));
		assert_eq!(wire.store, Some(false));
		assert!(wire.messages[0].content.as_ref().unwrap().as_str().unwrap().starts_with(CODEX_CLI_PROMPT_PREFIX));
	}

	#[test]
	fn does_not_duplicate_the_prefix_when_already_present() {
		let mut req = LlmRequest::new("gpt-5-codex", vec![Message::system(CODEX_CLI_PROMPT_PREFIX), Message::user("hi")]);
		req.sampling = SamplingOptions::default();
		let outbound = CodexOutbound::default();
		let http_req = outbound.transform_request(&req).unwrap();
		let (_, body) = http_req.into_parts();
		let bytes = match body {
			crate::http_types::Body::Full(b) => b,
			_ => panic!("expected buffered body"),
		};
		let wire: openai_completions::WireRequest = serde_json::from_slice(&bytes).unwrap();
		assert_eq!(wire.messages.len(), 2);
	}
}
