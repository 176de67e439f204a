//! Usage recording (§1 `[FULL]`, §3 `[FULL]`): the seam a storage layer
//! hangs off of to bill and observe completed requests, without the core
//! depending on any concrete store.
//!
//! Grounded on the teacher's `llm::{LLMRequest, LLMResponse, LLMInfo}`
//! (`llm/mod.rs`): `LLMInfo` pairs a request-side record with a
//! response-side record and exposes `input_tokens()`, preferring the
//! response-reported count and falling back to the pre-flight tokenized
//! estimate (`self.response.input_tokens.or(self.request.input_tokens)`).
//! This module keeps that exact pairing and fallback, generalized from the
//! teacher's one-shot synchronous field to a hook any caller can register.

use std::time::Instant;

use crate::canonical::{LlmRequest, LlmResponse};
use crate::util::Strng;

/// Request-side facts known before dispatch: a tokenized estimate (not
/// always computed — tokenizing is opt-in) and which provider/model the
/// pipeline picked.
#[derive(Debug, Clone)]
pub struct UsageRequestInfo {
	pub input_tokens: Option<u64>,
	pub provider: Option<Strng>,
	pub request_model: Strng,
	pub streaming: bool,
}

impl UsageRequestInfo {
	pub fn from_request(req: &LlmRequest, provider: Option<Strng>) -> Self {
		UsageRequestInfo { input_tokens: None, provider, request_model: req.model.clone(), streaming: req.stream }
	}
}

impl Default for UsageRequestInfo {
	fn default() -> Self {
		UsageRequestInfo { input_tokens: None, provider: None, request_model: Strng::from(""), streaming: false }
	}
}

/// Response-side facts, present only for a completed (not canceled)
/// attempt.
#[derive(Debug, Clone, Default)]
pub struct UsageResponseInfo {
	pub input_tokens: Option<u64>,
	pub output_tokens: Option<u64>,
	pub cached_tokens: Option<u64>,
	pub provider_model: Option<Strng>,
	/// Wall-clock time to the first streamed chunk; `None` for a unary call.
	pub first_token_at: Option<Instant>,
}

impl UsageResponseInfo {
	pub fn from_response(resp: &LlmResponse) -> Self {
		let usage = resp.usage.as_ref();
		UsageResponseInfo {
			input_tokens: usage.map(|u| u.prompt_tokens),
			output_tokens: usage.map(|u| u.completion_tokens),
			cached_tokens: usage.and_then(|u| u.cached_tokens),
			provider_model: Some(resp.model.clone()),
			first_token_at: None,
		}
	}
}

/// Pairs one attempt's request and response facts (teacher's `LLMInfo`).
#[derive(Debug, Clone)]
pub struct LlmInfo {
	pub request: UsageRequestInfo,
	pub response: Option<UsageResponseInfo>,
	pub canceled: bool,
}

impl LlmInfo {
	pub fn completed(request: UsageRequestInfo, response: UsageResponseInfo) -> Self {
		LlmInfo { request, response: Some(response), canceled: false }
	}

	pub fn canceled(request: UsageRequestInfo) -> Self {
		LlmInfo { request, response: None, canceled: true }
	}

	/// Prefers the response-reported count, falls back to the pre-flight
	/// tokenized estimate — identical fallback order to the teacher's
	/// `LLMInfo::input_tokens`.
	pub fn input_tokens(&self) -> Option<u64> {
		self.response.as_ref().and_then(|r| r.input_tokens).or(self.request.input_tokens)
	}

	pub fn output_tokens(&self) -> Option<u64> {
		self.response.as_ref().and_then(|r| r.output_tokens)
	}
}

/// Invoked once per completed or canceled attempt (§1 `[FULL]`). The core
/// never persists anything itself; a storage layer implements this to
/// write usage rows.
pub trait UsageRecorder: Send + Sync {
	fn record(&self, info: &LlmInfo);
}

/// A `UsageRecorder` that does nothing, for callers that don't need billing
/// (e.g. most unit tests, or a gateway run without a storage layer wired
/// in).
pub struct NoopUsageRecorder;

impl UsageRecorder for NoopUsageRecorder {
	fn record(&self, _info: &LlmInfo) {}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::canonical::Usage;

	#[test]
	fn input_tokens_prefers_the_response_reported_count_over_the_estimate() {
		let request = UsageRequestInfo { input_tokens: Some(10), ..Default::default() };
		let response = UsageResponseInfo { input_tokens: Some(42), ..Default::default() };
		let info = LlmInfo::completed(request, response);
		assert_eq!(info.input_tokens(), Some(42));
	}

	#[test]
	fn input_tokens_falls_back_to_the_estimate_when_canceled_before_a_response() {
		let request = UsageRequestInfo { input_tokens: Some(10), ..Default::default() };
		let info = LlmInfo::canceled(request);
		assert_eq!(info.input_tokens(), Some(10));
		assert!(info.canceled);
	}

	#[test]
	fn from_response_reads_prompt_and_completion_tokens_from_usage() {
		let resp = LlmResponse {
			id: "1".to_string(),
			model: "gpt-4o".into(),
			created: 0,
			choices: vec![],
			usage: Some(Usage { prompt_tokens: 5, completion_tokens: 7, cached_tokens: Some(2), ..Default::default() }),
		};
		let info = UsageResponseInfo::from_response(&resp);
		assert_eq!(info.input_tokens, Some(5));
		assert_eq!(info.output_tokens, Some(7));
		assert_eq!(info.cached_tokens, Some(2));
	}

	#[test]
	fn noop_recorder_accepts_any_info_without_panicking() {
		let info = LlmInfo::canceled(UsageRequestInfo::default());
		NoopUsageRecorder.record(&info);
	}
}
