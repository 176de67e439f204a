//! Vercel AI-SDK inbound transformer (§4.1, §6: `POST /ai-sdk`).
//!
//! Request bodies are `useChat`/`useCompletion`-shaped: `{messages:[{role,
//! content}], ...}`, closest to the OpenAI Chat Completions message array,
//! so decoding reuses that shape directly rather than inventing a new one.
//! The wire format this module actually earns its keep on is the
//! *response*: Vercel's data-stream protocol is not SSE. It is
//! `text/plain; charset=utf-8` with one `TYPE_CODE:JSON\n` line per event
//! and a `X-Vercel-AI-Data-Stream: v1` response header (§6). This module
//! implements the two codes a chat completion stream needs: `0` (text
//! delta) and `d` (finish, carrying usage). No teacher/pack file covers
//! this protocol, so the framing follows the spec text directly, built in
//! the same encode/decode-function-pair idiom the other transformers use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::canonical::*;
use crate::error::{AxonError, Result};
use crate::http_types::{Body, Request, Response};
use crate::stream::{BoxEventStream, StreamEvent};
use crate::transformer::{HttpError, Inbound};
use crate::util::Strng;

pub const DATA_STREAM_HEADER: (&str, &str) = ("x-vercel-ai-data-stream", "v1");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
	pub role: String,
	pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
	pub messages: Vec<WireMessage>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
}

fn role_from_wire(s: &str) -> Role {
	match s {
		"system" => Role::System,
		"assistant" => Role::Assistant,
		"tool" => Role::Tool,
		_ => Role::User,
	}
}

pub fn decode_request(wire: WireRequest, default_model: impl Into<Strng>) -> LlmRequest {
	let messages =
		wire.messages.into_iter().map(|m| Message { role: role_from_wire(&m.role), content: Content::text(m.content) }).collect();
	let mut req = LlmRequest::new(wire.model.map(Strng::from).unwrap_or_else(|| default_model.into()), messages);
	req.stream = true;
	req
}

/// One line of the data-stream protocol: `code:json_payload\n`.
fn frame(code: char, payload: &serde_json::Value) -> Vec<u8> {
	let mut line = format!("{code}:{}", payload);
	line.push('\n');
	line.into_bytes()
}

/// `0:"text chunk"\n` — a plain JSON string, not an object (per the
/// protocol's text-delta code).
fn text_delta_frame(text: &str) -> Vec<u8> {
	frame('0', &serde_json::Value::String(text.to_string()))
}

/// `d:{"finishReason":"stop","usage":{...}}\n` — the terminal frame.
fn finish_frame(finish_reason: FinishReason, usage: Option<&Usage>) -> Vec<u8> {
	let reason = match finish_reason {
		FinishReason::Stop | FinishReason::Canceled => "stop",
		FinishReason::Length => "length",
		FinishReason::ToolUse => "tool-calls",
		FinishReason::ContentFilter => "content-filter",
		FinishReason::Error => "error",
	};
	let payload = serde_json::json!({
		"finishReason": reason,
		"usage": usage.map(|u| serde_json::json!({
			"promptTokens": u.prompt_tokens,
			"completionTokens": u.completion_tokens,
		})),
	});
	frame('d', &payload)
}

pub struct VercelAiSdkInbound {
	pub default_model: Strng,
}

#[async_trait]
impl Inbound for VercelAiSdkInbound {
	fn api_format(&self) -> &'static str {
		"vercel.ai_sdk"
	}

	fn transform_request(&self, req: Request) -> Result<LlmRequest> {
		let (parts, body) = req.into_parts();
		let bytes = match body {
			Body::Full(b) => b,
			Body::Streaming(_) => {
				return Err(AxonError::InvalidRequest("inbound request body must be buffered".into()));
			},
		};
		let wire: WireRequest =
			serde_json::from_slice(&bytes).map_err(|e| AxonError::InvalidRequest(e.to_string()))?;
		let mut llm_req = decode_request(wire, self.default_model.clone());
		llm_req.raw_request = Some(RawRequestRef::new(parts));
		Ok(llm_req)
	}

	/// A data-stream response has no choices array to frame: the whole body
	/// collapses into one finish frame carrying the complete text.
	fn transform_response(&self, resp: LlmResponse) -> Result<Response> {
		let mut out = Vec::new();
		if let Some(choice) = resp.choices.first() {
			out.extend(text_delta_frame(&choice.message.content.as_flat_text()));
			out.extend(finish_frame(choice.finish_reason, resp.usage.as_ref()));
		}
		http::Response::builder()
			.status(http::StatusCode::OK)
			.header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
			.header(DATA_STREAM_HEADER.0, DATA_STREAM_HEADER.1)
			.body(Body::from_bytes(out))
			.map_err(|e| AxonError::Transformer(e.to_string()))
	}

	fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
		Box::pin(async_stream::stream! {
			use futures_util::StreamExt;
			futures_util::pin_mut!(stream);
			while let Some(next) = stream.next().await {
				match next {
					Ok(ev) => {
						let text = String::from_utf8_lossy(&ev.data).to_string();
						yield Ok(StreamEvent::data_only(text_delta_frame(&text)));
					},
					Err(e) => { yield Err(e); return; },
				}
			}
			yield Ok(StreamEvent::data_only(finish_frame(FinishReason::Stop, None)));
		})
	}

	fn transform_error(&self, err: HttpError) -> Response {
		let message = err.body["error"]["message"].as_str().unwrap_or("internal error").to_string();
		let payload = serde_json::json!({ "message": message });
		http::Response::builder()
			.status(err.status)
			.header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
			.body(Body::from_bytes(frame('3', &payload)))
			.unwrap_or_else(|_| crate::http_types::json_response(err.status, &err.body))
	}

	fn aggregate_stream_chunks(&self, events: &[StreamEvent]) -> Result<LlmResponse> {
		let mut content = String::new();
		for ev in events {
			content.push_str(&String::from_utf8_lossy(&ev.data));
		}
		Ok(LlmResponse {
			id: uuid::Uuid::new_v4().to_string(),
			model: self.default_model.clone(),
			created: 0,
			choices: vec![Choice {
				index: 0,
				message: Message { role: Role::Assistant, content: Content::Text(content) },
				finish_reason: FinishReason::Stop,
			}],
			usage: None,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_a_use_chat_style_message_array() {
		let wire: WireRequest =
			serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
		let req = decode_request(wire, "gpt-4o");
		assert_eq!(req.messages.len(), 1);
		assert!(req.stream);
	}

	#[test]
	fn text_delta_frame_uses_code_0_and_a_bare_json_string_payload() {
		let f = text_delta_frame("hi");
		assert_eq!(String::from_utf8(f).unwrap(), "0:\"hi\"\n");
	}

	#[test]
	fn finish_frame_uses_code_d_and_carries_usage() {
		let usage = Usage { prompt_tokens: 3, completion_tokens: 4, ..Default::default() };
		let f = finish_frame(FinishReason::Stop, Some(&usage));
		let s = String::from_utf8(f).unwrap();
		assert!(s.starts_with("d:"));
		assert!(s.contains("\"promptTokens\":3"));
	}

	#[test]
	fn transform_response_emits_a_text_delta_then_a_finish_frame() {
		let inbound = VercelAiSdkInbound { default_model: "gpt-4o".into() };
		let resp = LlmResponse {
			id: "1".to_string(),
			model: "gpt-4o".into(),
			created: 0,
			choices: vec![Choice {
				index: 0,
				message: Message::assistant("hello"),
				finish_reason: FinishReason::Stop,
			}],
			usage: None,
		};
		let http_resp = inbound.transform_response(resp).unwrap();
		assert_eq!(
			http_resp.headers().get("x-vercel-ai-data-stream").unwrap(),
			"v1"
		);
	}
}
