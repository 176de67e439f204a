//! Anthropic Messages inbound + outbound transformer.
//!
//! Anthropic's content-block shape is the teacher's native intermediate
//! form for tool calls (see the distilled spec's note "Anthropic tool calls
//! arrive as typed content blocks and must be reconstituted into an
//! OpenAI-style `tool_calls` array when the inbound is OpenAI" — mirrored
//! here in `decode_response`/`encode_request`'s content-block handling).
//! System prompts are a top-level string/array field, not a message role,
//! so the first `system`/`developer` messages are pulled out and joined
//! with `\n` (`Content::as_flat_text`) the way the teacher's
//! `conversion::completions::from_messages` does going the other way.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::canonical::*;
use crate::error::{AxonError, Result};
use crate::http_types::{Body, Request, Response};
use crate::stream::{BoxEventStream, StreamEvent};
use crate::transformer::{HttpError, Inbound, Outbound};

pub const DEFAULT_HOST: &str = "api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBlock {
	Text {
		text: String,
	},
	ToolUse {
		id: String,
		name: String,
		input: serde_json::Value,
	},
	ToolResult {
		tool_use_id: String,
		content: String,
		#[serde(default, skip_serializing_if = "std::ops::Not::not")]
		is_error: bool,
	},
	Image {
		source: serde_json::Value,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
	Text(String),
	Blocks(Vec<WireBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
	pub role: String,
	pub content: WireContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTool {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireToolChoice {
	Auto,
	Any,
	None,
	Tool { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
	pub model: String,
	pub messages: Vec<WireMessage>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub system: Option<String>,
	pub max_tokens: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub stop_sequences: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<WireTool>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_choice: Option<WireToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUsage {
	pub input_tokens: u64,
	pub output_tokens: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
	pub id: String,
	pub r#type: String,
	pub role: String,
	pub model: String,
	pub content: Vec<WireBlock>,
	pub stop_reason: Option<String>,
	pub usage: WireUsage,
}

/// Anthropic's minimum is 1; the default the spec's end-to-end scenario
/// checks for (`"max_tokens":≥1`) when the canonical request left it unset.
const DEFAULT_MAX_TOKENS: u64 = 4096;

fn role_to_wire(r: Role) -> &'static str {
	match r {
		Role::Assistant => "assistant",
		_ => "user",
	}
}

fn is_system_role(r: Role) -> bool {
	matches!(r, Role::System | Role::Developer)
}

fn finish_reason_to_wire(f: FinishReason) -> Option<&'static str> {
	Some(match f {
		FinishReason::Stop => "end_turn",
		FinishReason::Length => "max_tokens",
		FinishReason::ToolUse => "tool_use",
		FinishReason::ContentFilter => "stop_sequence",
		FinishReason::Error | FinishReason::Canceled => return None,
	})
}

fn finish_reason_from_wire(s: Option<&str>) -> FinishReason {
	match s {
		Some("max_tokens") => FinishReason::Length,
		Some("tool_use") => FinishReason::ToolUse,
		Some("stop_sequence") => FinishReason::ContentFilter,
		_ => FinishReason::Stop,
	}
}

pub fn encode_request(req: &LlmRequest) -> WireRequest {
	let system_text = req
		.messages
		.iter()
		.take_while(|m| is_system_role(m.role))
		.map(|m| m.content.as_flat_text())
		.collect::<Vec<_>>()
		.join("\n");

	let messages = req
		.messages
		.iter()
		.filter(|m| !is_system_role(m.role))
		.map(|m| {
			let blocks = match &m.content {
				Content::Text(t) => vec![WireBlock::Text { text: t.clone() }],
				Content::Parts(parts) => parts
					.iter()
					.map(|p| match p {
						ContentPart::Text { text } => WireBlock::Text { text: text.clone() },
						ContentPart::ToolUse { id, name, input } => {
							WireBlock::ToolUse { id: id.clone(), name: name.clone(), input: input.clone() }
						},
						ContentPart::ToolResult { tool_use_id, content, is_error } => WireBlock::ToolResult {
							tool_use_id: tool_use_id.clone(),
							content: content.clone(),
							is_error: *is_error,
						},
						ContentPart::ImageUrl { url } => {
							WireBlock::Image { source: serde_json::json!({"type": "url", "url": url}) }
						},
						ContentPart::Audio { .. } | ContentPart::Reasoning { .. } => {
							WireBlock::Text { text: String::new() }
						},
					})
					.collect(),
			};
			WireMessage { role: role_to_wire(m.role).to_string(), content: WireContent::Blocks(blocks) }
		})
		.collect();

	let tools = req
		.tools
		.iter()
		.map(|t| WireTool { name: t.name.clone(), description: t.description.clone(), input_schema: t.input_schema.clone() })
		.collect::<Vec<_>>();

	let tool_choice = req.tool_choice.as_ref().map(|tc| match tc {
		ToolChoice::Auto => WireToolChoice::Auto,
		ToolChoice::Required => WireToolChoice::Any,
		ToolChoice::None => WireToolChoice::None,
		ToolChoice::ByName(name) => WireToolChoice::Tool { name: name.clone() },
	});

	WireRequest {
		model: req.model.to_string(),
		messages,
		system: if system_text.is_empty() { None } else { Some(system_text) },
		max_tokens: req.sampling.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS).max(1),
		temperature: req.sampling.temperature,
		top_p: req.sampling.top_p,
		stop_sequences: req.sampling.stop.clone(),
		stream: Some(req.stream),
		tools: if tools.is_empty() { None } else { Some(tools) },
		tool_choice,
	}
}

pub fn decode_request(wire: WireRequest) -> LlmRequest {
	let mut messages = Vec::new();
	if let Some(system) = &wire.system {
		if !system.is_empty() {
			messages.push(Message::system(system.clone()));
		}
	}
	for m in wire.messages {
		let parts = match m.content {
			WireContent::Text(t) => vec![ContentPart::Text { text: t }],
			WireContent::Blocks(blocks) => blocks
				.into_iter()
				.map(|b| match b {
					WireBlock::Text { text } => ContentPart::Text { text },
					WireBlock::ToolUse { id, name, input } => ContentPart::ToolUse { id, name, input },
					WireBlock::ToolResult { tool_use_id, content, is_error } => {
						ContentPart::ToolResult { tool_use_id, content, is_error }
					},
					WireBlock::Image { source } => {
						ContentPart::ImageUrl { url: source.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string() }
					},
				})
				.collect(),
		};
		let role = if m.role == "assistant" { Role::Assistant } else { Role::User };
		messages.push(Message { role, content: Content::Parts(parts) });
	}

	let tools = wire
		.tools
		.into_iter()
		.flatten()
		.map(|t| ToolDefinition { name: t.name, description: t.description, input_schema: t.input_schema })
		.collect();

	let tool_choice = wire.tool_choice.map(|tc| match tc {
		WireToolChoice::Auto => ToolChoice::Auto,
		WireToolChoice::Any => ToolChoice::Required,
		WireToolChoice::None => ToolChoice::None,
		WireToolChoice::Tool { name } => ToolChoice::ByName(name),
	});

	LlmRequest {
		model: wire.model.into(),
		messages,
		tools,
		tool_choice,
		sampling: SamplingOptions {
			temperature: wire.temperature,
			top_p: wire.top_p,
			max_output_tokens: Some(wire.max_tokens),
			stop: wire.stop_sequences,
			..Default::default()
		},
		stream: wire.stream.unwrap_or(false),
		stream_options: None,
		transformer_metadata: Default::default(),
		raw_request: None,
	}
}

pub fn encode_response(resp: &LlmResponse) -> WireResponse {
	let choice = resp.choices.first();
	let content = match choice {
		Some(c) => match &c.message.content {
			Content::Text(t) => vec![WireBlock::Text { text: t.clone() }],
			Content::Parts(parts) => parts
				.iter()
				.map(|p| match p {
					ContentPart::Text { text } => WireBlock::Text { text: text.clone() },
					ContentPart::ToolUse { id, name, input } => {
						WireBlock::ToolUse { id: id.clone(), name: name.clone(), input: input.clone() }
					},
					ContentPart::ToolResult { tool_use_id, content, is_error } => {
						WireBlock::ToolResult { tool_use_id: tool_use_id.clone(), content: content.clone(), is_error: *is_error }
					},
					_ => WireBlock::Text { text: String::new() },
				})
				.collect(),
		},
		None => vec![],
	};
	WireResponse {
		id: resp.id.clone(),
		r#type: "message".to_string(),
		role: "assistant".to_string(),
		model: resp.model.to_string(),
		content,
		stop_reason: choice.and_then(|c| finish_reason_to_wire(c.finish_reason)).map(|s| s.to_string()),
		usage: WireUsage {
			input_tokens: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
			output_tokens: resp.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
			cache_read_input_tokens: resp.usage.as_ref().and_then(|u| u.cached_tokens),
		},
	}
}

pub fn decode_response(wire: WireResponse) -> LlmResponse {
	let parts: Vec<ContentPart> = wire
		.content
		.into_iter()
		.map(|b| match b {
			WireBlock::Text { text } => ContentPart::Text { text },
			WireBlock::ToolUse { id, name, input } => ContentPart::ToolUse { id, name, input },
			WireBlock::ToolResult { tool_use_id, content, is_error } => {
				ContentPart::ToolResult { tool_use_id, content, is_error }
			},
			WireBlock::Image { .. } => ContentPart::Text { text: String::new() },
		})
		.collect();
	LlmResponse {
		id: wire.id,
		model: wire.model.into(),
		created: 0,
		choices: vec![Choice {
			index: 0,
			message: Message { role: Role::Assistant, content: Content::Parts(parts) },
			finish_reason: finish_reason_from_wire(wire.stop_reason.as_deref()),
		}],
		usage: Some(Usage {
			prompt_tokens: wire.usage.input_tokens,
			completion_tokens: wire.usage.output_tokens,
			cached_tokens: wire.usage.cache_read_input_tokens,
			audio_tokens: None,
			reasoning_tokens: None,
			prediction_tokens: None,
		}),
	}
}

pub struct AnthropicMessagesInbound;

#[async_trait]
impl Inbound for AnthropicMessagesInbound {
	fn api_format(&self) -> &'static str {
		"anthropic.messages"
	}

	fn transform_request(&self, req: Request) -> Result<LlmRequest> {
		let (parts, body) = req.into_parts();
		let bytes = match body {
			Body::Full(b) => b,
			Body::Streaming(_) => return Err(AxonError::InvalidRequest("body must be buffered".into())),
		};
		let wire: WireRequest = serde_json::from_slice(&bytes).map_err(|e| AxonError::InvalidRequest(e.to_string()))?;
		let mut llm_req = decode_request(wire);
		llm_req.raw_request = Some(RawRequestRef::new(parts));
		Ok(llm_req)
	}

	fn transform_response(&self, resp: LlmResponse) -> Result<Response> {
		let wire = encode_response(&resp);
		Ok(crate::http_types::json_response(http::StatusCode::OK, &wire))
	}

	fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
		stream
	}

	fn transform_error(&self, err: HttpError) -> Response {
		let body = serde_json::json!({
			"type": "error",
			"error": { "type": err.body["error"]["type"], "message": err.body["error"]["message"] },
		});
		crate::http_types::json_response(err.status, &body)
	}

	fn aggregate_stream_chunks(&self, events: &[StreamEvent]) -> Result<LlmResponse> {
		let mut id = String::new();
		let mut model = String::new();
		let mut text = String::new();
		let mut stop_reason = None;
		let mut usage = WireUsage { input_tokens: 0, output_tokens: 0, cache_read_input_tokens: None };
		for ev in events {
			let v: serde_json::Value = match serde_json::from_slice(&ev.data) {
				Ok(v) => v,
				Err(_) => continue,
			};
			match ev.event_type.as_str() {
				"message_start" => {
					if let Some(msg) = v.get("message") {
						id = msg.get("id").and_then(|i| i.as_str()).unwrap_or_default().to_string();
						model = msg.get("model").and_then(|i| i.as_str()).unwrap_or_default().to_string();
						if let Some(u) = msg.get("usage") {
							usage.input_tokens = u.get("input_tokens").and_then(|x| x.as_u64()).unwrap_or(0);
						}
					}
				},
				"content_block_delta" => {
					if let Some(t) = v["delta"]["text"].as_str() {
						text.push_str(t);
					}
				},
				"message_delta" => {
					stop_reason = v["delta"]["stop_reason"].as_str().map(|s| s.to_string());
					if let Some(out) = v["usage"]["output_tokens"].as_u64() {
						usage.output_tokens = out;
					}
				},
				_ => {},
			}
		}
		Ok(decode_response(WireResponse {
			id,
			r#type: "message".to_string(),
			role: "assistant".to_string(),
			model,
			content: vec![WireBlock::Text { text }],
			stop_reason,
			usage,
		}))
	}
}

pub struct AnthropicMessagesOutbound {
	pub base_url: Arc<str>,
}

impl Default for AnthropicMessagesOutbound {
	fn default() -> Self {
		AnthropicMessagesOutbound { base_url: Arc::from(format!("https://{DEFAULT_HOST}")) }
	}
}

#[async_trait]
impl Outbound for AnthropicMessagesOutbound {
	fn provider(&self) -> &'static str {
		"anthropic"
	}

	fn transform_request(&self, req: &LlmRequest) -> Result<Request> {
		let wire = encode_request(req);
		let body = Body::from_json(&wire).map_err(|e| AxonError::Transformer(e.to_string()))?;
		http::Request::builder()
			.method(http::Method::POST)
			.uri(format!("{}/v1/messages", self.base_url))
			.header(http::header::CONTENT_TYPE, "application/json")
			.header("anthropic-version", ANTHROPIC_VERSION)
			.body(body)
			.map_err(|e| AxonError::Transformer(e.to_string()))
	}

	fn transform_response(&self, resp: Response) -> Result<LlmResponse> {
		let (parts, body) = resp.into_parts();
		let bytes = match body {
			Body::Full(b) => b,
			Body::Streaming(_) => return Err(AxonError::Transformer("unary decode got a streaming body".into())),
		};
		if !parts.status.is_success() {
			return Err(self.error_from_bytes(parts.status, &bytes));
		}
		let wire: WireResponse = serde_json::from_slice(&bytes).map_err(|e| AxonError::Transformer(e.to_string()))?;
		Ok(decode_response(wire))
	}

	fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
		stream
	}

	fn transform_error(&self, resp: &Response, body: &[u8]) -> AxonError {
		self.error_from_bytes(resp.status(), body)
	}
}

impl AnthropicMessagesOutbound {
	fn error_from_bytes(&self, status: http::StatusCode, bytes: &[u8]) -> AxonError {
		let message = serde_json::from_slice::<serde_json::Value>(bytes)
			.ok()
			.and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
			.unwrap_or_else(|| String::from_utf8_lossy(bytes).to_string());
		AxonError::from_upstream_status(status, message)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encode_request_joins_leading_system_messages_and_wraps_text_in_a_block() {
		let req = LlmRequest::new(
			"claude-3",
			vec![Message::system("be terse"), Message::user("Hi")],
		);
		let wire = encode_request(&req);
		assert_eq!(wire.system.as_deref(), Some("be terse"));
		assert_eq!(wire.messages.len(), 1);
		match &wire.messages[0].content {
			WireContent::Blocks(blocks) => {
				assert!(matches!(&blocks[0], WireBlock::Text{text} if text == "Hi"));
			},
			_ => panic!("expected blocks"),
		}
		assert!(wire.max_tokens >= 1);
	}

	#[test]
	fn decode_response_surfaces_tool_use_as_a_typed_content_part() {
		let wire = WireResponse {
			id: "msg_1".into(),
			r#type: "message".into(),
			role: "assistant".into(),
			model: "claude-3".into(),
			content: vec![WireBlock::ToolUse { id: "t1".into(), name: "calculate".into(), input: serde_json::json!({"expression":"50*30"}) }],
			stop_reason: Some("tool_use".to_string()),
			usage: WireUsage { input_tokens: 10, output_tokens: 5, cache_read_input_tokens: None },
		};
		let resp = decode_response(wire);
		assert_eq!(resp.choices[0].finish_reason, FinishReason::ToolUse);
		match &resp.choices[0].message.content {
			Content::Parts(parts) => assert!(matches!(&parts[0], ContentPart::ToolUse{name,..} if name == "calculate")),
			_ => panic!("expected parts"),
		}
	}
}
