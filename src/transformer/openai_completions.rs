//! OpenAI Chat Completions inbound + outbound transformer.
//!
//! Wire shapes are grounded on the teacher's `llm/conversion/completions.rs`
//! and the (missing-from-the-retrieval-pack but referenced) `typed::Request`
//! it builds: a `messages` array tagged by role, `tool_choice` as either a
//! bare mode string or `{type:"function", function:{name}}`, and a streaming
//! `choices[].delta` shape. Unknown/vendor-specific fields are intentionally
//! not modeled — this transformer only carries the canonical fields forward.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::canonical::*;
use crate::error::{AxonError, Result};
use crate::http_types::{Body, Request, Response};
use crate::sse;
use crate::stream::{BoxEventStream, StreamEvent};
use crate::transformer::{HttpError, Inbound, Outbound};

pub const DEFAULT_HOST: &str = "api.openai.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
	pub role: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<serde_json::Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<WireToolCall>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_call_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionCall {
	pub name: String,
	pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTool {
	#[serde(rename = "type")]
	pub kind: String,
	pub function: WireFunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionDef {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireToolChoice {
	Mode(String),
	Named { r#type: String, function: WireFunctionName },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionName {
	pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireStop {
	One(String),
	Many(Vec<String>),
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct WireRequest {
	pub model: String,
	pub messages: Vec<WireMessage>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_completion_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stop: Option<WireStop>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stream_options: Option<WireStreamOptions>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<WireTool>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_choice: Option<WireToolChoice>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub frequency_penalty: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub presence_penalty: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub seed: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub parallel_tool_calls: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub store: Option<bool>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct WireStreamOptions {
	#[serde(default)]
	pub include_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUsage {
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
	pub total_tokens: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prompt_tokens_details: Option<WirePromptTokenDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePromptTokenDetails {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cached_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireChoice {
	pub index: u32,
	pub message: WireMessage,
	pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
	pub id: String,
	pub object: String,
	pub created: i64,
	pub model: String,
	pub choices: Vec<WireChoice>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireDelta {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<WireToolCallChunk>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCallChunk {
	pub index: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub function: Option<WireFunctionCallChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionCallChunk {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub arguments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireStreamChoice {
	pub index: u32,
	pub delta: WireDelta,
	pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireStreamChunk {
	pub id: String,
	pub object: String,
	pub created: i64,
	pub model: String,
	pub choices: Vec<WireStreamChoice>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub usage: Option<WireUsage>,
}

fn role_to_wire(r: Role) -> &'static str {
	match r {
		Role::System => "system",
		Role::Developer => "developer",
		Role::User => "user",
		Role::Assistant => "assistant",
		Role::Tool => "tool",
	}
}

fn role_from_wire(s: &str) -> Role {
	match s {
		"system" => Role::System,
		"developer" => Role::Developer,
		"assistant" => Role::Assistant,
		"tool" => Role::Tool,
		_ => Role::User,
	}
}

fn finish_reason_to_wire(f: FinishReason) -> &'static str {
	match f {
		FinishReason::Stop => "stop",
		FinishReason::Length => "length",
		FinishReason::ToolUse => "tool_calls",
		FinishReason::ContentFilter => "content_filter",
		FinishReason::Error => "error",
		FinishReason::Canceled => "stop",
	}
}

fn finish_reason_from_wire(s: Option<&str>) -> FinishReason {
	match s {
		Some("length") => FinishReason::Length,
		Some("tool_calls") | Some("function_call") => FinishReason::ToolUse,
		Some("content_filter") => FinishReason::ContentFilter,
		Some("error") => FinishReason::Error,
		_ => FinishReason::Stop,
	}
}

/// Canonical request -> OpenAI wire request, shared by the inbound encode
/// path (to echo a stored request back) and the outbound transformer.
pub fn encode_request(req: &LlmRequest) -> WireRequest {
	let messages = req
		.messages
		.iter()
		.map(|m| {
			let tool_calls: Vec<WireToolCall> = match &m.content {
				Content::Parts(parts) => parts
					.iter()
					.filter_map(|p| match p {
						ContentPart::ToolUse { id, name, input } => Some(WireToolCall {
							id: id.clone(),
							kind: "function".to_string(),
							function: WireFunctionCall {
								name: name.clone(),
								arguments: serde_json::to_string(input).unwrap_or_default(),
							},
						}),
						_ => None,
					})
					.collect(),
				_ => Vec::new(),
			};
			let tool_call_id = match &m.content {
				Content::Parts(parts) => parts.iter().find_map(|p| match p {
					ContentPart::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
					_ => None,
				}),
				_ => None,
			};
			let content_text = m.content.as_flat_text();
			WireMessage {
				role: role_to_wire(m.role).to_string(),
				content: if content_text.is_empty() && !tool_calls.is_empty() {
					None
				} else {
					Some(serde_json::Value::String(content_text))
				},
				tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
				tool_call_id,
				name: None,
			}
		})
		.collect();

	let tools = req
		.tools
		.iter()
		.map(|t| WireTool {
			kind: "function".to_string(),
			function: WireFunctionDef {
				name: t.name.clone(),
				description: t.description.clone(),
				parameters: Some(t.input_schema.clone()),
			},
		})
		.collect::<Vec<_>>();

	let tool_choice = req.tool_choice.as_ref().map(|tc| match tc {
		ToolChoice::Auto => WireToolChoice::Mode("auto".to_string()),
		ToolChoice::None => WireToolChoice::Mode("none".to_string()),
		ToolChoice::Required => WireToolChoice::Mode("required".to_string()),
		ToolChoice::ByName(name) => WireToolChoice::Named {
			r#type: "function".to_string(),
			function: WireFunctionName { name: name.clone() },
		},
	});

	WireRequest {
		model: req.model.to_string(),
		messages,
		temperature: req.sampling.temperature,
		top_p: req.sampling.top_p,
		max_tokens: None,
		max_completion_tokens: req.sampling.max_output_tokens,
		stop: if req.sampling.stop.is_empty() {
			None
		} else {
			Some(WireStop::Many(req.sampling.stop.clone()))
		},
		stream: Some(req.stream),
		stream_options: req
			.stream_options
			.as_ref()
			.map(|o| WireStreamOptions { include_usage: o.include_usage }),
		tools: if tools.is_empty() { None } else { Some(tools) },
		tool_choice,
		frequency_penalty: req.sampling.frequency_penalty,
		presence_penalty: req.sampling.presence_penalty,
		seed: req.sampling.seed,
		parallel_tool_calls: req.sampling.parallel_tool_calls,
		store: None,
	}
}

pub fn decode_request(wire: WireRequest) -> Result<LlmRequest> {
	let messages = wire
		.messages
		.into_iter()
		.map(|m| {
			let mut parts = Vec::new();
			if let Some(content) = &m.content {
				if let Some(s) = content.as_str() {
					if !s.is_empty() {
						parts.push(ContentPart::Text { text: s.to_string() });
					}
				}
			}
			if let Some(tool_call_id) = &m.tool_call_id {
				let text = m
					.content
					.as_ref()
					.and_then(|c| c.as_str())
					.unwrap_or_default()
					.to_string();
				parts.clear();
				parts.push(ContentPart::ToolResult {
					tool_use_id: tool_call_id.clone(),
					content: text,
					is_error: false,
				});
			}
			for tc in m.tool_calls.into_iter().flatten() {
				let input = serde_json::from_str(&tc.function.arguments)
					.unwrap_or(serde_json::Value::Null);
				parts.push(ContentPart::ToolUse { id: tc.id, name: tc.function.name, input });
			}
			let content = if parts.len() == 1 {
				if let ContentPart::Text { text } = &parts[0] {
					Content::Text(text.clone())
				} else {
					Content::Parts(parts)
				}
			} else {
				Content::Parts(parts)
			};
			Message { role: role_from_wire(&m.role), content }
		})
		.collect();

	let tools = wire
		.tools
		.into_iter()
		.flatten()
		.map(|t| ToolDefinition {
			name: t.function.name,
			description: t.function.description,
			input_schema: t.function.parameters.unwrap_or(serde_json::json!({})),
		})
		.collect();

	let tool_choice = wire.tool_choice.map(|tc| match tc {
		WireToolChoice::Mode(m) if m == "none" => ToolChoice::None,
		WireToolChoice::Mode(m) if m == "required" => ToolChoice::Required,
		WireToolChoice::Mode(_) => ToolChoice::Auto,
		WireToolChoice::Named { function, .. } => ToolChoice::ByName(function.name),
	});

	let stop = match wire.stop {
		Some(WireStop::One(s)) => vec![s],
		Some(WireStop::Many(v)) => v,
		None => vec![],
	};

	Ok(LlmRequest {
		model: wire.model.into(),
		messages,
		tools,
		tool_choice,
		sampling: SamplingOptions {
			temperature: wire.temperature,
			top_p: wire.top_p,
			max_output_tokens: wire.max_completion_tokens.or(wire.max_tokens),
			stop,
			frequency_penalty: wire.frequency_penalty,
			presence_penalty: wire.presence_penalty,
			seed: wire.seed,
			parallel_tool_calls: wire.parallel_tool_calls,
		},
		stream: wire.stream.unwrap_or(false),
		stream_options: wire
			.stream_options
			.map(|o| StreamOptions { include_usage: o.include_usage }),
		transformer_metadata: Default::default(),
		raw_request: None,
	})
}

pub fn encode_response(resp: &LlmResponse) -> WireResponse {
	WireResponse {
		id: resp.id.clone(),
		object: "chat.completion".to_string(),
		created: resp.created,
		model: resp.model.to_string(),
		choices: resp
			.choices
			.iter()
			.map(|c| WireChoice {
				index: c.index,
				message: WireMessage {
					role: role_to_wire(c.message.role).to_string(),
					content: Some(serde_json::Value::String(c.message.content.as_flat_text())),
					tool_calls: None,
					tool_call_id: None,
					name: None,
				},
				finish_reason: Some(finish_reason_to_wire(c.finish_reason).to_string()),
			})
			.collect(),
		usage: resp.usage.as_ref().map(|u| WireUsage {
			prompt_tokens: u.prompt_tokens,
			completion_tokens: u.completion_tokens,
			total_tokens: u.prompt_tokens + u.completion_tokens,
			prompt_tokens_details: u
				.cached_tokens
				.map(|c| WirePromptTokenDetails { cached_tokens: Some(c) }),
		}),
	}
}

pub fn decode_response(wire: WireResponse) -> LlmResponse {
	LlmResponse {
		id: wire.id,
		model: wire.model.into(),
		created: wire.created,
		choices: wire
			.choices
			.into_iter()
			.map(|c| Choice {
				index: c.index,
				message: Message {
					role: role_from_wire(&c.message.role),
					content: Content::Text(
						c.message.content.as_ref().and_then(|v| v.as_str()).unwrap_or("").to_string(),
					),
				},
				finish_reason: finish_reason_from_wire(c.finish_reason.as_deref()),
			})
			.collect(),
		usage: wire.usage.map(|u| Usage {
			prompt_tokens: u.prompt_tokens,
			completion_tokens: u.completion_tokens,
			cached_tokens: u.prompt_tokens_details.and_then(|d| d.cached_tokens),
			audio_tokens: None,
			reasoning_tokens: None,
			prediction_tokens: None,
		}),
	}
}

pub struct OpenAiCompletionsInbound;

#[async_trait]
impl Inbound for OpenAiCompletionsInbound {
	fn api_format(&self) -> &'static str {
		"openai.completions"
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
		let mut llm_req = decode_request(wire)?;
		llm_req.raw_request = Some(RawRequestRef::new(parts));
		Ok(llm_req)
	}

	fn transform_response(&self, resp: LlmResponse) -> Result<Response> {
		let wire = encode_response(&resp);
		Ok(crate::http_types::json_response(http::StatusCode::OK, &wire))
	}

	fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
		Box::pin(async_stream::stream! {
			futures_util::pin_mut!(stream);
			use futures_util::StreamExt;
			while let Some(next) = stream.next().await {
				match next {
					Ok(ev) => yield Ok(StreamEvent::data_only(ev.data)),
					Err(e) => { yield Err(e); break; }
				}
			}
			yield Ok(sse::done_event());
		})
	}

	fn transform_error(&self, err: HttpError) -> Response {
		let body = serde_json::json!({
			"error": {
				"message": err.body["error"]["message"],
				"type": err.body["error"]["type"],
				"code": serde_json::Value::Null,
			}
		});
		crate::http_types::json_response(err.status, &body)
	}

	fn aggregate_stream_chunks(&self, events: &[StreamEvent]) -> Result<LlmResponse> {
		let mut id = String::new();
		let mut model = String::new();
		let mut created = 0i64;
		let mut content = String::new();
		let mut finish_reason = FinishReason::Stop;
		let mut usage = None;
		for ev in events {
			if &ev.data[..] == b"[DONE]" {
				continue;
			}
			let chunk: WireStreamChunk = match serde_json::from_slice(&ev.data) {
				Ok(c) => c,
				Err(_) => continue,
			};
			id = chunk.id;
			model = chunk.model;
			created = chunk.created;
			if let Some(choice) = chunk.choices.first() {
				if let Some(delta) = &choice.delta.content {
					content.push_str(delta);
				}
				if let Some(fr) = &choice.finish_reason {
					finish_reason = finish_reason_from_wire(Some(fr.as_str()));
				}
			}
			if let Some(u) = chunk.usage {
				usage = Some(Usage {
					prompt_tokens: u.prompt_tokens,
					completion_tokens: u.completion_tokens,
					cached_tokens: u.prompt_tokens_details.and_then(|d| d.cached_tokens),
					audio_tokens: None,
					reasoning_tokens: None,
					prediction_tokens: None,
				});
			}
		}
		Ok(LlmResponse {
			id,
			model: model.into(),
			created,
			choices: vec![Choice {
				index: 0,
				message: Message { role: Role::Assistant, content: Content::Text(content) },
				finish_reason,
			}],
			usage,
		})
	}
}

pub struct OpenAiCompletionsOutbound {
	pub base_url: Arc<str>,
}

impl Default for OpenAiCompletionsOutbound {
	fn default() -> Self {
		OpenAiCompletionsOutbound { base_url: Arc::from(format!("https://{DEFAULT_HOST}")) }
	}
}

#[async_trait]
impl Outbound for OpenAiCompletionsOutbound {
	fn provider(&self) -> &'static str {
		"openai"
	}

	fn transform_request(&self, req: &LlmRequest) -> Result<Request> {
		let wire = encode_request(req);
		let body = Body::from_json(&wire).map_err(|e| AxonError::Transformer(e.to_string()))?;
		http::Request::builder()
			.method(http::Method::POST)
			.uri(format!("{}/v1/chat/completions", self.base_url))
			.header(http::header::CONTENT_TYPE, "application/json")
			.body(body)
			.map_err(|e| AxonError::Transformer(e.to_string()))
	}

	fn transform_response(&self, resp: Response) -> Result<LlmResponse> {
		let (parts, body) = resp.into_parts();
		let bytes = match body {
			Body::Full(b) => b,
			Body::Streaming(_) => {
				return Err(AxonError::Transformer("unary decode got a streaming body".into()));
			},
		};
		if !parts.status.is_success() {
			return Err(self.error_from_bytes(parts.status, &bytes));
		}
		let wire: WireResponse =
			serde_json::from_slice(&bytes).map_err(|e| AxonError::Transformer(e.to_string()))?;
		Ok(decode_response(wire))
	}

	fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
		stream
	}

	fn transform_error(&self, resp: &Response, body: &[u8]) -> AxonError {
		self.error_from_bytes(resp.status(), body)
	}
}

impl OpenAiCompletionsOutbound {
	fn error_from_bytes(&self, status: http::StatusCode, bytes: &[u8]) -> AxonError {
		let message = serde_json::from_slice::<serde_json::Value>(bytes)
			.ok()
			.and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
			.unwrap_or_else(|| String::from_utf8_lossy(bytes).to_string());
		AxonError::from_upstream_status(status, message)
	}
}
