//! OpenAI Responses API inbound transformer (§4.1, §6: `POST /v1/responses`).
//!
//! Grounded on the teacher's `llm/types/responses.rs`: `input` is either a
//! bare string or an array of role-tagged messages, output is an array of
//! typed items (we model only the `message` item carrying `output_text`
//! parts, the one shape every canonical `LlmResponse` can always produce),
//! and `usage` counts `input_tokens`/`output_tokens` rather than
//! `prompt_tokens`/`completion_tokens`. Unlike the teacher, which builds
//! these types on `async_openai::types::responses`, this crate keeps the
//! hand-rolled `Wire*` + `encode`/`decode` pattern every other transformer
//! in this module uses, so there is no new dependency for one vendor shape.
//! There is no separate Responses *outbound*: upstream OpenAI is always
//! addressed over Chat Completions (`openai_completions::OpenAiCompletionsOutbound`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::canonical::*;
use crate::error::{AxonError, Result};
use crate::http_types::{Body, Request, Response};
use crate::stream::{BoxEventStream, StreamEvent};
use crate::transformer::{HttpError, Inbound};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireInput {
	Text(String),
	Items(Vec<WireInputMessage>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireInputMessage {
	pub role: String,
	pub content: WireInputContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireInputContent {
	Text(String),
	Parts(Vec<WireInputPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireInputPart {
	InputText { text: String },
	InputImage { image_url: String },
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct WireRequest {
	pub model: String,
	pub input: WireInput,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub instructions: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_output_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<WireTool>>,
}

impl Default for WireInput {
	fn default() -> Self {
		WireInput::Text(String::new())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTool {
	#[serde(rename = "type")]
	pub kind: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOutputTextPart {
	#[serde(rename = "type")]
	pub kind: String,
	pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOutputMessage {
	#[serde(rename = "type")]
	pub kind: String,
	pub role: String,
	pub content: Vec<WireOutputTextPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUsage {
	pub input_tokens: u64,
	pub output_tokens: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
	pub id: String,
	pub object: String,
	pub created_at: i64,
	pub model: String,
	pub status: String,
	pub output: Vec<WireOutputMessage>,
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

pub fn decode_request(wire: WireRequest) -> Result<LlmRequest> {
	let mut messages = Vec::new();
	match wire.input {
		WireInput::Text(text) => messages.push(Message::user(text)),
		WireInput::Items(items) => {
			for item in items {
				let text = match item.content {
					WireInputContent::Text(t) => t,
					WireInputContent::Parts(parts) => parts
						.into_iter()
						.filter_map(|p| match p {
							WireInputPart::InputText { text } => Some(text),
							WireInputPart::InputImage { .. } => None,
						})
						.collect::<Vec<_>>()
						.join("\n"),
				};
				messages.push(Message { role: role_from_wire(&item.role), content: Content::text(text) });
			}
		},
	}
	if let Some(instructions) = wire.instructions {
		messages.insert(0, Message::system(instructions));
	}

	let tools = wire
		.tools
		.into_iter()
		.flatten()
		.map(|t| ToolDefinition {
			name: t.name,
			description: t.description,
			input_schema: t.parameters.unwrap_or(serde_json::json!({})),
		})
		.collect();

	Ok(LlmRequest {
		model: wire.model.into(),
		messages,
		tools,
		tool_choice: None,
		sampling: SamplingOptions {
			temperature: wire.temperature,
			top_p: wire.top_p,
			max_output_tokens: wire.max_output_tokens,
			..Default::default()
		},
		stream: wire.stream.unwrap_or(false),
		stream_options: None,
		transformer_metadata: Default::default(),
		raw_request: None,
	})
}

pub fn encode_response(resp: &LlmResponse) -> WireResponse {
	let output = resp
		.choices
		.iter()
		.map(|c| WireOutputMessage {
			kind: "message".to_string(),
			role: role_to_wire(c.message.role).to_string(),
			content: vec![WireOutputTextPart { kind: "output_text".to_string(), text: c.message.content.as_flat_text() }],
		})
		.collect();
	WireResponse {
		id: resp.id.clone(),
		object: "response".to_string(),
		created_at: resp.created,
		model: resp.model.to_string(),
		status: "completed".to_string(),
		output,
		usage: resp.usage.as_ref().map(|u| WireUsage {
			input_tokens: u.prompt_tokens,
			output_tokens: u.completion_tokens,
			total_tokens: Some(u.prompt_tokens + u.completion_tokens),
		}),
	}
}

pub struct OpenAiResponsesInbound;

#[async_trait]
impl Inbound for OpenAiResponsesInbound {
	fn api_format(&self) -> &'static str {
		"openai.responses"
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

	/// Re-frames each canonical delta as a `response.output_text.delta` SSE
	/// event, the real Responses API's event-typed streaming shape, and
	/// closes with `response.completed` instead of OpenAI Chat Completions'
	/// bare `[DONE]` sentinel.
	fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
		Box::pin(async_stream::stream! {
			use futures_util::StreamExt;
			futures_util::pin_mut!(stream);
			while let Some(next) = stream.next().await {
				match next {
					Ok(ev) => {
						let text = String::from_utf8_lossy(&ev.data).to_string();
						let frame = serde_json::json!({ "type": "response.output_text.delta", "delta": text });
						yield Ok(StreamEvent::new("response.output_text.delta", serde_json::to_vec(&frame).unwrap_or_default()));
					},
					Err(e) => { yield Err(e); return; },
				}
			}
			let done = serde_json::json!({ "type": "response.completed" });
			yield Ok(StreamEvent::new("response.completed", serde_json::to_vec(&done).unwrap_or_default()));
		})
	}

	fn transform_error(&self, err: HttpError) -> Response {
		let body = serde_json::json!({
			"error": {
				"message": err.body["error"]["message"],
				"type": err.body["error"]["type"],
			}
		});
		crate::http_types::json_response(err.status, &body)
	}

	fn aggregate_stream_chunks(&self, events: &[StreamEvent]) -> Result<LlmResponse> {
		let mut content = String::new();
		for ev in events {
			if let Ok(v) = serde_json::from_slice::<serde_json::Value>(&ev.data) {
				if let Some(text) = v.get("delta").and_then(|d| d.as_str()) {
					content.push_str(text);
				}
			}
		}
		Ok(LlmResponse {
			id: uuid::Uuid::new_v4().to_string(),
			model: "".into(),
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
	fn a_bare_string_input_becomes_a_single_user_message() {
		let wire: WireRequest = serde_json::from_str(r#"{"model":"gpt-4o","input":"hello there"}"#).unwrap();
		let req = decode_request(wire).unwrap();
		assert_eq!(req.messages.len(), 1);
		assert_eq!(req.messages[0].content.as_flat_text(), "hello there");
	}

	#[test]
	fn instructions_are_prepended_as_a_system_message() {
		let wire: WireRequest = serde_json::from_str(
			r#"{"model":"gpt-4o","input":"hi","instructions":"be terse"}"#,
		)
		.unwrap();
		let req = decode_request(wire).unwrap();
		assert_eq!(req.messages.len(), 2);
		assert_eq!(req.messages[0].role, Role::System);
	}

	#[test]
	fn item_array_input_preserves_role_ordering() {
		let wire: WireRequest = serde_json::from_str(
			r#"{"model":"gpt-4o","input":[{"role":"user","content":"a"},{"role":"assistant","content":"b"}]}"#,
		)
		.unwrap();
		let req = decode_request(wire).unwrap();
		assert_eq!(req.messages.len(), 2);
		assert_eq!(req.messages[1].role, Role::Assistant);
	}

	#[test]
	fn encode_response_wraps_choice_text_in_an_output_text_part() {
		let resp = LlmResponse {
			id: "resp_1".to_string(),
			model: "gpt-4o".into(),
			created: 1234,
			choices: vec![Choice {
				index: 0,
				message: Message::assistant("hi there"),
				finish_reason: FinishReason::Stop,
			}],
			usage: Some(Usage { prompt_tokens: 5, completion_tokens: 2, ..Default::default() }),
		};
		let wire = encode_response(&resp);
		assert_eq!(wire.output[0].content[0].text, "hi there");
		assert_eq!(wire.usage.unwrap().input_tokens, 5);
	}
}
