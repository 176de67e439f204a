//! The format-agnostic request/response model every transformer converts to
//! and from. See `spec.md` §3.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::util::Strng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	System,
	Developer,
	User,
	Assistant,
	Tool,
}

/// A message's content is either a single text blob or an ordered list of
/// typed parts, mirroring the two shapes `types::messages::RequestContent`
/// takes in the teacher and that nearly every vendor format allows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
	Text(String),
	Parts(Vec<ContentPart>),
}

impl Content {
	pub fn text(s: impl Into<String>) -> Self {
		Content::Text(s.into())
	}

	/// Flattens to a single string the way the teacher's Anthropic->OpenAI
	/// translation joins multiple text blocks with `\n` (see
	/// `conversion::completions::from_messages`).
	pub fn as_flat_text(&self) -> String {
		match self {
			Content::Text(t) => t.clone(),
			Content::Parts(parts) => parts
				.iter()
				.filter_map(|p| match p {
					ContentPart::Text { text } => Some(text.as_str()),
					_ => None,
				})
				.collect::<Vec<_>>()
				.join("\n"),
		}
	}

	pub fn is_empty(&self) -> bool {
		match self {
			Content::Text(t) => t.is_empty(),
			Content::Parts(p) => p.is_empty(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
	Text { text: String },
	ImageUrl { url: String },
	Audio { data: String, format: String },
	ToolUse { id: String, name: String, input: serde_json::Value },
	ToolResult { tool_use_id: String, content: String, is_error: bool },
	Reasoning { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
	pub role: Role,
	pub content: Content,
}

impl Message {
	pub fn user(text: impl Into<String>) -> Self {
		Message { role: Role::User, content: Content::text(text) }
	}

	pub fn assistant(text: impl Into<String>) -> Self {
		Message { role: Role::Assistant, content: Content::text(text) }
	}

	pub fn system(text: impl Into<String>) -> Self {
		Message { role: Role::System, content: Content::text(text) }
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
	Auto,
	None,
	Required,
	ByName(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingOptions {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_output_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Vec::is_empty", default)]
	pub stop: Vec<String>,
	// [FULL] supplemented beyond the distilled spec's list, grounded on
	// llm::LLMRequestParams in the teacher.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub frequency_penalty: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub presence_penalty: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub seed: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parallel_tool_calls: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamOptions {
	#[serde(default)]
	pub include_usage: bool,
}

/// The canonical, format-agnostic request every inbound transformer decodes
/// into and every outbound transformer encodes from.
#[derive(Debug, Clone)]
pub struct LlmRequest {
	pub model: Strng,
	pub messages: Vec<Message>,
	pub tools: Vec<ToolDefinition>,
	pub tool_choice: Option<ToolChoice>,
	pub sampling: SamplingOptions,
	pub stream: bool,
	pub stream_options: Option<StreamOptions>,
	pub transformer_metadata: HashMap<String, serde_json::Value>,
	/// Preserves the original inbound HTTP request for cross-format header
	/// propagation (trace/thread ids, auth passthrough). Opaque to
	/// middleware/transformers that don't need it.
	pub raw_request: Option<RawRequestRef>,
}

/// Opaque handle to the original inbound `http::Request` parts, cheap to
/// clone since it's reference-counted, never re-parsed by transformers.
#[derive(Debug, Clone)]
pub struct RawRequestRef(std::sync::Arc<http::request::Parts>);

impl RawRequestRef {
	pub fn new(parts: http::request::Parts) -> Self {
		RawRequestRef(std::sync::Arc::new(parts))
	}

	pub fn parts(&self) -> &http::request::Parts {
		&self.0
	}
}

impl LlmRequest {
	pub fn new(model: impl Into<Strng>, messages: Vec<Message>) -> Self {
		LlmRequest {
			model: model.into(),
			messages,
			tools: Vec::new(),
			tool_choice: None,
			sampling: SamplingOptions::default(),
			stream: false,
			stream_options: None,
			transformer_metadata: HashMap::new(),
			raw_request: None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
	Stop,
	Length,
	ToolUse,
	ContentFilter,
	Error,
	Canceled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cached_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub audio_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reasoning_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub prediction_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Choice {
	pub index: u32,
	pub message: Message,
	pub finish_reason: FinishReason,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
	pub id: String,
	pub model: Strng,
	pub created: i64,
	pub choices: Vec<Choice>,
	pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flat_text_joins_text_parts_and_skips_others() {
		let content = Content::Parts(vec![
			ContentPart::Text { text: "hello".into() },
			ContentPart::ToolUse { id: "1".into(), name: "f".into(), input: serde_json::json!({}) },
			ContentPart::Text { text: "world".into() },
		]);
		assert_eq!(content.as_flat_text(), "hello\nworld");
	}
}
