//! Jina Rerank and Jina/OpenAI-compatible Embeddings (§6: `POST /rerank`,
//! `POST /v1/embeddings`). Neither shape is a chat completion — there are no
//! messages, no streaming, no tool calls — so unlike the other transformers
//! in this module these two are not `Inbound` implementations over the
//! chat-shaped `LlmRequest`/`LlmResponse`; they're a parallel pair of
//! encode/decode functions over their own request/response types, the same
//! way the teacher keeps embeddings as its own `llm::types::embeddings`
//! module (`Request{model,input,user,encoding_format,dimensions}` /
//! `Response{object,model,data,usage}`) rather than forcing it through
//! `RequestType`/`ResponseType`.

use serde::{Deserialize, Serialize};

use crate::error::{AxonError, Result};

// ---- Rerank --------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankRequest {
	pub model: String,
	pub query: String,
	pub documents: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub top_n: Option<usize>,
	#[serde(default)]
	pub return_documents: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResult {
	pub index: usize,
	pub relevance_score: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub document: Option<RerankDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankDocument {
	pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RerankUsage {
	pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResponse {
	pub model: String,
	pub results: Vec<RerankResult>,
	pub usage: RerankUsage,
}

pub fn decode_rerank_request(body: &[u8]) -> Result<RerankRequest> {
	serde_json::from_slice(body).map_err(|e| AxonError::Transformer(format!("decoding rerank request: {e}")))
}

pub fn parse_rerank_request(req: &RerankRequest) -> Result<()> {
	if req.query.is_empty() {
		return Err(AxonError::InvalidRequest("rerank query must not be empty".to_string()));
	}
	if req.documents.is_empty() {
		return Err(AxonError::InvalidRequest("rerank documents must not be empty".to_string()));
	}
	Ok(())
}

/// Orders `scores` (one per `req.documents`, by index) into the wire
/// response shape, truncating to `top_n` and echoing the source text only
/// when `return_documents` was requested.
pub fn encode_rerank_response(req: &RerankRequest, scores: &[f64], usage: RerankUsage) -> RerankResponse {
	let mut results: Vec<RerankResult> = scores
		.iter()
		.enumerate()
		.map(|(index, &relevance_score)| RerankResult {
			index,
			relevance_score,
			document: req.return_documents.then(|| RerankDocument { text: req.documents[index].clone() }),
		})
		.collect();
	results.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(std::cmp::Ordering::Equal));
	if let Some(top_n) = req.top_n {
		results.truncate(top_n);
	}
	RerankResponse { model: req.model.clone(), results, usage }
}

// ---- Embeddings -----------------------------------------------------------

/// `input` accepts either a single string or a batch, same untagged shape
/// the teacher's `embeddings::typed::EmbeddingInput` models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
	One(String),
	Many(Vec<String>),
}

impl EmbeddingInput {
	pub fn as_strings(&self) -> Vec<&str> {
		match self {
			EmbeddingInput::One(s) => vec![s.as_str()],
			EmbeddingInput::Many(items) => items.iter().map(|s| s.as_str()).collect(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingFormat {
	Float,
	Base64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
	pub model: String,
	pub input: EmbeddingInput,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub encoding_format: Option<EncodingFormat>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dimensions: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
	pub index: usize,
	pub object: String,
	pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbedUsage {
	pub prompt_tokens: u64,
	pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
	pub object: String,
	pub model: String,
	pub data: Vec<Embedding>,
	pub usage: EmbedUsage,
}

pub fn decode_embed_request(body: &[u8]) -> Result<EmbedRequest> {
	serde_json::from_slice(body).map_err(|e| AxonError::Transformer(format!("decoding embed request: {e}")))
}

/// `vectors` must be in the same order as `req.input.as_strings()`.
pub fn encode_embed_response(req: &EmbedRequest, vectors: Vec<Vec<f32>>, usage: EmbedUsage) -> EmbedResponse {
	let data = vectors
		.into_iter()
		.enumerate()
		.map(|(index, embedding)| Embedding { index, object: "embedding".to_string(), embedding })
		.collect();
	EmbedResponse { object: "list".to_string(), model: req.model.clone(), data, usage }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rerank_response_is_sorted_by_score_descending_and_respects_top_n() {
		let req = RerankRequest {
			model: "jina-reranker-v2".to_string(),
			query: "capital of France".to_string(),
			documents: vec!["Paris is the capital of France".to_string(), "Berlin is in Germany".to_string()],
			top_n: Some(1),
			return_documents: true,
		};
		let resp = encode_rerank_response(&req, &[0.1, 0.9], RerankUsage { total_tokens: 12 });
		assert_eq!(resp.results.len(), 1);
		assert_eq!(resp.results[0].index, 1);
		assert_eq!(resp.results[0].document.as_ref().unwrap().text, "Berlin is in Germany");
	}

	#[test]
	fn rerank_rejects_empty_documents() {
		let req = RerankRequest {
			model: "m".to_string(),
			query: "q".to_string(),
			documents: vec![],
			top_n: None,
			return_documents: false,
		};
		assert!(parse_rerank_request(&req).is_err());
	}

	#[test]
	fn embed_input_accepts_both_a_single_string_and_a_batch() {
		let single: EmbedRequest = serde_json::from_str(r#"{"model":"m","input":"hello"}"#).unwrap();
		assert_eq!(single.input.as_strings(), vec!["hello"]);

		let batch: EmbedRequest = serde_json::from_str(r#"{"model":"m","input":["a","b"]}"#).unwrap();
		assert_eq!(batch.input.as_strings(), vec!["a", "b"]);
	}

	#[test]
	fn embed_response_indexes_vectors_in_input_order() {
		let req = EmbedRequest {
			model: "m".to_string(),
			input: EmbeddingInput::Many(vec!["a".to_string(), "b".to_string()]),
			encoding_format: None,
			dimensions: None,
		};
		let resp = encode_embed_response(&req, vec![vec![0.1, 0.2], vec![0.3, 0.4]], EmbedUsage::default());
		assert_eq!(resp.data[0].index, 0);
		assert_eq!(resp.data[1].embedding, vec![0.3, 0.4]);
	}
}
