//! Minimal HTTP request/response/body types the pipeline operates on.
//!
//! The teacher (`agentgateway`) defines `crate::http::{Body, Request,
//! Response}` as thin wrappers it threads everywhere instead of binding
//! directly to a web framework's types (see `llm/mod.rs`'s
//! `use crate::http::{Body, Request, Response}`). Binding an actual server
//! (gin/axum) is out of scope here, so this module plays the same role: a
//! framework-agnostic `Body` that is either fully buffered or a lazy byte
//! stream, and `Request`/`Response` type aliases over it.

use bytes::Bytes;
use futures_core::Stream;
use std::pin::Pin;

pub type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes, anyhow::Error>> + Send>>;

pub enum Body {
	Full(Bytes),
	Streaming(BoxStream),
}

impl Body {
	pub fn empty() -> Self {
		Body::Full(Bytes::new())
	}

	pub fn from_bytes(b: impl Into<Bytes>) -> Self {
		Body::Full(b.into())
	}

	pub fn from_json(v: &impl serde::Serialize) -> Result<Self, serde_json::Error> {
		Ok(Body::Full(serde_json::to_vec(v)?.into()))
	}

	pub fn streaming(s: BoxStream) -> Self {
		Body::Streaming(s)
	}

	/// Buffers a streaming body fully. Only used by the aggregation path and
	/// by tests; the live pipeline never does this on the hot path (§5,
	/// "never buffers a whole stream").
	pub async fn collect(self) -> Result<Bytes, anyhow::Error> {
		use futures_util::StreamExt;
		match self {
			Body::Full(b) => Ok(b),
			Body::Streaming(mut s) => {
				let mut buf = Vec::new();
				while let Some(chunk) = s.next().await {
					buf.extend_from_slice(&chunk?);
				}
				Ok(buf.into())
			},
		}
	}
}

impl std::fmt::Debug for Body {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Body::Full(b) => write!(f, "Body::Full({} bytes)", b.len()),
			Body::Streaming(_) => write!(f, "Body::Streaming(..)"),
		}
	}
}

pub type Request = http::Request<Body>;
pub type Response = http::Response<Body>;

pub fn json_response(status: http::StatusCode, v: &impl serde::Serialize) -> Response {
	let body = Body::from_json(v).unwrap_or_else(|_| Body::from_bytes("{}"));
	http::Response::builder()
		.status(status)
		.header(http::header::CONTENT_TYPE, "application/json")
		.body(body)
		.expect("static response must build")
}
