//! The transport boundary: turns an encoded `http_types::Request` into a
//! `http_types::Response`, unary or streaming. Grounded on the teacher's
//! `client::Client` (a thin `hyper_util`-based sender used throughout
//! `llm/policy/mod.rs`); here the transport is `reqwest` instead, since the
//! teacher's client is entangled with HBONE/mesh transport concerns this
//! crate's spec puts out of scope (§9 "HTTP client strategy").
//!
//! `Executor` is the extension point `Outbound::customize_executor` wraps
//! (§4.1, §4.3): `CodexExecutor` (see `crate::codex`) decorates a base
//! executor to fake a unary response out of an SSE-only upstream.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{AxonError, Result};
use crate::http_types::{Body, Response};

/// Transport-level knobs a pipeline attempt can tune per call (§4.3): the
/// per-attempt timeout and whether the caller wants the body streamed back
/// lazily or buffered.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
	pub timeout: Duration,
}

impl Default for ExecutorOptions {
	fn default() -> Self {
		ExecutorOptions { timeout: Duration::from_secs(120) }
	}
}

#[async_trait]
pub trait Executor: Send + Sync {
	async fn execute(
		&self,
		req: crate::http_types::Request,
		opts: &ExecutorOptions,
	) -> Result<Response>;
}

/// The default executor: one `reqwest::Client` shared across calls, reused
/// for connection pooling the way the teacher reuses one `hyper_util`
/// client rather than building a fresh one per request.
pub struct ReqwestExecutor {
	client: reqwest::Client,
}

impl ReqwestExecutor {
	pub fn new() -> Self {
		ReqwestExecutor { client: reqwest::Client::new() }
	}
}

impl Default for ReqwestExecutor {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Executor for ReqwestExecutor {
	async fn execute(
		&self,
		req: crate::http_types::Request,
		opts: &ExecutorOptions,
	) -> Result<Response> {
		let (parts, body) = req.into_parts();
		let body_bytes = body
			.collect()
			.await
			.map_err(|e| AxonError::Transformer(format!("encoding request body: {e}")))?;

		let url = parts.uri.to_string();
		let method =
			reqwest::Method::from_bytes(parts.method.as_str().as_bytes()).unwrap_or(reqwest::Method::POST);
		let mut builder = self.client.request(method, &url).timeout(opts.timeout).body(body_bytes.to_vec());
		for (name, value) in parts.headers.iter() {
			builder = builder.header(name.as_str(), value.as_bytes());
		}

		let resp = builder
			.send()
			.await
			.map_err(|e| AxonError::RetryableUpstream { status: None, message: e.to_string() })?;

		let status = http::StatusCode::from_u16(resp.status().as_u16())
			.map_err(|e| AxonError::Transformer(e.to_string()))?;
		let mut response_builder = http::Response::builder().status(status);
		for (name, value) in resp.headers().iter() {
			response_builder = response_builder.header(name.as_str(), value.as_bytes());
		}

		let content_type =
			resp.headers().get(reqwest::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
		if content_type.contains("text/event-stream") {
			let stream = resp.bytes_stream();
			use futures_util::StreamExt;
			let mapped = stream.map(|r| r.map_err(|e| anyhow::anyhow!(e)));
			let body = Body::streaming(Box::pin(mapped));
			response_builder.body(body).map_err(|e| AxonError::Transformer(e.to_string()))
		} else {
			let bytes = resp
				.bytes()
				.await
				.map_err(|e| AxonError::RetryableUpstream { status: None, message: e.to_string() })?;
			response_builder.body(Body::Full(bytes)).map_err(|e| AxonError::Transformer(e.to_string()))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn get_against_httpbin_like_echo_server_times_out_quickly_when_unreachable() {
		let exec = ReqwestExecutor::new();
		let req = http::Request::builder()
			.method(http::Method::GET)
			.uri("http://127.0.0.1:1/unreachable")
			.body(Body::empty())
			.unwrap();
		let opts = ExecutorOptions { timeout: Duration::from_millis(200) };
		let result = exec.execute(req, &opts).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn buffers_a_successful_json_response_and_preserves_its_status() {
		use wiremock::matchers::{method, path};
		use wiremock::{Mock, MockServer, ResponseTemplate};

		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/chat/completions"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "resp_1"})))
			.mount(&server)
			.await;

		let exec = ReqwestExecutor::new();
		let req = http::Request::builder()
			.method(http::Method::POST)
			.uri(format!("{}/v1/chat/completions", server.uri()))
			.body(Body::from_bytes("{}"))
			.unwrap();
		let resp = exec.execute(req, &ExecutorOptions::default()).await.unwrap();
		assert_eq!(resp.status(), http::StatusCode::OK);
		let (_, body) = resp.into_parts();
		let bytes = body.collect().await.unwrap();
		assert_eq!(bytes.as_ref(), br#"{"id":"resp_1"}"#);
	}
}
