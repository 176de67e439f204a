//! The onion-model middleware chain (§4.2). Every hook is optional (default
//! no-op); a failure short-circuits the remaining hooks **and** the rest of
//! the pipeline attempt. Error hooks are notification-only and run on every
//! failure path.
//!
//! Grounded on the teacher's layered `tower`-less hook points in
//! `llm/policy/mod.rs`, generalized from the teacher's fixed pre/post pair
//! into the seven named phases the spec calls out; forward hooks run in
//! registration order, reverse hooks run in the opposite order (the "onion").

use async_trait::async_trait;

use crate::canonical::{LlmRequest, LlmResponse};
use crate::error::{AxonError, Result};
use crate::http_types::{Request, Response};
use crate::stream::BoxEventStream;

/// Per-request context threaded through every hook. `trace_id`/`thread_id`
/// come from the `AH-Trace-Id`/`AH-Thread-Id` headers (§6) when present.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
	pub trace_id: Option<String>,
	pub thread_id: Option<String>,
}

#[async_trait]
pub trait Middleware: Send + Sync {
	/// forward — after decode, before outbound encode.
	async fn on_inbound_llm_request(
		&self,
		req: LlmRequest,
		_ctx: &RequestContext,
	) -> Result<LlmRequest> {
		Ok(req)
	}

	/// forward — after encode, before network.
	async fn on_outbound_raw_request(&self, req: Request, _ctx: &RequestContext) -> Result<Request> {
		Ok(req)
	}

	/// reverse — network/HTTP failure before response transform. Hooks here
	/// have no return value; they observe and must not alter pipeline flow.
	async fn on_outbound_raw_error(&self, _err: &AxonError, _ctx: &RequestContext) {}

	/// reverse — non-stream, after network, before response decode.
	async fn on_outbound_raw_response(
		&self,
		resp: Response,
		_ctx: &RequestContext,
	) -> Result<Response> {
		Ok(resp)
	}

	/// reverse — non-stream, after response decode.
	async fn on_outbound_llm_response(
		&self,
		resp: LlmResponse,
		_ctx: &RequestContext,
	) -> Result<LlmResponse> {
		Ok(resp)
	}

	/// reverse — stream, after network, before stream decode.
	async fn on_outbound_raw_stream(
		&self,
		stream: BoxEventStream,
		_ctx: &RequestContext,
	) -> Result<BoxEventStream> {
		Ok(stream)
	}

	/// reverse — stream, after stream decode.
	async fn on_outbound_llm_stream(
		&self,
		stream: BoxEventStream,
		_ctx: &RequestContext,
	) -> Result<BoxEventStream> {
		Ok(stream)
	}

	/// forward — non-stream, after final inbound encode, before send.
	async fn on_inbound_raw_response(
		&self,
		resp: Response,
		_ctx: &RequestContext,
	) -> Result<Response> {
		Ok(resp)
	}
}

/// An ordered list of middlewares. Forward hooks run front-to-back;
/// response/stream/error hooks run back-to-front (§4.2 "onion model").
#[derive(Default)]
pub struct MiddlewareChain {
	middlewares: Vec<std::sync::Arc<dyn Middleware>>,
}

impl MiddlewareChain {
	pub fn new() -> Self {
		MiddlewareChain { middlewares: Vec::new() }
	}

	pub fn push(&mut self, mw: std::sync::Arc<dyn Middleware>) {
		self.middlewares.push(mw);
	}

	pub async fn run_inbound_llm_request(
		&self,
		mut req: LlmRequest,
		ctx: &RequestContext,
	) -> Result<LlmRequest> {
		for mw in self.middlewares.iter() {
			req = mw.on_inbound_llm_request(req, ctx).await?;
		}
		Ok(req)
	}

	pub async fn run_outbound_raw_request(
		&self,
		mut req: Request,
		ctx: &RequestContext,
	) -> Result<Request> {
		for mw in self.middlewares.iter() {
			req = mw.on_outbound_raw_request(req, ctx).await?;
		}
		Ok(req)
	}

	pub async fn run_outbound_raw_error(&self, err: &AxonError, ctx: &RequestContext) {
		for mw in self.middlewares.iter().rev() {
			mw.on_outbound_raw_error(err, ctx).await;
		}
	}

	pub async fn run_outbound_raw_response(
		&self,
		mut resp: Response,
		ctx: &RequestContext,
	) -> Result<Response> {
		for mw in self.middlewares.iter().rev() {
			resp = mw.on_outbound_raw_response(resp, ctx).await?;
		}
		Ok(resp)
	}

	pub async fn run_outbound_llm_response(
		&self,
		mut resp: LlmResponse,
		ctx: &RequestContext,
	) -> Result<LlmResponse> {
		for mw in self.middlewares.iter().rev() {
			resp = mw.on_outbound_llm_response(resp, ctx).await?;
		}
		Ok(resp)
	}

	pub async fn run_outbound_raw_stream(
		&self,
		mut stream: BoxEventStream,
		ctx: &RequestContext,
	) -> Result<BoxEventStream> {
		for mw in self.middlewares.iter().rev() {
			stream = mw.on_outbound_raw_stream(stream, ctx).await?;
		}
		Ok(stream)
	}

	pub async fn run_outbound_llm_stream(
		&self,
		mut stream: BoxEventStream,
		ctx: &RequestContext,
	) -> Result<BoxEventStream> {
		for mw in self.middlewares.iter().rev() {
			stream = mw.on_outbound_llm_stream(stream, ctx).await?;
		}
		Ok(stream)
	}

	pub async fn run_inbound_raw_response(
		&self,
		mut resp: Response,
		ctx: &RequestContext,
	) -> Result<Response> {
		for mw in self.middlewares.iter() {
			resp = mw.on_inbound_raw_response(resp, ctx).await?;
		}
		Ok(resp)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	struct Recorder {
		id: usize,
		order: Arc<std::sync::Mutex<Vec<usize>>>,
	}

	#[async_trait]
	impl Middleware for Recorder {
		async fn on_inbound_llm_request(
			&self,
			req: LlmRequest,
			_ctx: &RequestContext,
		) -> Result<LlmRequest> {
			self.order.lock().unwrap().push(self.id);
			Ok(req)
		}

		async fn on_outbound_llm_response(
			&self,
			resp: LlmResponse,
			_ctx: &RequestContext,
		) -> Result<LlmResponse> {
			self.order.lock().unwrap().push(self.id);
			Ok(resp)
		}
	}

	#[tokio::test]
	async fn forward_hooks_run_in_registration_order_reverse_hooks_run_backwards() {
		let order = Arc::new(std::sync::Mutex::new(Vec::new()));
		let mut chain = MiddlewareChain::new();
		chain.push(Arc::new(Recorder { id: 1, order: order.clone() }));
		chain.push(Arc::new(Recorder { id: 2, order: order.clone() }));
		chain.push(Arc::new(Recorder { id: 3, order: order.clone() }));

		let ctx = RequestContext::default();
		let req = crate::canonical::LlmRequest::new("m", vec![]);
		chain.run_inbound_llm_request(req, &ctx).await.unwrap();
		assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);

		order.lock().unwrap().clear();
		let resp = crate::canonical::LlmResponse {
			id: "1".into(),
			model: "m".into(),
			created: 0,
			choices: vec![],
			usage: None,
		};
		chain.run_outbound_llm_response(resp, &ctx).await.unwrap();
		assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
	}

	#[tokio::test]
	async fn a_failing_hook_short_circuits_the_remaining_chain() {
		struct Failing;
		#[async_trait]
		impl Middleware for Failing {
			async fn on_inbound_llm_request(
				&self,
				_req: LlmRequest,
				_ctx: &RequestContext,
			) -> Result<LlmRequest> {
				Err(AxonError::InvalidRequest("nope".into()))
			}
		}
		let order = Arc::new(std::sync::Mutex::new(Vec::new()));
		let mut chain = MiddlewareChain::new();
		chain.push(Arc::new(Failing));
		chain.push(Arc::new(Recorder { id: 99, order: order.clone() }));
		let ctx = RequestContext::default();
		let req = crate::canonical::LlmRequest::new("m", vec![]);
		let result = chain.run_inbound_llm_request(req, &ctx).await;
		assert!(result.is_err());
		assert!(order.lock().unwrap().is_empty(), "later middleware must not run after a failure");
	}
}
