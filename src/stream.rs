//! Stream primitives: the `StreamEvent` SSE frame and the lazy, finite,
//! single-pass iterator protocol transformers and the executor communicate
//! through (§3, §4.1).

use bytes::Bytes;
use std::pin::Pin;

use crate::error::AxonError;

/// An SSE frame passed opaquely between transformer stages. `event_type` is
/// the SSE `event:` field (empty string if absent); `data` is the raw bytes
/// of the `data:` field(s), newline-joined per the SSE spec.
#[derive(Debug, Clone)]
pub struct StreamEvent {
	pub event_type: String,
	pub last_event_id: String,
	pub data: Bytes,
}

impl StreamEvent {
	pub fn new(event_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
		StreamEvent { event_type: event_type.into(), last_event_id: String::new(), data: data.into() }
	}

	pub fn data_only(data: impl Into<Bytes>) -> Self {
		Self::new(String::new(), data)
	}
}

/// The three-method protocol a streaming consumer drives: `advance` pulls the
/// next item (or signals EOF/error), `current` reads the item just pulled,
/// `err` distinguishes a clean EOF from a terminal failure. `close` releases
/// the underlying connection on every exit path (§3 "Stream iterators own
/// their underlying connection").
///
/// This mirrors the teacher's `ResponseType`/`RequestType` "typed accessor"
/// style (`llm/types/mod.rs`) generalized to streaming: a small, explicit
/// trait object instead of relying on a blanket `Stream` adapter, so
/// `close()` is a first-class, always-callable step rather than something
/// that only happens on `Drop`.
#[async_trait::async_trait]
pub trait StreamIter: Send {
	type Item: Send;

	/// Pulls the next item. Returns `false` on EOF or error; callers must then
	/// check `err()` to distinguish the two.
	async fn advance(&mut self) -> bool;

	/// The item produced by the most recent `advance() == true` call.
	fn current(&self) -> &Self::Item;

	/// `Some` only once `advance()` has returned `false` due to a terminal
	/// error; `None` after a clean EOF.
	fn err(&self) -> Option<&AxonError>;

	/// Releases the underlying connection. Must be safe to call multiple
	/// times and on every exit path (error, EOF, cancellation).
	async fn close(&mut self);
}

pub type BoxEventStream =
	Pin<Box<dyn futures_core::Stream<Item = Result<StreamEvent, AxonError>> + Send>>;

/// Adapts a boxed `futures` stream (the shape produced by `async_stream::stream!`
/// blocks throughout this crate) into the `StreamIter` protocol, so transformer
/// code can use whichever is more convenient to produce while pipeline code
/// consumes the one explicit protocol.
pub struct BoxStreamIter {
	inner: BoxEventStream,
	current: Option<StreamEvent>,
	err: Option<AxonError>,
	closed: bool,
}

impl BoxStreamIter {
	pub fn new(inner: BoxEventStream) -> Self {
		BoxStreamIter { inner, current: None, err: None, closed: false }
	}
}

#[async_trait::async_trait]
impl StreamIter for BoxStreamIter {
	type Item = StreamEvent;

	async fn advance(&mut self) -> bool {
		if self.closed {
			return false;
		}
		use futures_util::StreamExt;
		match self.inner.next().await {
			Some(Ok(ev)) => {
				self.current = Some(ev);
				true
			},
			Some(Err(e)) => {
				self.err = Some(e);
				self.current = None;
				false
			},
			None => {
				self.current = None;
				false
			},
		}
	}

	fn current(&self) -> &StreamEvent {
		self.current.as_ref().expect("current() called without a preceding successful advance()")
	}

	fn err(&self) -> Option<&AxonError> {
		self.err.as_ref()
	}

	async fn close(&mut self) {
		self.closed = true;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures_util::stream;

	#[tokio::test]
	async fn never_emits_after_close() {
		let events = stream::iter(vec![
			Ok(StreamEvent::data_only(Bytes::from_static(b"a"))),
			Ok(StreamEvent::data_only(Bytes::from_static(b"b"))),
		]);
		let mut it = BoxStreamIter::new(Box::pin(events));
		assert!(it.advance().await);
		assert_eq!(it.current().data, Bytes::from_static(b"a"));
		it.close().await;
		assert!(!it.advance().await, "advance() after close() must not yield another item");
	}

	#[tokio::test]
	async fn terminal_error_is_distinguishable_from_eof() {
		let events = stream::iter(vec![Err(AxonError::Transformer("boom".into()))]);
		let mut it = BoxStreamIter::new(Box::pin(events));
		assert!(!it.advance().await);
		assert!(it.err().is_some());
	}

	#[tokio::test]
	async fn clean_eof_has_no_error() {
		let events: Vec<Result<StreamEvent, AxonError>> = vec![];
		let mut it = BoxStreamIter::new(Box::pin(stream::iter(events)));
		assert!(!it.advance().await);
		assert!(it.err().is_none());
	}
}
