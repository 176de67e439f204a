//! SSE wire encode/decode helpers shared by the outbound transformers (to
//! parse what a provider sent) and inbound transformers (to re-emit the
//! client's expected framing). Decoding uses `tokio_sse_codec` over a
//! `tokio_util::io::StreamReader` adapter, matching the teacher's SSE/event
//! stream decoding style in `parse::aws_sse` (itself a `Decoder` fed through a
//! small transform pipeline) generalized from AWS's binary framing to text
//! SSE.

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use std::pin::Pin;
use tokio_sse_codec::{Frame, SseDecoder};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use crate::error::AxonError;
use crate::http_types::Body;
use crate::stream::{BoxEventStream, StreamEvent};

/// Decodes an SSE `Body` into a stream of `StreamEvent`s. Comments and
/// `retry:` frames are dropped; only `event:`/`data:` frames are surfaced,
/// matching what every transformer in this crate actually consumes.
pub fn decode_sse_body(body: Body) -> BoxEventStream {
	let byte_stream: Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>> = match body {
		Body::Full(b) => Box::pin(futures_util::stream::once(async move { Ok(b) })),
		Body::Streaming(s) => Box::pin(futures_util::StreamExt::map(s, |r| {
			r.map_err(std::io::Error::other)
		})),
	};
	let reader = StreamReader::new(byte_stream);
	let framed = FramedRead::new(reader, SseDecoder::<String>::new());

	Box::pin(async_stream::stream! {
		futures_util::pin_mut!(framed);
		use futures_util::StreamExt;
		while let Some(next) = framed.next().await {
			match next {
				Ok(Frame::Event(ev)) => {
					yield Ok(StreamEvent {
						event_type: if ev.name == "message" { String::new() } else { ev.name.to_string() },
						last_event_id: ev.id.map(|i| i.to_string()).unwrap_or_default(),
						data: Bytes::from(ev.data.into_bytes()),
					});
				}
				Ok(Frame::Comment(_)) | Ok(Frame::Retry(_)) => continue,
				Err(e) => {
					yield Err(AxonError::Transformer(format!("sse decode: {e}")));
					break;
				}
			}
		}
	})
}

/// Encodes a single event into standard SSE wire bytes: an optional
/// `event:` line, one `data:` line per `\n`-split chunk of the payload, and a
/// blank-line terminator.
pub fn encode_frame(ev: &StreamEvent) -> Bytes {
	encode_frame_inner(ev, false)
}

/// Gemini's SSE variant requires a leading space byte before each `data:`
/// payload (§4.1, §6).
pub fn encode_gemini_frame(ev: &StreamEvent) -> Bytes {
	encode_frame_inner(ev, true)
}

fn encode_frame_inner(ev: &StreamEvent, gemini_space_prefix: bool) -> Bytes {
	let mut out = BytesMut::new();
	if !ev.event_type.is_empty() {
		out.extend_from_slice(b"event: ");
		out.extend_from_slice(ev.event_type.as_bytes());
		out.extend_from_slice(b"\n");
	}
	if !ev.last_event_id.is_empty() {
		out.extend_from_slice(b"id: ");
		out.extend_from_slice(ev.last_event_id.as_bytes());
		out.extend_from_slice(b"\n");
	}
	for line in ev.data.split(|b| *b == b'\n') {
		out.extend_from_slice(b"data:");
		if gemini_space_prefix {
			out.extend_from_slice(b" ");
		}
		out.extend_from_slice(line);
		out.extend_from_slice(b"\n");
	}
	out.extend_from_slice(b"\n");
	out.freeze()
}

/// Encodes `[DONE]` the way OpenAI chat completions terminates its stream
/// (the terminal sentinel, §5).
pub fn done_event() -> StreamEvent {
	StreamEvent::data_only(Bytes::from_static(b"[DONE]"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures_util::StreamExt;

	#[tokio::test]
	async fn decodes_basic_frames() {
		let raw = "event: message_start\ndata: {\"a\":1}\n\nevent: message_stop\ndata: {}\n\n";
		let body = Body::from_bytes(Bytes::from_static(raw.as_bytes()));
		let mut s = decode_sse_body(body);
		let first = s.next().await.unwrap().unwrap();
		assert_eq!(first.event_type, "message_start");
		assert_eq!(&first.data[..], b"{\"a\":1}");
		let second = s.next().await.unwrap().unwrap();
		assert_eq!(second.event_type, "message_stop");
		assert!(s.next().await.is_none());
	}

	#[test]
	fn gemini_frame_has_space_after_data_colon() {
		let ev = StreamEvent::data_only(Bytes::from_static(b"{\"x\":1}"));
		let bytes = encode_gemini_frame(&ev);
		assert!(bytes.starts_with(b"data: {"));
	}

	#[test]
	fn plain_frame_has_no_space_after_data_colon() {
		let ev = StreamEvent::data_only(Bytes::from_static(b"{\"x\":1}"));
		let bytes = encode_frame(&ev);
		assert!(bytes.starts_with(b"data:{"));
	}
}
