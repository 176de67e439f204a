//! Channel selection & model mapping (§4.4): the outbound transformer that
//! wraps per-provider outbounds behind an ordered, filterable candidate
//! list and implements the pipeline's `Retryable`/`ChannelRetryable`
//! capabilities for cross-channel failover.

pub mod model_map;
pub mod pricing;
pub mod profile;

use std::sync::Arc;

use async_trait::async_trait;

use crate::canonical::LlmRequest;
use crate::error::{AxonError, Result};
use crate::http_types::{Request, Response};
use crate::pipeline::executor::Executor;
use crate::pipeline::retry::{ChannelRetryable, Retryable};
use crate::stream::BoxEventStream;
use crate::transformer::Outbound;
use crate::util::Strng;
use model_map::ModelMap;
use profile::ApiKeyProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPolicy {
	Allow,
	Require,
	Forbid,
}

impl Default for StreamPolicy {
	fn default() -> Self {
		StreamPolicy::Allow
	}
}

/// One configured backend. The `supported_models` filter and per-channel
/// remapping fields (`extra_model_prefix`, `auto_trimmed_prefixes`,
/// `model_mappings`) all apply in sequence before a channel is kept as a
/// candidate (§4.4 step 2).
#[derive(Debug, Clone)]
pub struct Channel {
	pub id: Strng,
	pub name: Strng,
	pub provider: Strng,
	pub enabled: bool,
	pub tags: Vec<Strng>,
	pub ordering_weight: i64,
	pub supported_models: Vec<Strng>,
	pub extra_model_prefix: Option<Strng>,
	pub auto_trimmed_prefixes: Vec<Strng>,
	pub model_mappings: ModelMap,
	pub stream_policy: StreamPolicy,
}

impl Channel {
	/// Applies this channel's prefix stripping and aliasing to `model`,
	/// returning the resolved name only if the channel actually serves it.
	fn resolve_for(&self, model: &str) -> Option<String> {
		let mut candidate = model.to_string();
		if let Some(prefix) = &self.extra_model_prefix {
			let want = format!("{prefix}/");
			if let Some(stripped) = candidate.strip_prefix(want.as_str()) {
				candidate = stripped.to_string();
			}
		}
		for prefix in &self.auto_trimmed_prefixes {
			let want = format!("{prefix}/");
			if let Some(stripped) = candidate.strip_prefix(want.as_str()) {
				candidate = stripped.to_string();
				break;
			}
		}
		candidate = self.model_mappings.resolve(&candidate);
		if self.supported_models.iter().any(|m| m.as_str() == candidate) {
			Some(candidate)
		} else {
			None
		}
	}

	fn allows_stream(&self, stream: bool) -> bool {
		match (self.stream_policy, stream) {
			(StreamPolicy::Forbid, true) => false,
			(StreamPolicy::Require, false) => false,
			_ => true,
		}
	}
}

/// Resolves the incoming model name through the API key's active profile
/// (§4.4 step 1). Returns the input unchanged if there is no profile or no
/// matching rule (§8 invariant 3).
pub fn apply_profile_model_map(profile: Option<&ApiKeyProfile>, model: &str) -> String {
	match profile {
		Some(p) => p.model_map.resolve(model),
		None => model.to_string(),
	}
}

/// Builds the sorted, filtered candidate list for one resolved model
/// (§4.4 steps 2-3): profile restriction, per-channel remap/filter, stream
/// policy, then sort by `ordering_weight` ascending and name.
pub fn select_candidates(
	channels: &[Channel],
	profile: Option<&ApiKeyProfile>,
	resolved_model: &str,
	stream: bool,
) -> Vec<(Channel, String)> {
	let mut candidates: Vec<(Channel, String)> = channels
		.iter()
		.filter(|c| c.enabled)
		.filter(|c| profile_allows_channel(profile, c))
		.filter_map(|c| c.resolve_for(resolved_model).map(|m| (c.clone(), m)))
		.filter(|(c, _)| c.allows_stream(stream))
		.collect();

	candidates.sort_by(|(a, _), (b, _)| a.ordering_weight.cmp(&b.ordering_weight).then_with(|| a.name.cmp(&b.name)));
	candidates
}

fn profile_allows_channel(profile: Option<&ApiKeyProfile>, channel: &Channel) -> bool {
	let Some(profile) = profile else {
		return true;
	};
	if !profile.channel_ids.is_empty() && !profile.channel_ids.contains(&channel.id) {
		return false;
	}
	if !profile.channel_tags.is_empty() && !channel.tags.iter().any(|t| profile.channel_tags.contains(t)) {
		return false;
	}
	true
}

/// Builds the per-channel-type `Outbound` for a resolved candidate, given
/// the channel's configuration and credentials. Concrete gateway binaries
/// supply this; the core only defines the shape.
pub type OutboundFactory =
	Arc<dyn Fn(&Channel, &str) -> Result<Box<dyn Outbound>> + Send + Sync>;

/// The channel-selecting outbound (§4.4 "implemented as an outbound
/// transformer that wraps per-provider outbounds"). Owns the sorted
/// candidate list and the index into it; `transform_request` always goes
/// through the currently-selected inner outbound.
pub struct ChannelOutbound {
	candidates: Vec<(Channel, String)>,
	index: usize,
	inner: Box<dyn Outbound>,
	factory: OutboundFactory,
}

impl ChannelOutbound {
	/// Resolves the model through `profile`, selects candidates, and builds
	/// the first one's inner outbound. Fails fast with `InvalidModel` if the
	/// candidate list is empty after filtering (§4.4 "Failure semantics").
	pub fn new(
		channels: &[Channel],
		profile: Option<&ApiKeyProfile>,
		model: &str,
		stream: bool,
		factory: OutboundFactory,
	) -> Result<Self> {
		let resolved_model = apply_profile_model_map(profile, model);
		let candidates = select_candidates(channels, profile, &resolved_model, stream);
		let first = candidates.first().ok_or_else(|| AxonError::InvalidModel(resolved_model.clone()))?;
		let inner = factory(&first.0, &first.1)?;
		Ok(ChannelOutbound { candidates, index: 0, inner, factory })
	}

	pub fn current_channel(&self) -> &Channel {
		&self.candidates[self.index].0
	}
}

#[async_trait]
impl Outbound for ChannelOutbound {
	fn provider(&self) -> &'static str {
		self.inner.provider()
	}

	fn transform_request(&self, req: &LlmRequest) -> Result<Request> {
		self.inner.transform_request(req)
	}

	fn transform_response(&self, resp: Response) -> Result<crate::canonical::LlmResponse> {
		self.inner.transform_response(resp)
	}

	fn transform_stream(&self, stream: BoxEventStream) -> BoxEventStream {
		self.inner.transform_stream(stream)
	}

	fn transform_error(&self, resp: &Response, body: &[u8]) -> AxonError {
		self.inner.transform_error(resp, body)
	}

	fn customize_executor(&self, inner: Arc<dyn Executor>) -> Arc<dyn Executor> {
		self.inner.customize_executor(inner)
	}

	fn as_channel_retryable(&mut self) -> Option<&mut dyn ChannelRetryable> {
		Some(self)
	}

	fn as_retryable(&mut self) -> Option<&mut dyn Retryable> {
		Some(self)
	}
}

impl ChannelRetryable for ChannelOutbound {
	fn prepare_for_retry(&mut self) {
		if let Some(r) = self.inner.as_channel_retryable() {
			r.prepare_for_retry();
		}
	}
}

impl Retryable for ChannelOutbound {
	fn has_more_channels(&self) -> bool {
		self.index + 1 < self.candidates.len()
	}

	fn next_channel(&mut self) {
		if !self.has_more_channels() {
			return;
		}
		self.index += 1;
		let (channel, model) = &self.candidates[self.index];
		tracing::info!(channel_id = %channel.id, model = %model, "selecting next channel");
		match (self.factory)(channel, model) {
			Ok(inner) => self.inner = inner,
			Err(e) => {
				tracing::warn!(channel_id = %channel.id, error = %e, "failed to build outbound for channel");
				// Leave `inner` pointed at the previous channel; the next
				// dispatch will fail against it and the pipeline's retry
				// policy takes over from there.
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn channel(id: &str, weight: i64, models: &[&str]) -> Channel {
		Channel {
			id: id.into(),
			name: id.into(),
			provider: "openai".into(),
			enabled: true,
			tags: vec![],
			ordering_weight: weight,
			supported_models: models.iter().map(|m| Strng::from(*m)).collect(),
			extra_model_prefix: None,
			auto_trimmed_prefixes: vec![],
			model_mappings: ModelMap::default(),
			stream_policy: StreamPolicy::Allow,
		}
	}

	#[test]
	fn candidates_are_sorted_by_ordering_weight_then_name() {
		let channels =
			vec![channel("b", 5, &["gpt-4"]), channel("a", 5, &["gpt-4"]), channel("c", 1, &["gpt-4"])];
		let candidates = select_candidates(&channels, None, "gpt-4", false);
		let ids: Vec<_> = candidates.iter().map(|(c, _)| c.id.as_str().to_string()).collect();
		assert_eq!(ids, vec!["c", "a", "b"]);
	}

	#[test]
	fn channels_not_serving_the_model_are_dropped() {
		let channels = vec![channel("a", 1, &["claude-3"])];
		let candidates = select_candidates(&channels, None, "gpt-4", false);
		assert!(candidates.is_empty());
	}

	#[test]
	fn forbid_stream_drops_channel_on_a_streaming_request() {
		let mut c = channel("a", 1, &["gpt-4"]);
		c.stream_policy = StreamPolicy::Forbid;
		let candidates = select_candidates(&[c], None, "gpt-4", true);
		assert!(candidates.is_empty());
	}

	#[test]
	fn profile_channel_ids_restrict_the_candidate_set() {
		let channels = vec![channel("a", 1, &["gpt-4"]), channel("b", 1, &["gpt-4"])];
		let profile = ApiKeyProfile { channel_ids: vec!["b".into()], ..Default::default() };
		let candidates = select_candidates(&channels, Some(&profile), "gpt-4", false);
		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].0.id.as_str(), "b");
	}
}
