//! API Key Profile: the tenant-facing policy that restricts which channels
//! and models an API key may reach, and how incoming model names get
//! rewritten before channel selection (§4.4 step 1-2). One profile is
//! active per key at a time; switching the active profile changes routing
//! without rotating the key itself.

use crate::channel::model_map::ModelMap;
use crate::util::Strng;

/// How `select_candidates`'s sorted list should be picked from when more
/// than one channel ties on `ordering_weight` — the core only carries the
/// strategy tag; a concrete gateway's channel selection loop applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalanceStrategy {
	/// Always the lowest `ordering_weight` first (current `select_candidates`
	/// behavior).
	Priority,
	RoundRobin,
	Random,
}

impl Default for LoadBalanceStrategy {
	fn default() -> Self {
		LoadBalanceStrategy::Priority
	}
}

/// A usage cap on the profile. The core only carries the limit; enforcing
/// and resetting it against a usage ledger is a storage-layer concern.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Quota {
	pub max_requests: Option<u64>,
	pub max_tokens: Option<u64>,
	pub max_cost_usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ApiKeyProfile {
	pub name: Strng,
	pub model_map: ModelMap,
	/// Restricts candidate channels to this set, when non-empty.
	pub channel_ids: Vec<Strng>,
	/// Restricts candidate channels to those carrying any of these tags,
	/// when non-empty. Intersected with `channel_ids` when both are set.
	pub channel_tags: Vec<Strng>,
	/// Restricts to channels serving one of these resolved model ids, when
	/// non-empty.
	pub model_ids: Vec<Strng>,
	pub quota: Quota,
	pub load_balance_strategy: LoadBalanceStrategy,
}

impl Default for ApiKeyProfile {
	fn default() -> Self {
		ApiKeyProfile {
			name: Strng::from(""),
			model_map: ModelMap::default(),
			channel_ids: Vec::new(),
			channel_tags: Vec::new(),
			model_ids: Vec::new(),
			quota: Quota::default(),
			load_balance_strategy: LoadBalanceStrategy::default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_profile_has_no_restrictions_and_priority_load_balancing() {
		let profile = ApiKeyProfile::default();
		assert!(profile.channel_ids.is_empty());
		assert_eq!(profile.load_balance_strategy, LoadBalanceStrategy::Priority);
		assert_eq!(profile.quota, Quota::default());
	}
}
