//! Channel model pricing (§3 "Channel Model Price Version"), surfaced
//! through the model catalogue's `pricing{input,output,cache_read,
//! cache_write,unit,currency}` block (§6). Owned by the storage layer in a
//! real deployment; the core only reads it through this query-shaped
//! struct and never mutates it (§5 "the core reads it through a query
//! interface ... it never mutates them").
//!
//! A price is versioned and immutable: `PriceVersion` carries a unique
//! `reference_id`, an `effective_start`/`effective_end` window, and a
//! `status`. When pricing changes, the old version is archived
//! (`effective_end = now`, `status = Archived`) and a new version created
//! — usage records keep referencing the old `reference_id`, so historical
//! billing stays reproducible even after rates move. `ChannelModelPrice` is
//! the flattened per-million view the catalogue and cost calculator
//! actually compute against; it is built from a version's active items.

use std::time::SystemTime;

use crate::util::Strng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelModelPrice {
	pub input: f64,
	pub output: f64,
	pub cache_read: Option<f64>,
	pub cache_write: Option<f64>,
	/// e.g. "1M tokens".
	pub unit: &'static str,
	pub currency: &'static str,
}

impl ChannelModelPrice {
	pub fn per_million_usd(input: f64, output: f64) -> Self {
		ChannelModelPrice { input, output, cache_read: None, cache_write: None, unit: "1M tokens", currency: "USD" }
	}

	/// The cost of one call given token usage, in the same unit as
	/// `input`/`output` (per `self.unit` tokens).
	pub fn cost(&self, usage: &crate::canonical::Usage) -> f64 {
		let scale = match self.unit {
			"1M tokens" => 1_000_000.0,
			"1K tokens" => 1_000.0,
			_ => 1.0,
		};
		let billable_prompt = usage.prompt_tokens.saturating_sub(usage.cached_tokens.unwrap_or(0));
		let mut cost = (billable_prompt as f64 / scale) * self.input
			+ (usage.completion_tokens as f64 / scale) * self.output;
		if let (Some(cached), Some(rate)) = (usage.cached_tokens, self.cache_read) {
			cost += (cached as f64 / scale) * rate;
		}
		cost
	}
}

/// How a `PriceItem`'s rate applies.
#[derive(Debug, Clone, PartialEq)]
pub enum PricingMode {
	/// A fixed charge per call, independent of usage.
	FlatFee(f64),
	/// `unit_price` applies uniformly across all usage.
	UsagePerUnit(f64),
	/// Marginal rate varies by volume; `tiers` are `(upper_bound, unit_price)`
	/// pairs in ascending `upper_bound` order, `upper_bound = None` meaning
	/// unbounded.
	UsageTiered(Vec<(Option<u64>, f64)>),
}

impl PricingMode {
	/// The charge for `quantity` units under this mode.
	pub fn charge(&self, quantity: u64) -> f64 {
		match self {
			PricingMode::FlatFee(fee) => *fee,
			PricingMode::UsagePerUnit(rate) => quantity as f64 * rate,
			PricingMode::UsageTiered(tiers) => {
				let mut remaining = quantity;
				let mut floor = 0u64;
				let mut total = 0.0;
				for (upper, rate) in tiers {
					if remaining == 0 {
						break;
					}
					let tier_capacity = upper.map(|u| u.saturating_sub(floor)).unwrap_or(remaining);
					let billed = remaining.min(tier_capacity);
					total += billed as f64 * rate;
					remaining -= billed;
					if let Some(u) = upper {
						floor = *u;
					}
				}
				total
			},
		}
	}
}

/// A time-of-day variant a `PriceItem`'s rate can differ by (e.g. a
/// realtime voice model billing per-5-minute-block vs. per-hour).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceVariant {
	FiveMinutes,
	OneHour,
}

/// One billable line within a price version — `item_code` names what is
/// being billed (e.g. `"input_tokens"`, `"cache_read_tokens"`).
#[derive(Debug, Clone, PartialEq)]
pub struct PriceItem {
	pub item_code: Strng,
	pub pricing_mode: PricingMode,
	pub variants: Vec<PriceVariant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceVersionStatus {
	Active,
	Archived,
}

/// An immutable, time-bounded price record for one `(channel_id, model_id)`
/// pair. `reference_id` is stable across archival — it is what a usage
/// record keeps referencing for reproducible historical billing.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceVersion {
	pub reference_id: Strng,
	pub channel_id: Strng,
	pub model_id: Strng,
	pub items: Vec<PriceItem>,
	pub effective_start: SystemTime,
	pub effective_end: Option<SystemTime>,
	pub status: PriceVersionStatus,
}

impl PriceVersion {
	pub fn new(reference_id: impl Into<Strng>, channel_id: impl Into<Strng>, model_id: impl Into<Strng>, items: Vec<PriceItem>, effective_start: SystemTime) -> Self {
		PriceVersion {
			reference_id: reference_id.into(),
			channel_id: channel_id.into(),
			model_id: model_id.into(),
			items,
			effective_start,
			effective_end: None,
			status: PriceVersionStatus::Active,
		}
	}

	pub fn is_active_at(&self, at: SystemTime) -> bool {
		self.status == PriceVersionStatus::Active
			&& self.effective_start <= at
			&& self.effective_end.map(|end| at < end).unwrap_or(true)
	}

	/// Archives this version as of `now` (§3 "the old version is archived
	/// (`effective_end = now`)"). A new `PriceVersion` with a fresh
	/// `reference_id` replaces it going forward; usage already recorded
	/// against this `reference_id` is unaffected.
	pub fn archive(&mut self, now: SystemTime) {
		self.effective_end = Some(now);
		self.status = PriceVersionStatus::Archived;
	}

	fn item_rate_per_unit(&self, item_code: &str) -> Option<f64> {
		self.items.iter().find(|i| i.item_code.as_str() == item_code).map(|i| match &i.pricing_mode {
			PricingMode::UsagePerUnit(rate) => *rate,
			PricingMode::FlatFee(fee) => *fee,
			PricingMode::UsageTiered(tiers) => tiers.first().map(|(_, rate)| *rate).unwrap_or(0.0),
		})
	}

	/// Flattens this version's `input_tokens`/`output_tokens`/
	/// `cache_read_tokens`/`cache_write_tokens` items into the per-million
	/// view the model catalogue and cost calculator use. Items the version
	/// doesn't carry default to `0.0`/`None`.
	pub fn as_channel_model_price(&self) -> ChannelModelPrice {
		ChannelModelPrice {
			input: self.item_rate_per_unit("input_tokens").unwrap_or(0.0),
			output: self.item_rate_per_unit("output_tokens").unwrap_or(0.0),
			cache_read: self.item_rate_per_unit("cache_read_tokens"),
			cache_write: self.item_rate_per_unit("cache_write_tokens"),
			unit: "1M tokens",
			currency: "USD",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::canonical::Usage;

	#[test]
	fn cost_excludes_cached_tokens_from_the_input_rate_and_applies_cache_rate_instead() {
		let price = ChannelModelPrice {
			input: 3.0,
			output: 15.0,
			cache_read: Some(0.3),
			cache_write: None,
			unit: "1M tokens",
			currency: "USD",
		};
		let usage = Usage {
			prompt_tokens: 1_000_000,
			completion_tokens: 0,
			cached_tokens: Some(900_000),
			audio_tokens: None,
			reasoning_tokens: None,
			prediction_tokens: None,
		};
		let cost = price.cost(&usage);
		// 100k billed at $3/M + 900k cached at $0.30/M
		assert!((cost - (0.1 * 3.0 + 0.9 * 0.3)).abs() < 1e-9);
	}

	#[test]
	fn tiered_pricing_bills_each_tier_at_its_own_rate() {
		let mode = PricingMode::UsageTiered(vec![(Some(1000), 1.0), (None, 0.5)]);
		// 1000 units at the first tier's rate, 500 spilling into the second.
		let cost = mode.charge(1500);
		assert!((cost - (1000.0 * 1.0 + 500.0 * 0.5)).abs() < 1e-9);
	}

	#[test]
	fn archiving_a_version_sets_effective_end_and_status_without_changing_its_reference_id() {
		let t0 = SystemTime::UNIX_EPOCH;
		let mut version = PriceVersion::new(
			"price-1",
			"channel-a",
			"gpt-4o",
			vec![PriceItem { item_code: "input_tokens".into(), pricing_mode: PricingMode::UsagePerUnit(3.0), variants: vec![] }],
			t0,
		);
		let reference_id = version.reference_id.clone();
		let t1 = t0 + std::time::Duration::from_secs(3600);
		version.archive(t1);
		assert_eq!(version.status, PriceVersionStatus::Archived);
		assert_eq!(version.effective_end, Some(t1));
		assert_eq!(version.reference_id, reference_id);
		assert!(!version.is_active_at(t1));
	}

	#[test]
	fn as_channel_model_price_flattens_named_items_to_the_catalogue_view() {
		let version = PriceVersion::new(
			"price-2",
			"channel-a",
			"gpt-4o",
			vec![
				PriceItem { item_code: "input_tokens".into(), pricing_mode: PricingMode::UsagePerUnit(3.0), variants: vec![] },
				PriceItem { item_code: "output_tokens".into(), pricing_mode: PricingMode::UsagePerUnit(15.0), variants: vec![] },
				PriceItem {
					item_code: "cache_read_tokens".into(),
					pricing_mode: PricingMode::UsagePerUnit(0.3),
					variants: vec![],
				},
			],
			SystemTime::UNIX_EPOCH,
		);
		let flattened = version.as_channel_model_price();
		assert_eq!(flattened.input, 3.0);
		assert_eq!(flattened.output, 15.0);
		assert_eq!(flattened.cache_read, Some(0.3));
		assert_eq!(flattened.cache_write, None);
	}
}
