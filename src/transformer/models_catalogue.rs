//! Model catalogue (`GET /v1/models`, §6). Not a chat `Inbound`/`Outbound`
//! pair — there is no canonical request/response to convert, just a list of
//! entries filtered down to the fields `?include=` asked for. Grounded on
//! the teacher's passthrough-preserving response style (`llm/types/responses.rs`'s
//! `#[serde(flatten, default)] rest`) generalized into an explicit field
//! mask instead of a flatten bag, since here the full field set is known
//! up front rather than vendor-variable.

use serde::{Deserialize, Serialize};

use crate::util::Strng;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
	pub vision: bool,
	pub tool_call: bool,
	pub reasoning: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pricing {
	pub input: f64,
	pub output: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cache_read: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cache_write: Option<f64>,
	pub unit: String,
	pub currency: String,
}

impl From<crate::channel::pricing::ChannelModelPrice> for Pricing {
	fn from(p: crate::channel::pricing::ChannelModelPrice) -> Self {
		Pricing {
			input: p.input,
			output: p.output,
			cache_read: p.cache_read,
			cache_write: p.cache_write,
			unit: p.unit.to_string(),
			currency: p.currency.to_string(),
		}
	}
}

/// A model the catalogue can describe. One entry per `(channel, model)` the
/// concrete gateway wants advertised; the core only shapes the response.
#[derive(Debug, Clone)]
pub struct CatalogueEntry {
	pub id: Strng,
	pub name: Strng,
	pub description: Option<String>,
	pub context_length: Option<u64>,
	pub max_output_tokens: Option<u64>,
	pub capabilities: Capabilities,
	pub pricing: Option<Pricing>,
	pub icon: Option<String>,
	pub model_type: Option<String>,
}

/// The extended fields `?include=` can select, per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncludeField {
	Name,
	Description,
	ContextLength,
	MaxOutputTokens,
	Capabilities,
	Pricing,
	Icon,
	Type,
}

impl IncludeField {
	fn from_str(s: &str) -> Option<Self> {
		Some(match s {
			"name" => IncludeField::Name,
			"description" => IncludeField::Description,
			"context_length" => IncludeField::ContextLength,
			"max_output_tokens" => IncludeField::MaxOutputTokens,
			"capabilities" => IncludeField::Capabilities,
			"pricing" => IncludeField::Pricing,
			"icon" => IncludeField::Icon,
			"type" => IncludeField::Type,
			_ => return None,
		})
	}
}

/// `?include=` parsing: `all` selects every extended field; a comma list
/// selects only the named ones; absence (the default) selects none —
/// callers get only `id`/`object` (§6 "returns basic fields by default").
#[derive(Debug, Clone, Default)]
pub struct Include(Vec<IncludeField>);

impl Include {
	pub fn parse(query: Option<&str>) -> Self {
		let Some(raw) = query else {
			return Include(Vec::new());
		};
		if raw == "all" {
			return Include(vec![
				IncludeField::Name,
				IncludeField::Description,
				IncludeField::ContextLength,
				IncludeField::MaxOutputTokens,
				IncludeField::Capabilities,
				IncludeField::Pricing,
				IncludeField::Icon,
				IncludeField::Type,
			]);
		}
		Include(raw.split(',').filter_map(IncludeField::from_str).collect())
	}

	fn has(&self, f: IncludeField) -> bool {
		self.0.contains(&f)
	}
}

/// Renders one entry to a JSON object honoring `include`; unlisted fields
/// are omitted entirely rather than serialized as `null` (§6 "unlisted
/// fields are omitted").
pub fn render_entry(entry: &CatalogueEntry, include: &Include) -> serde_json::Value {
	let mut obj = serde_json::Map::new();
	obj.insert("id".to_string(), serde_json::Value::String(entry.id.to_string()));
	obj.insert("object".to_string(), serde_json::Value::String("model".to_string()));

	if include.has(IncludeField::Name) {
		obj.insert("name".to_string(), serde_json::Value::String(entry.name.to_string()));
	}
	if include.has(IncludeField::Description) {
		if let Some(d) = &entry.description {
			obj.insert("description".to_string(), serde_json::Value::String(d.clone()));
		}
	}
	if include.has(IncludeField::ContextLength) {
		if let Some(c) = entry.context_length {
			obj.insert("context_length".to_string(), serde_json::Value::from(c));
		}
	}
	if include.has(IncludeField::MaxOutputTokens) {
		if let Some(m) = entry.max_output_tokens {
			obj.insert("max_output_tokens".to_string(), serde_json::Value::from(m));
		}
	}
	if include.has(IncludeField::Capabilities) {
		obj.insert(
			"capabilities".to_string(),
			serde_json::json!({
				"vision": entry.capabilities.vision,
				"tool_call": entry.capabilities.tool_call,
				"reasoning": entry.capabilities.reasoning,
			}),
		);
	}
	if include.has(IncludeField::Pricing) {
		if let Some(p) = &entry.pricing {
			obj.insert("pricing".to_string(), serde_json::to_value(p).unwrap_or(serde_json::Value::Null));
		}
	}
	if include.has(IncludeField::Icon) {
		if let Some(i) = &entry.icon {
			obj.insert("icon".to_string(), serde_json::Value::String(i.clone()));
		}
	}
	if include.has(IncludeField::Type) {
		if let Some(t) = &entry.model_type {
			obj.insert("type".to_string(), serde_json::Value::String(t.clone()));
		}
	}
	serde_json::Value::Object(obj)
}

pub fn render_list(entries: &[CatalogueEntry], include: &Include) -> serde_json::Value {
	serde_json::json!({
		"object": "list",
		"data": entries.iter().map(|e| render_entry(e, include)).collect::<Vec<_>>(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry() -> CatalogueEntry {
		CatalogueEntry {
			id: "gpt-4o".into(),
			name: "GPT-4o".into(),
			description: Some("flagship multimodal model".into()),
			context_length: Some(128_000),
			max_output_tokens: Some(16_384),
			capabilities: Capabilities { vision: true, tool_call: true, reasoning: false },
			pricing: Some(Pricing {
				input: 2.5,
				output: 10.0,
				cache_read: None,
				cache_write: None,
				unit: "1M tokens".to_string(),
				currency: "USD".to_string(),
			}),
			icon: None,
			model_type: Some("chat".to_string()),
		}
	}

	#[test]
	fn default_include_only_exposes_id_and_object() {
		let rendered = render_entry(&entry(), &Include::default());
		assert_eq!(rendered["id"], "gpt-4o");
		assert!(rendered.get("name").is_none());
		assert!(rendered.get("pricing").is_none());
	}

	#[test]
	fn include_all_exposes_every_extended_field() {
		let include = Include::parse(Some("all"));
		let rendered = render_entry(&entry(), &include);
		assert_eq!(rendered["name"], "GPT-4o");
		assert_eq!(rendered["capabilities"]["vision"], true);
		assert_eq!(rendered["pricing"]["input"], 2.5);
	}

	#[test]
	fn include_selects_only_named_fields() {
		let include = Include::parse(Some("name,pricing"));
		let rendered = render_entry(&entry(), &include);
		assert!(rendered.get("name").is_some());
		assert!(rendered.get("pricing").is_some());
		assert!(rendered.get("description").is_none());
	}
}
