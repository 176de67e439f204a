//! Exact-or-regex `from -> to` model name mapping with a process-wide,
//! append-only regex cache (§4.4, §9 "Global regex cache for model
//! mapping"). Grounded on the teacher's `Policy::resolve_model_alias` /
//! `ModelAliasPattern` (`llm/policy/mod.rs`): exact matches are checked via
//! a `HashMap` first, then patterns are tried longest-pattern-first so the
//! most specific rule wins. The teacher compiles wildcard (`*`) syntax into
//! regex once at policy-load time; this module additionally supports
//! caller-supplied regex directly and compiles either on first use via a
//! shared, mutex-guarded, never-evicted cache (§5 "process-wide and
//! append-only").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;

static REGEX_CACHE: Lazy<Mutex<HashMap<String, Arc<Regex>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Compiles `pattern` on first sight and reuses it forever after, matching
/// §9's "entries are never evicted (patterns are bounded by the number of
/// profiles and channels)".
fn compiled(pattern: &str) -> Result<Arc<Regex>, regex::Error> {
	{
		let cache = REGEX_CACHE.lock().unwrap();
		if let Some(re) = cache.get(pattern) {
			return Ok(re.clone());
		}
	}
	let re = Arc::new(Regex::new(pattern)?);
	let mut cache = REGEX_CACHE.lock().unwrap();
	Ok(cache.entry(pattern.to_string()).or_insert(re).clone())
}

#[cfg(test)]
pub(crate) fn cache_len_for_test() -> usize {
	REGEX_CACHE.lock().unwrap().len()
}

/// One `from -> to` rule. `from` is matched literally unless it contains
/// wildcards or regex metacharacters. A bare glob (only `*`/`?` wildcards,
/// nothing else) is expanded into an anchored regex exactly the way the
/// teacher's `ModelAliasPattern::from_wildcard` does it (`llm/policy/mod.rs`:
/// escape the whole pattern, then substitute the escaped wildcard markers
/// back in); anything else containing regex metacharacters is compiled and
/// tried as a caller-supplied regex directly (the teacher's wildcard-only
/// `*` syntax generalized here to full regex per the distilled spec's "exact
/// or regex" wording).
#[derive(Debug, Clone)]
pub struct ModelMapRule {
	pub from: String,
	pub to: String,
}

/// A pattern rule after classification: `regex_source` is what actually gets
/// compiled (the glob-expanded regex for a wildcard `from`, or `from` itself
/// for a caller-supplied regex); `from` is kept around for specificity
/// sorting and debugging.
#[derive(Debug, Clone)]
struct CompiledPatternRule {
	from: String,
	regex_source: String,
	to: String,
}

/// An ordered set of rules belonging to one profile or channel. Exact
/// matches are tried before any regex rule, mirroring the teacher's
/// fast-path/slow-path split.
#[derive(Debug, Clone, Default)]
pub struct ModelMap {
	exact: HashMap<String, String>,
	patterns: Vec<CompiledPatternRule>,
}

impl ModelMap {
	pub fn new(rules: impl IntoIterator<Item = ModelMapRule>) -> Self {
		let mut exact = HashMap::new();
		let mut patterns = Vec::new();
		for rule in rules {
			if is_plain_literal(&rule.from) {
				exact.insert(rule.from.clone(), rule.to.clone());
			} else if is_wildcard_glob(&rule.from) {
				patterns.push(CompiledPatternRule {
					regex_source: expand_wildcard(&rule.from),
					from: rule.from,
					to: rule.to,
				});
			} else {
				patterns.push(CompiledPatternRule { regex_source: rule.from.clone(), from: rule.from, to: rule.to });
			}
		}
		patterns.sort_by_key(|r| std::cmp::Reverse(r.from.len()));
		ModelMap { exact, patterns }
	}

	/// Returns `m` unchanged when no rule matches — §8 invariant 3: "returns
	/// `m` whenever `api_key.active_profile` is nil or empty" generalizes to
	/// "whenever no rule in the map matches".
	pub fn resolve(&self, model: &str) -> String {
		if let Some(target) = self.exact.get(model) {
			return target.clone();
		}
		for rule in &self.patterns {
			if let Ok(re) = compiled(&rule.regex_source) {
				if re.is_match(model) {
					return re.replace(model, rule.to.as_str()).into_owned();
				}
			}
		}
		model.to_string()
	}
}

fn is_plain_literal(s: &str) -> bool {
	!s.chars().any(|c| "*+?.()[]{}|^$\\".contains(c))
}

/// A pattern is a bare glob when it contains `*`/`?` and nothing else that
/// would make it ambiguous with a hand-written regex.
fn is_wildcard_glob(s: &str) -> bool {
	let has_wildcard = s.contains('*') || s.contains('?');
	let has_other_metachar = s.chars().any(|c| "+.()[]{}|^$\\".contains(c));
	has_wildcard && !has_other_metachar
}

/// Escapes `pattern` wholesale, then substitutes the escaped wildcard
/// markers back in (`\*` -> `(.*)`, `\?` -> `.`) and anchors the result,
/// mirroring the teacher's `ModelAliasPattern::from_wildcard`.
fn expand_wildcard(pattern: &str) -> String {
	let escaped = regex::escape(pattern);
	let expanded = escaped.replace(r"\*", "(.*)").replace(r"\?", ".");
	format!("^{expanded}$")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_map_returns_input_unchanged() {
		let map = ModelMap::default();
		assert_eq!(map.resolve("gpt-4o"), "gpt-4o");
	}

	#[test]
	fn exact_rule_takes_precedence_over_pattern() {
		let map = ModelMap::new(vec![
			ModelMapRule { from: "gpt-4".to_string(), to: "gpt-4-pinned".to_string() },
			ModelMapRule { from: "gpt-.*".to_string(), to: "catchall".to_string() },
		]);
		assert_eq!(map.resolve("gpt-4"), "gpt-4-pinned");
		assert_eq!(map.resolve("gpt-4o"), "catchall");
	}

	#[test]
	fn star_wildcard_only_matches_its_own_prefix_not_an_unrelated_substring() {
		let map = ModelMap::new(vec![ModelMapRule { from: "gpt-4*".to_string(), to: "pinned".to_string() }]);
		assert_eq!(map.resolve("gpt-4-turbo"), "pinned");
		assert_eq!(map.resolve("gpt-4"), "pinned");
		assert_eq!(map.resolve("gpt-3.5-turbo"), "gpt-3.5-turbo");
	}

	#[test]
	fn question_mark_wildcard_matches_exactly_one_character() {
		let map = ModelMap::new(vec![ModelMapRule { from: "gpt-4-?".to_string(), to: "pinned".to_string() }]);
		assert_eq!(map.resolve("gpt-4-5"), "pinned");
		assert_eq!(map.resolve("gpt-4-55"), "gpt-4-55");
	}

	#[test]
	fn regex_cache_compiles_a_pattern_once() {
		// The cache is process-wide and shared with every other test in this
		// binary, so only assert it grew by at least the one new pattern this
		// test introduces — sibling tests compiling their own patterns
		// concurrently would otherwise make an exact-count assertion flaky.
		let before = cache_len_for_test();
		let map = ModelMap::new(vec![ModelMapRule {
			from: "^unique-pattern-for-cache-test-[0-9]+$".to_string(),
			to: "x".to_string(),
		}]);
		map.resolve("unique-pattern-for-cache-test-1");
		map.resolve("unique-pattern-for-cache-test-2");
		assert!(cache_len_for_test() >= before + 1);
	}
}
