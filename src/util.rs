use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Cheaply-cloneable interned-ish string, used anywhere a value is cloned across
/// attempts/retries/candidate channels (model names, channel ids, provider tags).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Strng(Arc<str>);

impl Strng {
	pub fn new(s: impl Into<Arc<str>>) -> Self {
		Strng(s.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Deref for Strng {
	type Target = str;
	fn deref(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for Strng {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&*self.0, f)
	}
}

impl fmt::Display for Strng {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&*self.0, f)
	}
}

impl From<&str> for Strng {
	fn from(s: &str) -> Self {
		Strng(Arc::from(s))
	}
}

impl From<String> for Strng {
	fn from(s: String) -> Self {
		Strng(Arc::from(s.into_boxed_str()))
	}
}

impl AsRef<str> for Strng {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
