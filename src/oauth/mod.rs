//! Per-channel, in-memory OAuth token provider (§4.5). Single-flight
//! refresh is modeled the way the teacher keys caches and synchronizes
//! shared mutable state per-resource: one `tokio::sync::Mutex` per channel
//! id held in a process-wide map, so concurrent callers queue on the lock
//! and the first one through performs the refresh while the rest simply
//! wait for it to finish and observe the refreshed value (§8 invariant 4,
//! §9 "OAuth refresh: single-flight keyed on channel id").

pub mod callback;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex as SyncMutex;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{AxonError, Result};
use crate::util::Strng;

/// Credentials cached for one channel.
#[derive(Debug, Clone)]
pub struct CachedCredentials {
	pub access_token: Strng,
	pub refresh_token: Strng,
	pub expires_at: SystemTime,
	pub account_id: Option<Strng>,
}

impl CachedCredentials {
	/// §4.5 step 1: "if not expired (`now + 3m < expires_at`), return."
	fn is_fresh(&self, now: SystemTime) -> bool {
		match self.expires_at.duration_since(now) {
			Ok(remaining) => remaining > Duration::from_secs(180),
			Err(_) => false,
		}
	}
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
	access_token: String,
	refresh_token: Option<String>,
	expires_in: u64,
}

/// What one channel needs to refresh its own token: the provider's token
/// endpoint and the client identity to present. Refresh tokens rotate per
/// provider response and are written back through `on_refreshed`.
#[derive(Debug, Clone)]
pub struct OAuthChannelConfig {
	pub token_url: Strng,
	pub client_id: Strng,
}

/// Invoked after a successful refresh so a persistence layer can write the
/// rotated refresh token back to durable storage (§4.5 step 2). The core
/// itself has no persistence layer; this is a pure extension point.
pub type OnRefreshed = Arc<dyn Fn(&Strng, &CachedCredentials) + Send + Sync>;

struct ChannelSlot {
	lock: AsyncMutex<Option<CachedCredentials>>,
}

/// Process-wide, per-channel credential cache. One process-lifetime
/// instance is shared by every request that addresses a given channel
/// (§5 "the OAuth cache is shared across requests that address the same
/// channel").
pub struct OAuthProvider {
	http: reqwest::Client,
	slots: SyncMutex<HashMap<Strng, Arc<ChannelSlot>>>,
	on_refreshed: Option<OnRefreshed>,
}

impl OAuthProvider {
	pub fn new() -> Self {
		OAuthProvider { http: reqwest::Client::new(), slots: SyncMutex::new(HashMap::new()), on_refreshed: None }
	}

	pub fn with_on_refreshed(mut self, cb: OnRefreshed) -> Self {
		self.on_refreshed = Some(cb);
		self
	}

	/// Seeds the cache for a channel, e.g. from persisted storage at
	/// startup. Overwrites any existing entry.
	pub async fn seed(&self, channel_id: &Strng, creds: CachedCredentials) {
		let slot = self.slot_for(channel_id);
		*slot.lock.lock().await = Some(creds);
	}

	fn slot_for(&self, channel_id: &Strng) -> Arc<ChannelSlot> {
		let mut slots = self.slots.lock();
		slots
			.entry(channel_id.clone())
			.or_insert_with(|| Arc::new(ChannelSlot { lock: AsyncMutex::new(None) }))
			.clone()
	}

	/// `get(channel_id) -> (access_token, account_id)` (§4.5). Refreshes at
	/// most once per channel for any number of concurrent callers: they all
	/// block on the same per-channel `tokio::sync::Mutex`, the first one in
	/// performs the HTTP round-trip, and the rest simply read the value it
	/// wrote before releasing the lock.
	pub async fn get(
		&self,
		channel_id: &Strng,
		config: &OAuthChannelConfig,
	) -> Result<(Strng, Option<Strng>)> {
		let slot = self.slot_for(channel_id);
		let mut guard = slot.lock.lock().await;

		let now = SystemTime::now();
		if let Some(creds) = guard.as_ref() {
			if creds.is_fresh(now) {
				return Ok((creds.access_token.clone(), creds.account_id.clone()));
			}
		}

		let refresh_token = match guard.as_ref() {
			Some(creds) => creds.refresh_token.clone(),
			None => return Err(AxonError::Unauthorized(format!("no credentials cached for channel {channel_id}"))),
		};

		tracing::debug!(channel_id = %channel_id, "refreshing oauth token");
		let refreshed = self.refresh(config, &refresh_token).await?;
		let result = (refreshed.access_token.clone(), refreshed.account_id.clone());
		if let Some(cb) = &self.on_refreshed {
			cb(channel_id, &refreshed);
		}
		*guard = Some(refreshed);
		Ok(result)
	}

	async fn refresh(&self, config: &OAuthChannelConfig, refresh_token: &Strng) -> Result<CachedCredentials> {
		let form = [
			("grant_type", "refresh_token"),
			("refresh_token", refresh_token.as_str()),
			("client_id", config.client_id.as_str()),
		];
		let resp = self
			.http
			.post(config.token_url.as_str())
			.form(&form)
			.send()
			.await
			.map_err(|e| AxonError::RetryableUpstream { status: None, message: e.to_string() })?;

		let status = resp.status();
		if !status.is_success() {
			let body = resp.text().await.unwrap_or_default();
			return Err(AxonError::from_upstream_status(
				http::StatusCode::from_u16(status.as_u16()).unwrap_or(http::StatusCode::BAD_GATEWAY),
				body,
			));
		}
		let parsed: RefreshResponse =
			resp.json().await.map_err(|e| AxonError::Transformer(format!("decoding token refresh: {e}")))?;

		let account_id = parse_chatgpt_account_id(&parsed.access_token);

		Ok(CachedCredentials {
			access_token: parsed.access_token.into(),
			refresh_token: parsed.refresh_token.unwrap_or_else(|| refresh_token.to_string()).into(),
			expires_at: SystemTime::now() + Duration::from_secs(parsed.expires_in),
			account_id,
		})
	}
}

impl Default for OAuthProvider {
	fn default() -> Self {
		Self::new()
	}
}

/// Parses the `https://api.openai.com/auth.chatgpt_account_id` claim out of
/// an access token JWT **without verifying its signature** (§4.5 step 3):
/// the provider already vouched for this token by issuing it over a TLS
/// connection we just made; we only need the claim, not proof of identity.
/// Matches the teacher's `jsonwebtoken` dependency (`crate::http::jwt`),
/// here with signature validation and expiry checking turned off since
/// there is no JWKS to verify against at this seam.
fn parse_chatgpt_account_id(access_token: &str) -> Option<Strng> {
	#[derive(Deserialize)]
	struct Claims {
		#[serde(rename = "https://api.openai.com/auth.chatgpt_account_id")]
		chatgpt_account_id: Option<String>,
	}

	let token_data = jsonwebtoken::dangerous::insecure_decode::<Claims>(access_token).ok()?;
	token_data.claims.chatgpt_account_id.map(Strng::from)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn expired_credentials() -> CachedCredentials {
		CachedCredentials {
			access_token: "old".into(),
			refresh_token: "refresh-me".into(),
			expires_at: SystemTime::now() - Duration::from_secs(3600),
			account_id: None,
		}
	}

	#[tokio::test]
	async fn fresh_credentials_are_returned_without_a_refresh() {
		let provider = OAuthProvider::new();
		let channel_id: Strng = "c1".into();
		provider
			.seed(
				&channel_id,
				CachedCredentials {
					access_token: "fresh".into(),
					refresh_token: "r".into(),
					expires_at: SystemTime::now() + Duration::from_secs(3600),
					account_id: None,
				},
			)
			.await;
		let config = OAuthChannelConfig { token_url: "http://127.0.0.1:1/token".into(), client_id: "x".into() };
		let (token, _) = provider.get(&channel_id, &config).await.unwrap();
		assert_eq!(token.as_str(), "fresh");
	}

	#[tokio::test]
	async fn expired_credentials_with_no_reachable_token_endpoint_surface_an_error_not_a_panic() {
		let provider = OAuthProvider::new();
		let channel_id: Strng = "c2".into();
		provider.seed(&channel_id, expired_credentials()).await;
		let config =
			OAuthChannelConfig { token_url: "http://127.0.0.1:1/token".into(), client_id: "x".into() };
		let result = provider.get(&channel_id, &config).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn concurrent_gets_on_an_expired_channel_serialize_through_the_same_lock() {
		// Without a real token endpoint this exercises the lock path only:
		// both callers must observe the *same* failed outcome rather than
		// racing to build two divergent refresh attempts.
		let provider = Arc::new(OAuthProvider::new());
		let channel_id: Strng = "c3".into();
		provider.seed(&channel_id, expired_credentials()).await;
		let config = Arc::new(OAuthChannelConfig {
			token_url: "http://127.0.0.1:1/token".into(),
			client_id: "x".into(),
		});
		let attempts = Arc::new(AtomicUsize::new(0));
		let mut handles = Vec::new();
		for _ in 0..10 {
			let provider = provider.clone();
			let channel_id = channel_id.clone();
			let config = config.clone();
			let attempts = attempts.clone();
			handles.push(tokio::spawn(async move {
				attempts.fetch_add(1, Ordering::SeqCst);
				provider.get(&channel_id, &config).await
			}));
		}
		let mut results = Vec::new();
		for h in handles {
			results.push(h.await.unwrap());
		}
		assert_eq!(attempts.load(Ordering::SeqCst), 10);
		assert!(results.iter().all(|r| r.is_err()));
	}

	#[test]
	fn parses_chatgpt_account_id_claim_without_verifying_signature() {
		// header claims HS256 but the signature is garbage: insecure_decode never checks it.
		let header = base64_url("{\"alg\":\"HS256\",\"typ\":\"JWT\"}");
		let payload =
			base64_url("{\"https://api.openai.com/auth.chatgpt_account_id\":\"acct_123\"}");
		let token = format!("{header}.{payload}.not-a-real-signature");
		let account_id = parse_chatgpt_account_id(&token);
		assert_eq!(account_id.unwrap().as_str(), "acct_123");
	}

	fn base64_url(s: &str) -> String {
		use base64::Engine;
		base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s.as_bytes())
	}
}
