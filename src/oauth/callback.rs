//! OAuth callback helpers (§6 "admin APIs, per vendor — Codex, ClaudeCode,
//! Antigravity"): the session bookkeeping behind `POST …/oauth/start` and
//! `POST …/oauth/exchange`. The core stops at this seam — no HTTP routing
//! (that's a gateway binary concern, see `lib.rs`), just the PKCE `S256`
//! challenge, the short-lived state, and the token exchange call.
//!
//! Sessions are single-use: `exchange` deletes the state before returning,
//! so a replayed callback URL fails with `NotFound` rather than minting a
//! second set of credentials. Grounded in the same per-resource
//! lock-and-cache shape `OAuthProvider` uses for refresh, generalized here
//! to a TTL'd one-shot slot instead of a long-lived cache entry.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use base64::Engine;
use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{AxonError, Result};
use crate::util::Strng;

/// §3 "State TTL is 10 minutes".
const STATE_TTL: Duration = Duration::from_secs(600);

/// A PKCE `S256` verifier/challenge pair (RFC 7636). `code_verifier` is
/// kept server-side in the session state; `code_challenge` is the one sent
/// to the vendor's authorize URL.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
	pub code_verifier: Strng,
	pub code_challenge: Strng,
}

impl PkceChallenge {
	/// Generates a random 64-byte verifier and its `S256` challenge.
	pub fn generate() -> Self {
		let mut bytes = [0u8; 64];
		rand::rng().fill_bytes(&mut bytes);
		let code_verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
		let digest = Sha256::digest(code_verifier.as_bytes());
		let code_challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
		PkceChallenge { code_verifier: code_verifier.into(), code_challenge: code_challenge.into() }
	}
}

/// What one vendor needs to build an authorize URL and later exchange a
/// code for tokens.
#[derive(Debug, Clone)]
pub struct OAuthVendorConfig {
	pub authorize_url: Strng,
	pub token_url: Strng,
	pub client_id: Strng,
	pub redirect_uri: Strng,
	pub scopes: Vec<Strng>,
}

struct PendingSession {
	pkce: PkceChallenge,
	vendor: OAuthVendorConfig,
	created_at: SystemTime,
}

impl PendingSession {
	fn is_expired(&self, now: SystemTime) -> bool {
		now.duration_since(self.created_at).map(|elapsed| elapsed >= STATE_TTL).unwrap_or(false)
	}
}

/// `{session_id, auth_url}`, the `POST …/oauth/start` response shape.
#[derive(Debug, Clone)]
pub struct StartResult {
	pub session_id: Strng,
	pub auth_url: Strng,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access_token: String,
	refresh_token: Option<String>,
	expires_in: u64,
	token_type: Option<String>,
}

/// Credentials handed back from a successful `POST …/oauth/exchange`.
#[derive(Debug, Clone)]
pub struct ExchangedCredentials {
	pub access_token: Strng,
	pub refresh_token: Option<Strng>,
	pub expires_at: SystemTime,
	pub token_type: Strng,
}

/// Process-wide store of in-flight authorization sessions, keyed by
/// `session_id`. One instance backs every vendor's `/oauth/start` and
/// `/oauth/exchange` handlers.
pub struct OAuthCallbackStore {
	http: reqwest::Client,
	sessions: Mutex<HashMap<Strng, PendingSession>>,
}

impl OAuthCallbackStore {
	pub fn new() -> Self {
		OAuthCallbackStore { http: reqwest::Client::new(), sessions: Mutex::new(HashMap::new()) }
	}

	/// `POST …/oauth/start`: mints a session id, generates a PKCE challenge,
	/// and builds the vendor's authorize URL carrying `state`, `code_challenge`
	/// and `code_challenge_method=S256`.
	pub fn start(&self, vendor: OAuthVendorConfig) -> StartResult {
		let session_id: Strng = uuid::Uuid::new_v4().to_string().into();
		let pkce = PkceChallenge::generate();

		let mut auth_url = url::Url::parse(vendor.authorize_url.as_str())
			.unwrap_or_else(|_| url::Url::parse("http://invalid.invalid").unwrap());
		{
			let mut qp = auth_url.query_pairs_mut();
			qp.append_pair("client_id", vendor.client_id.as_str());
			qp.append_pair("redirect_uri", vendor.redirect_uri.as_str());
			qp.append_pair("response_type", "code");
			qp.append_pair("state", session_id.as_str());
			qp.append_pair("code_challenge", pkce.code_challenge.as_str());
			qp.append_pair("code_challenge_method", "S256");
			if !vendor.scopes.is_empty() {
				let scopes = vendor.scopes.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" ");
				qp.append_pair("scope", &scopes);
			}
		}

		self.sessions.lock().insert(
			session_id.clone(),
			PendingSession { pkce, vendor, created_at: SystemTime::now() },
		);
		tracing::debug!(session_id = %session_id, "started oauth session");

		StartResult { session_id, auth_url: auth_url.to_string().into() }
	}

	/// `POST …/oauth/exchange`: looks up `session_id`, extracts `code` from
	/// `callback_url`, and exchanges it plus the session's `code_verifier`
	/// for tokens. The state is removed whether the exchange succeeds or
	/// fails, so a session is spent by its first use regardless of outcome.
	pub async fn exchange(&self, session_id: &Strng, callback_url: &str) -> Result<ExchangedCredentials> {
		let session = self
			.sessions
			.lock()
			.remove(session_id)
			.ok_or_else(|| AxonError::NotFound(format!("no pending oauth session {session_id}")))?;

		if session.is_expired(SystemTime::now()) {
			tracing::warn!(session_id = %session_id, "oauth session expired before exchange");
			return Err(AxonError::NotFound(format!("oauth session {session_id} expired")));
		}

		let code = extract_code(callback_url)
			.ok_or_else(|| AxonError::InvalidRequest("callback_url is missing a code parameter".into()))?;

		let form = [
			("grant_type", "authorization_code"),
			("code", code.as_str()),
			("redirect_uri", session.vendor.redirect_uri.as_str()),
			("client_id", session.vendor.client_id.as_str()),
			("code_verifier", session.pkce.code_verifier.as_str()),
		];
		let resp = self
			.http
			.post(session.vendor.token_url.as_str())
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

		let parsed: TokenResponse =
			resp.json().await.map_err(|e| AxonError::Transformer(format!("decoding token exchange: {e}")))?;

		Ok(ExchangedCredentials {
			access_token: parsed.access_token.into(),
			refresh_token: parsed.refresh_token.map(Strng::from),
			expires_at: SystemTime::now() + Duration::from_secs(parsed.expires_in),
			token_type: parsed.token_type.unwrap_or_else(|| "Bearer".to_string()).into(),
		})
	}

	/// The number of sessions currently pending, for observability/testing.
	pub fn pending_count(&self) -> usize {
		self.sessions.lock().len()
	}
}

impl Default for OAuthCallbackStore {
	fn default() -> Self {
		Self::new()
	}
}

fn extract_code(callback_url: &str) -> Option<String> {
	let parsed = url::Url::parse(callback_url).ok()?;
	parsed.query_pairs().find(|(k, _)| k == "code").map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn vendor() -> OAuthVendorConfig {
		OAuthVendorConfig {
			authorize_url: "https://auth.example.com/authorize".into(),
			token_url: "http://127.0.0.1:1/token".into(),
			client_id: "client-1".into(),
			redirect_uri: "https://gateway.example.com/oauth/callback".into(),
			scopes: vec!["openid".into(), "offline_access".into()],
		}
	}

	#[test]
	fn pkce_challenge_is_the_base64url_sha256_of_its_own_verifier() {
		let pkce = PkceChallenge::generate();
		let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD
			.encode(Sha256::digest(pkce.code_verifier.as_str().as_bytes()));
		assert_eq!(pkce.code_challenge.as_str(), expected);
	}

	#[test]
	fn start_builds_an_authorize_url_carrying_state_and_the_s256_challenge() {
		let store = OAuthCallbackStore::new();
		let result = store.start(vendor());
		assert!(result.auth_url.contains("code_challenge_method=S256"));
		assert!(result.auth_url.contains(&format!("state={}", result.session_id)));
		assert_eq!(store.pending_count(), 1);
	}

	#[tokio::test]
	async fn exchange_deletes_the_session_even_when_the_token_endpoint_is_unreachable() {
		let store = OAuthCallbackStore::new();
		let result = store.start(vendor());
		let callback = format!("https://gateway.example.com/oauth/callback?code=abc&state={}", result.session_id);

		let outcome = store.exchange(&result.session_id, &callback).await;
		assert!(outcome.is_err());
		assert_eq!(store.pending_count(), 0);
	}

	#[tokio::test]
	async fn exchanging_an_unknown_session_id_fails_without_touching_the_store() {
		let store = OAuthCallbackStore::new();
		let bogus: Strng = "does-not-exist".into();
		let outcome = store.exchange(&bogus, "https://gateway.example.com/oauth/callback?code=x").await;
		assert!(matches!(outcome, Err(AxonError::NotFound(_))));
	}

	#[tokio::test]
	async fn exchanging_twice_fails_the_second_time_single_use_state() {
		let store = OAuthCallbackStore::new();
		let result = store.start(vendor());
		let callback = format!("https://gateway.example.com/oauth/callback?code=abc&state={}", result.session_id);
		let _ = store.exchange(&result.session_id, &callback).await;
		let second = store.exchange(&result.session_id, &callback).await;
		assert!(matches!(second, Err(AxonError::NotFound(_))));
	}

	#[test]
	fn extract_code_reads_the_code_query_parameter() {
		assert_eq!(extract_code("https://x.test/cb?state=s&code=abc123").as_deref(), Some("abc123"));
		assert_eq!(extract_code("https://x.test/cb?state=s"), None);
	}
}
