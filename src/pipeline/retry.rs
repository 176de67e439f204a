//! Optional retry capabilities an `Outbound` may implement, and the default
//! retry-eligibility policy (§4.3, §7, §9 "Retry state on the outbound").
//! The pipeline interrogates these via a capability check — a plain
//! `Option<&dyn Trait>` — rather than assuming every outbound supports
//! retrying, mirroring the teacher's preference for capability traits over
//! a single bloated interface (see `llm::AIProvider`'s per-capability
//! methods in `llm/mod.rs`).

use crate::error::AxonError;
use http::StatusCode;

/// Same-channel retry: rotate a key, wait, or otherwise prepare to reissue
/// against the *same* channel without advancing the candidate list.
pub trait ChannelRetryable: Send + Sync {
	/// Whether `err` is worth retrying without switching channels. The
	/// default matches §4.3: retryable for 408/409/425/429/500/502/503/504,
	/// and for the back-compat case where no status code could be
	/// extracted; everything else (other 4xx) is not retried.
	fn can_retry(&self, err: &AxonError) -> bool {
		default_can_retry(err)
	}

	/// Mutates whatever per-attempt state needs resetting before reissuing
	/// (e.g. rotate to the channel's next API key).
	fn prepare_for_retry(&mut self);
}

/// Cross-channel retry: the outbound owns an ordered candidate list and can
/// advance through it.
pub trait Retryable: Send + Sync {
	fn has_more_channels(&self) -> bool;

	/// Advances to the next candidate, rebuilding the inner outbound for
	/// that channel's provider type with that channel's credentials, and
	/// resets any same-channel counter.
	fn next_channel(&mut self);
}

/// Default `can_retry`, shared by every `ChannelRetryable` impl that
/// doesn't need provider-specific overrides.
pub fn default_can_retry(err: &AxonError) -> bool {
	match err {
		AxonError::RetryableUpstream { status: None, .. } => true,
		AxonError::RetryableUpstream { status: Some(s), .. } => is_retryable_status(*s),
		AxonError::RateLimited(_) => true,
		_ => false,
	}
}

fn is_retryable_status(status: StatusCode) -> bool {
	matches!(
		status,
		StatusCode::REQUEST_TIMEOUT
			| StatusCode::CONFLICT
			| StatusCode::TOO_MANY_REQUESTS
			| StatusCode::INTERNAL_SERVER_ERROR
			| StatusCode::BAD_GATEWAY
			| StatusCode::SERVICE_UNAVAILABLE
			| StatusCode::GATEWAY_TIMEOUT
	) || status.as_u16() == 425
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retries_408_409_425_429_500_502_503_504() {
		for code in [408u16, 409, 425, 429, 500, 502, 503, 504] {
			let status = StatusCode::from_u16(code).unwrap();
			let err = AxonError::from_upstream_status(status, "x".to_string());
			assert!(default_can_retry(&err), "expected {code} to be retryable");
		}
	}

	#[test]
	fn does_not_retry_other_4xx() {
		let err = AxonError::from_upstream_status(StatusCode::IM_A_TEAPOT, "x".to_string());
		assert!(!default_can_retry(&err));
	}

	#[test]
	fn retries_when_status_code_cannot_be_extracted() {
		let err = AxonError::RetryableUpstream { status: None, message: "reset".into() };
		assert!(default_can_retry(&err));
	}

	#[test]
	fn never_retries_auth_errors() {
		assert!(!default_can_retry(&AxonError::Unauthorized("x".into())));
		assert!(!default_can_retry(&AxonError::Forbidden("x".into())));
	}
}
