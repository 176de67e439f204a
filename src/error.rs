use http::StatusCode;

/// The error taxonomy from the error handling design: each variant maps to a
/// retry decision and a wire status, kept distinct so the pipeline's retry
/// policy (`retry::can_retry`) never has to re-derive intent from a status code
/// alone when a typed variant is available.
#[derive(Debug, thiserror::Error)]
pub enum AxonError {
	#[error("invalid request: {0}")]
	InvalidRequest(String),

	#[error("unauthorized: {0}")]
	Unauthorized(String),

	#[error("forbidden: {0}")]
	Forbidden(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("rate limited: {0}")]
	RateLimited(String),

	#[error("retryable upstream error ({status:?}): {message}")]
	RetryableUpstream {
		status: Option<StatusCode>,
		message: String,
	},

	#[error("permanent upstream error ({status:?}): {message}")]
	PermanentUpstream {
		status: Option<StatusCode>,
		message: String,
	},

	#[error("transformer error: {0}")]
	Transformer(String),

	#[error("canceled")]
	Canceled,

	#[error("no candidate channel for model {0:?}")]
	InvalidModel(String),
}

impl AxonError {
	/// Best-effort extraction of the HTTP status code a caller should see, per
	/// §7: InvalidRequest -> 400, Unauthorized -> 401, Forbidden -> 403,
	/// NotFound -> 404, RateLimited -> 429, RetryableUpstream -> passthrough or
	/// 502, PermanentUpstream -> passthrough or 400, Transformer -> 500,
	/// Canceled -> 499.
	pub fn status_code(&self) -> StatusCode {
		match self {
			AxonError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
			AxonError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
			AxonError::Forbidden(_) => StatusCode::FORBIDDEN,
			AxonError::NotFound(_) => StatusCode::NOT_FOUND,
			AxonError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
			AxonError::RetryableUpstream { status, .. } => {
				status.unwrap_or(StatusCode::BAD_GATEWAY)
			},
			AxonError::PermanentUpstream { status, .. } => {
				status.unwrap_or(StatusCode::BAD_REQUEST)
			},
			AxonError::Transformer(_) => StatusCode::INTERNAL_SERVER_ERROR,
			AxonError::Canceled => StatusCode::from_u16(499).unwrap(),
			AxonError::InvalidModel(_) => StatusCode::BAD_REQUEST,
		}
	}

	/// Classifies a raw upstream HTTP status into the taxonomy, used when an
	/// executor call completes with a non-2xx response. Connection-level
	/// failures (timeouts, resets) should construct `RetryableUpstream` with
	/// `status: None` directly instead of going through here.
	pub fn from_upstream_status(status: StatusCode, message: impl Into<String>) -> Self {
		let message = message.into();
		match status {
			StatusCode::UNAUTHORIZED => AxonError::Unauthorized(message),
			StatusCode::FORBIDDEN => AxonError::Forbidden(message),
			StatusCode::NOT_FOUND => AxonError::NotFound(message),
			StatusCode::TOO_MANY_REQUESTS => AxonError::RateLimited(message),
			StatusCode::REQUEST_TIMEOUT
			| StatusCode::CONFLICT
			| StatusCode::BAD_GATEWAY
			| StatusCode::SERVICE_UNAVAILABLE
			| StatusCode::GATEWAY_TIMEOUT
			| StatusCode::INTERNAL_SERVER_ERROR => AxonError::RetryableUpstream {
				status: Some(status),
				message,
			},
			s if s.as_u16() == 425 => AxonError::RetryableUpstream {
				status: Some(status),
				message,
			},
			s if s.is_client_error() => AxonError::PermanentUpstream {
				status: Some(status),
				message,
			},
			s => AxonError::RetryableUpstream {
				status: Some(s),
				message,
			},
		}
	}

	/// Generic `{error: {type, message}}` body per §7/§6; vendor inbounds wrap
	/// this further in `transform_error`.
	pub fn generic_body(&self) -> serde_json::Value {
		serde_json::json!({
			"error": {
				"type": self.type_tag(),
				"message": self.to_string(),
			}
		})
	}

	pub fn type_tag(&self) -> &'static str {
		match self {
			AxonError::InvalidRequest(_) => "invalid_request_error",
			AxonError::Unauthorized(_) => "authentication_error",
			AxonError::Forbidden(_) => "permission_error",
			AxonError::NotFound(_) => "not_found_error",
			AxonError::RateLimited(_) => "rate_limit_error",
			AxonError::RetryableUpstream { .. } => "upstream_error",
			AxonError::PermanentUpstream { .. } => "upstream_error",
			AxonError::Transformer(_) => "internal_error",
			AxonError::Canceled => "canceled_error",
			AxonError::InvalidModel(_) => "invalid_request_error",
		}
	}
}

pub type Result<T> = std::result::Result<T, AxonError>;
