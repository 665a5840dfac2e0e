use posecraft_core::error::CoreError;

/// Failure of a remote backend call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request itself failed (network, DNS, TLS, body decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status.
    #[error("Backend API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    /// A 2xx response whose body does not have the expected shape.
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Image error: {0}")]
    Image(String),
}

impl BackendError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect() || e.is_timeout(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout { .. } => true,
            Self::InvalidResponse(_) | Self::Image(_) => false,
        }
    }

    /// Whether a non-idempotent request certainly had no effect, so it is
    /// safe to send again: the connection was never made, or the server
    /// refused it outright.
    pub fn is_resendable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status == 503,
            Self::Timeout { .. } | Self::InvalidResponse(_) | Self::Image(_) => false,
        }
    }
}

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        CoreError::Remote(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn server_errors_are_transient() {
        assert!(BackendError::Api { status: 503, body: String::new() }.is_transient());
        assert!(BackendError::Api { status: 429, body: String::new() }.is_transient());
        assert!(!BackendError::Api { status: 400, body: String::new() }.is_transient());
        assert!(!BackendError::InvalidResponse("x".into()).is_transient());
    }

    #[test]
    fn only_refusals_are_resendable() {
        assert!(BackendError::Api { status: 503, body: String::new() }.is_resendable());
        assert!(BackendError::Api { status: 429, body: String::new() }.is_resendable());
        // The server may have queued the work before failing.
        assert!(!BackendError::Api { status: 500, body: String::new() }.is_resendable());
        assert!(!BackendError::Api { status: 502, body: String::new() }.is_resendable());
        assert!(!BackendError::Timeout { stage: "submit", secs: 5 }.is_resendable());
    }

    #[test]
    fn converts_to_remote_core_error() {
        let err: CoreError = BackendError::Timeout { stage: "generation", secs: 300 }.into();
        assert_matches!(err, CoreError::Remote(msg) if msg == "generation timed out after 300s");
    }
}
