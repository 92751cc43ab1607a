use std::fmt;

/// Result type for AI capability calls
pub type Result<T> = std::result::Result<T, AiError>;

/// Failure kinds surfaced by AI providers.
///
/// `Retryable` covers rate limits, transient 5xx responses, and timeouts;
/// the provider chain consumes these and they never reach the host.
/// `Config` covers unauthorized, forbidden, and malformed requests; it
/// short-circuits any fallback.
#[derive(Debug)]
pub enum AiError {
    Retryable(String),
    Config(String),
}

impl AiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AiError::Retryable(_))
    }
}

impl fmt::Display for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiError::Retryable(msg) => write!(f, "Retryable provider error: {}", msg),
            AiError::Config(msg) => write!(f, "Provider configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AiError {}
