use thiserror::Error;

/// Failure talking to the recommendation service. The payload is display-ready.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure or non-success HTTP status.
    #[error("{0}")]
    Network(String),

    /// The service answered `success: false`.
    #[error("{0}")]
    Backend(String),
}

impl FetchError {
    pub fn message(&self) -> &str {
        match self {
            FetchError::Network(m) | FetchError::Backend(m) => m,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Backend(_) => "backend",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Network("Request timed out".to_string())
        } else {
            FetchError::Network(format!("Network error: {err}"))
        }
    }
}
