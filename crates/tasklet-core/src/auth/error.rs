use thiserror::Error;

/// Failures reported by an [`IdentityProvider`](super::IdentityProvider).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider rejected the username/password pair.
    #[error("{0}")]
    InvalidCredentials(String),

    /// The user closed or declined the hosted login.
    #[error("login was cancelled")]
    UserCancelled,

    /// The access token is expired, revoked, or unknown.
    #[error("access token is no longer valid")]
    TokenInvalid,

    /// The interactive flow failed for a reason other than cancellation.
    #[error("{0}")]
    Rejected(String),

    /// Transport failure or an unexpected provider response.
    #[error("network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Message suitable for showing to the user, if the provider supplied one.
    pub fn provider_message(&self) -> Option<&str> {
        match self {
            ProviderError::InvalidCredentials(msg) | ProviderError::Rejected(msg) => {
                Some(msg.as_str()).filter(|m| !m.trim().is_empty())
            }
            ProviderError::Network(_)
            | ProviderError::UserCancelled
            | ProviderError::TokenInvalid => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

/// Failures reported by a [`CredentialStore`](super::CredentialStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("secure storage error: {0}")]
    Backend(String),

    #[error("credential file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that cross the session boundary into the UI layer.
///
/// Only a human-readable message is carried; callers render `to_string()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Caller-supplied credentials were empty. No I/O was attempted.
    #[error("{0}")]
    Validation(String),

    /// The provider refused the sign-in or the exchange could not complete.
    #[error("{0}")]
    AuthenticationFailed(String),
}
