use async_trait::async_trait;

use super::error::ProviderError;
use super::user::{Credentials, ProviderProfile};

/// Database connection used for the password grant.
pub const PASSWORD_REALM: &str = "Username-Password-Authentication";

/// Claims requested with every token: identity, profile, and email.
pub const DEFAULT_SCOPE: &str = "openid profile email";

/// The identity service as seen by the session.
///
/// Implementations own transport, timeouts, and the hosted login UI.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchanges a username/password against a realm.
    async fn password_grant(
        &self,
        username: &str,
        password: &str,
        realm: &str,
        scope: &str,
    ) -> Result<Credentials, ProviderError>;

    /// Runs the provider-hosted login and returns the resulting credentials.
    ///
    /// A user who backs out yields [`ProviderError::UserCancelled`].
    async fn interactive_authorize(&self, scope: &str) -> Result<Credentials, ProviderError>;

    async fn user_info(&self, access_token: &str) -> Result<ProviderProfile, ProviderError>;

    /// Ends the provider's own browser session. Best effort.
    async fn clear_remote_session(&self) -> Result<(), ProviderError>;
}
