//! Identity types shared by the provider boundary and the session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Last-resort display name when the provider supplies nothing usable.
pub const DEFAULT_USERNAME: &str = "User";

/// The authenticated identity as the app sees it.
///
/// This is also the shape of the persisted `user_profile` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// Provider-issued subject identifier.
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AuthUser {
    /// Builds a user from a provider profile.
    ///
    /// `fallback_id` is used only when the profile has no `sub`; `fallback_username`
    /// slots in after nickname and email.
    pub fn from_profile(
        profile: &ProviderProfile,
        fallback_id: &str,
        fallback_username: Option<&str>,
    ) -> Self {
        let id = non_empty(profile.sub.as_deref()).unwrap_or(fallback_id);
        let username = non_empty(profile.nickname.as_deref())
            .or_else(|| non_empty(profile.email.as_deref()))
            .or_else(|| non_empty(fallback_username))
            .unwrap_or(DEFAULT_USERNAME);

        Self {
            id: id.to_string(),
            username: username.to_string(),
            email: profile.email.clone(),
            name: profile.name.clone(),
        }
    }

    /// Fixed identity used when authentication is disabled.
    pub fn dev() -> Self {
        Self {
            id: "dev-user".to_string(),
            username: "Dev User".to_string(),
            email: None,
            name: None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Claims returned by the provider's user-info endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderProfile {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Result of a successful credential exchange. Never persisted whole.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl Credentials {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in: None,
            token_type: Some("Bearer".to_string()),
            id_token: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &mask_token(&self.access_token))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("id_token", &self.id_token.as_deref().map(mask_token))
            .finish()
    }
}

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.len() <= 16 || !token.is_char_boundary(12) {
        return "***".to_string();
    }
    format!("{}...", &token[..12])
}
