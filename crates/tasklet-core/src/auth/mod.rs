//! Authentication session core: provider client, credential storage, and the
//! observable session.

mod error;
mod session;
mod user;

pub mod auth0;
pub mod provider;
pub mod store;

pub use auth0::Auth0Client;
pub use error::{ProviderError, SessionError, StoreError};
pub use provider::{DEFAULT_SCOPE, IdentityProvider, PASSWORD_REALM};
#[cfg(feature = "keyring")]
pub use store::KeyringStore;
pub use store::{CredentialStore, FileStore, MemoryStore, open_store};
pub use session::{
    Gate, SessionController, SessionHandle, SessionPhase, SessionState, StateCallback,
    SubscriptionId,
};
pub use user::{AuthUser, Credentials, DEFAULT_USERNAME, ProviderProfile, mask_token};
