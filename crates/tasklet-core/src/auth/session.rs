//! The authenticated session: one owner of [`SessionState`], many observers.
//!
//! [`SessionController`] is built once at startup and shared as a
//! [`SessionHandle`]. It runs restore, password sign-in, interactive sign-in and
//! sign-out against an [`IdentityProvider`] and a [`CredentialStore`], and
//! synchronously notifies subscribers after every state change.
//!
//! Callers must not start a second operation while `loading` is true. The
//! controller does not queue or reject; it logs and runs both to completion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use super::error::{ProviderError, SessionError, StoreError};
use super::provider::{DEFAULT_SCOPE, IdentityProvider, PASSWORD_REALM};
use super::store::{ACCESS_TOKEN_KEY, CredentialStore, USER_PROFILE_KEY};
use super::user::{AuthUser, Credentials};

const CREDENTIALS_REQUIRED: &str = "Username and password are required.";
const SIGN_IN_FAILED: &str = "Failed to sign in. Please check your credentials.";
const INTERACTIVE_SIGN_IN_FAILED: &str = "Failed to sign in. Please try again.";

/// Snapshot of the session as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<AuthUser>,
    pub loading: bool,
}

impl Default for SessionState {
    /// Process start: nothing known yet.
    fn default() -> Self {
        Self {
            user: None,
            loading: true,
        }
    }
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match (&self.user, self.loading) {
            (Some(_), _) => SessionPhase::Authenticated,
            (None, true) => SessionPhase::Unknown,
            (None, false) => SessionPhase::Unauthenticated,
        }
    }
}

/// Coarse session state for display and gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Restore (or another operation) has not settled and no user is known.
    Unknown,
    Authenticated,
    Unauthenticated,
}

/// Which top-level view the UI should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Loading,
    SignedIn(AuthUser),
    SignedOut,
}

impl Gate {
    /// Resolves the view for a snapshot. With authentication disabled the app
    /// always runs as [`AuthUser::dev`].
    pub fn resolve(auth_enabled: bool, state: &SessionState) -> Self {
        if !auth_enabled {
            return Gate::SignedIn(AuthUser::dev());
        }
        match state.phase() {
            SessionPhase::Unknown => Gate::Loading,
            SessionPhase::Authenticated => state.user.clone().map_or(Gate::SignedOut, Gate::SignedIn),
            SessionPhase::Unauthenticated => Gate::SignedOut,
        }
    }
}

/// Callback invoked with each new [`SessionState`].
pub type StateCallback = Arc<dyn Fn(&SessionState) + Send + Sync>;

/// Handle returned by [`SessionController::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Shared handle to the process-wide session.
pub type SessionHandle = Arc<SessionController>;

pub struct SessionController {
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn IdentityProvider>,
    state: Mutex<SessionState>,
    subscribers: Mutex<Vec<(SubscriptionId, StateCallback)>>,
    next_subscription: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionController {
    pub fn new(store: Arc<dyn CredentialStore>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            provider,
            state: Mutex::new(SessionState::default()),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Wraps the controller in a shareable [`SessionHandle`].
    pub fn into_handle(self) -> SessionHandle {
        Arc::new(self)
    }

    pub fn snapshot(&self) -> SessionState {
        lock(&self.state).clone()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        lock(&self.state).user.clone()
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.state).loading
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.state).phase()
    }

    /// Registers `callback` for every subsequent state change.
    pub fn subscribe(&self, callback: impl Fn(&SessionState) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Arc::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Applies `change` and notifies subscribers if the state actually moved.
    ///
    /// Callbacks run after both locks are released, so they may read the controller.
    fn update(&self, change: impl FnOnce(&mut SessionState)) {
        let snapshot = {
            let mut state = lock(&self.state);
            let before = state.clone();
            change(&mut state);
            if *state == before {
                return;
            }
            state.clone()
        };
        debug!(phase = ?snapshot.phase(), loading = snapshot.loading, "session state changed");

        let callbacks: Vec<StateCallback> = lock(&self.subscribers)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(&snapshot);
        }
    }

    /// Marks an operation as in flight and returns the user it started from.
    fn begin(&self, operation: &str) -> Option<AuthUser> {
        let mut previous = None;
        let mut overlapped = false;
        self.update(|state| {
            overlapped = state.loading;
            previous = state.user.clone();
            state.loading = true;
        });
        // The initial Unknown state is loading by definition; only restore may start there.
        if overlapped && operation != "restore" {
            warn!(operation, "session operation started while another is in flight");
        }
        previous
    }

    fn finish(&self, user: Option<AuthUser>) {
        self.update(|state| {
            state.user = user;
            state.loading = false;
        });
    }

    /// Restores a persisted session. Always settles; failures end signed out.
    pub async fn restore(&self) {
        self.begin("restore");
        let user = self.restore_user().await;
        match &user {
            Some(user) => info!(user_id = %user.id, "session restored"),
            None => debug!("no session to restore"),
        }
        self.finish(user);
    }

    async fn restore_user(&self) -> Option<AuthUser> {
        let token = self.store.get(ACCESS_TOKEN_KEY).await;
        let profile = self.store.get(USER_PROFILE_KEY).await;
        let (token, profile) = match (token, profile) {
            (Ok(token), Ok(profile)) => (token, profile),
            (Err(e), _) | (_, Err(e)) => {
                error!("failed to read stored session: {e}");
                return None;
            }
        };

        let (token, profile) = match (token, profile) {
            (Some(token), Some(profile)) => (token, profile),
            (None, None) => return None,
            _ => {
                warn!("stored session is incomplete; clearing it");
                self.purge().await;
                return None;
            }
        };

        let stored: AuthUser = match serde_json::from_str(&profile) {
            Ok(user) => user,
            Err(e) => {
                warn!("stored user profile is unreadable; clearing session: {e}");
                self.purge().await;
                return None;
            }
        };

        let remote = match self.provider.user_info(&token).await {
            Ok(remote) => remote,
            Err(ProviderError::TokenInvalid) => {
                info!("stored token is no longer valid; clearing session");
                self.purge().await;
                return None;
            }
            Err(e) => {
                warn!("could not verify stored session; clearing it: {e}");
                self.purge().await;
                return None;
            }
        };

        let has_subject = remote.sub.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !has_subject {
            if stored.id.trim().is_empty() {
                warn!("provider returned no subject and no cached id exists; clearing session");
                self.purge().await;
                return None;
            }
            warn!(cached_id = %stored.id, "provider returned no subject; reusing cached id");
        }

        Some(AuthUser::from_profile(
            &remote,
            &stored.id,
            Some(stored.username.as_str()),
        ))
    }

    /// Signs in with a username and password against the default realm.
    ///
    /// # Errors
    /// [`SessionError::Validation`] without any I/O if either field is blank,
    /// otherwise [`SessionError::AuthenticationFailed`]. Nothing is persisted
    /// on failure.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let username = username.trim();
        let password = password.trim();
        if username.is_empty() || password.is_empty() {
            return Err(SessionError::Validation(CREDENTIALS_REQUIRED.to_string()));
        }

        let previous = self.begin("sign_in");
        let result = match self
            .provider
            .password_grant(username, password, PASSWORD_REALM, DEFAULT_SCOPE)
            .await
        {
            Ok(credentials) => {
                self.establish(credentials, Some(username), SIGN_IN_FAILED)
                    .await
            }
            Err(e) => {
                info!("password sign-in refused: {e}");
                Err(authentication_failed(&e, SIGN_IN_FAILED))
            }
        };
        self.settle(previous, result)
    }

    /// Signs in through the provider-hosted login.
    ///
    /// A cancelled login returns `Ok(())` and leaves the state as it was.
    ///
    /// # Errors
    /// [`SessionError::AuthenticationFailed`] for any other failure.
    pub async fn sign_in_interactive(&self) -> Result<(), SessionError> {
        let previous = self.begin("sign_in_interactive");
        let result = match self.provider.interactive_authorize(DEFAULT_SCOPE).await {
            Ok(credentials) => {
                self.establish(credentials, None, INTERACTIVE_SIGN_IN_FAILED)
                    .await
            }
            Err(ProviderError::UserCancelled) => {
                info!("interactive sign-in cancelled");
                self.finish(previous);
                return Ok(());
            }
            Err(e) => {
                info!("interactive sign-in failed: {e}");
                Err(authentication_failed(&e, INTERACTIVE_SIGN_IN_FAILED))
            }
        };
        self.settle(previous, result)
    }

    /// Signs out locally, and remotely when possible. Always ends signed out.
    pub async fn sign_out(&self) {
        self.begin("sign_out");

        match self.store.get(ACCESS_TOKEN_KEY).await {
            Ok(Some(_)) => {
                if let Err(e) = self.provider.clear_remote_session().await {
                    debug!("remote sign-out failed; continuing locally: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!("could not read stored token during sign-out: {e}"),
        }

        self.purge().await;
        info!("signed out");
        self.finish(None);
    }

    /// Looks up the profile for fresh credentials and persists the record pair.
    async fn establish(
        &self,
        credentials: Credentials,
        fallback_username: Option<&str>,
        generic: &str,
    ) -> Result<AuthUser, SessionError> {
        let profile = self
            .provider
            .user_info(&credentials.access_token)
            .await
            .map_err(|e| {
                warn!("profile lookup after sign-in failed: {e}");
                authentication_failed(&e, generic)
            })?;

        if profile.sub.as_deref().is_none_or(|s| s.trim().is_empty()) {
            warn!("provider profile has no subject");
            return Err(SessionError::AuthenticationFailed(generic.to_string()));
        }

        let user = AuthUser::from_profile(&profile, "", fallback_username);
        self.persist(&credentials.access_token, &user)
            .await
            .map_err(|e| {
                error!("failed to persist session: {e}");
                SessionError::AuthenticationFailed(generic.to_string())
            })?;

        info!(user_id = %user.id, "signed in");
        Ok(user)
    }

    /// Writes token then profile; a failed profile write removes the token again.
    async fn persist(&self, access_token: &str, user: &AuthUser) -> Result<(), StoreError> {
        let profile = serde_json::to_string(user)?;
        self.store.set(ACCESS_TOKEN_KEY, access_token).await?;
        if let Err(e) = self.store.set(USER_PROFILE_KEY, &profile).await {
            if let Err(rollback) = self.store.delete(ACCESS_TOKEN_KEY).await {
                error!("failed to roll back stored token: {rollback}");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Deletes both persisted records. Errors are logged, not returned.
    async fn purge(&self) {
        for key in [ACCESS_TOKEN_KEY, USER_PROFILE_KEY] {
            if let Err(e) = self.store.delete(key).await {
                error!(key, "failed to delete stored credential: {e}");
            }
        }
    }

    fn settle(
        &self,
        previous: Option<AuthUser>,
        result: Result<AuthUser, SessionError>,
    ) -> Result<(), SessionError> {
        match result {
            Ok(user) => {
                self.finish(Some(user));
                Ok(())
            }
            Err(e) => {
                self.finish(previous);
                Err(e)
            }
        }
    }
}

fn authentication_failed(err: &ProviderError, generic: &str) -> SessionError {
    SessionError::AuthenticationFailed(err.provider_message().unwrap_or(generic).to_string())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::auth::store::{FileStore, MemoryStore};
    use crate::auth::user::ProviderProfile;

    struct FakeProvider {
        grant: Result<Credentials, ProviderError>,
        interactive: Result<Credentials, ProviderError>,
        profile: Result<ProviderProfile, ProviderError>,
        clear: Result<(), ProviderError>,
        calls: Mutex<Vec<String>>,
    }

    impl Default for FakeProvider {
        fn default() -> Self {
            Self {
                grant: Ok(Credentials::bearer("at-1")),
                interactive: Ok(Credentials::bearer("at-web")),
                profile: Ok(ProviderProfile {
                    sub: Some("auth0|123".into()),
                    email: Some("a@x.com".into()),
                    ..ProviderProfile::default()
                }),
                clear: Ok(()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl FakeProvider {
        fn calls(&self) -> Vec<String> {
            lock(&self.calls).clone()
        }

        fn record(&self, call: String) {
            lock(&self.calls).push(call);
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn password_grant(
            &self,
            username: &str,
            password: &str,
            realm: &str,
            scope: &str,
        ) -> Result<Credentials, ProviderError> {
            self.record(format!("grant:{username}:{password}:{realm}:{scope}"));
            self.grant.clone()
        }

        async fn interactive_authorize(&self, scope: &str) -> Result<Credentials, ProviderError> {
            self.record(format!("authorize:{scope}"));
            self.interactive.clone()
        }

        async fn user_info(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
            self.record(format!("userinfo:{access_token}"));
            self.profile.clone()
        }

        async fn clear_remote_session(&self) -> Result<(), ProviderError> {
            self.record("clear".to_string());
            self.clear.clone()
        }
    }

    /// Memory store that logs mutations and can fail writes to one key.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStore,
        writes: Mutex<Vec<String>>,
        fail_set: Option<&'static str>,
    }

    impl RecordingStore {
        fn writes(&self) -> Vec<String> {
            lock(&self.writes).clone()
        }

        async fn value(&self, key: &str) -> Option<String> {
            self.inner.get(key).await.unwrap()
        }

        async fn seed(&self, token: &str, user: &AuthUser) {
            self.inner.set(ACCESS_TOKEN_KEY, token).await.unwrap();
            self.inner
                .set(USER_PROFILE_KEY, &serde_json::to_string(user).unwrap())
                .await
                .unwrap();
        }
    }

    #[async_trait]
    impl CredentialStore for RecordingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            lock(&self.writes).push(format!("set:{key}"));
            if self.fail_set == Some(key) {
                return Err(StoreError::Backend("disk full".into()));
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            lock(&self.writes).push(format!("delete:{key}"));
            self.inner.delete(key).await
        }
    }

    fn controller(
        store: &Arc<RecordingStore>,
        provider: &Arc<FakeProvider>,
    ) -> SessionController {
        SessionController::new(Arc::clone(store) as _, Arc::clone(provider) as _)
    }

    fn stored_user() -> AuthUser {
        AuthUser {
            id: "auth0|123".into(),
            username: "alice".into(),
            email: None,
            name: None,
        }
    }

    fn record_states(session: &SessionController) -> Arc<Mutex<Vec<SessionState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.subscribe(move |state| lock(&sink).push(state.clone()));
        seen
    }

    fn signed_out() -> SessionState {
        SessionState {
            user: None,
            loading: false,
        }
    }

    #[test]
    fn test_initial_state_is_unknown() {
        let session = controller(&Arc::default(), &Arc::default());
        assert_eq!(session.snapshot(), SessionState::default());
        assert_eq!(session.phase(), SessionPhase::Unknown);
        assert!(session.is_loading());
    }

    #[tokio::test]
    async fn test_restore_without_records_is_signed_out_and_writes_nothing() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider::default());
        let session = controller(&store, &provider);

        session.restore().await;

        assert_eq!(session.snapshot(), signed_out());
        assert!(store.writes().is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_restore_rebuilds_user_from_provider() {
        let store = Arc::new(RecordingStore::default());
        store.seed("at-stored", &stored_user()).await;
        let provider = Arc::new(FakeProvider {
            profile: Ok(ProviderProfile {
                sub: Some("auth0|123".into()),
                nickname: Some("ali".into()),
                email: Some("a@x.com".into()),
                name: Some("Alice".into()),
            }),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);

        session.restore().await;

        assert_eq!(session.phase(), SessionPhase::Authenticated);
        assert!(!session.is_loading());
        let user = session.current_user().unwrap();
        assert_eq!(user.id, "auth0|123");
        assert_eq!(user.username, "ali");
        assert_eq!(user.name.as_deref(), Some("Alice"));
        assert_eq!(provider.calls(), vec!["userinfo:at-stored"]);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_restore_purges_records_for_invalid_token() {
        let store = Arc::new(RecordingStore::default());
        store.seed("at-expired", &stored_user()).await;
        let provider = Arc::new(FakeProvider {
            profile: Err(ProviderError::TokenInvalid),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);

        session.restore().await;

        assert_eq!(session.snapshot(), signed_out());
        assert_eq!(store.value(ACCESS_TOKEN_KEY).await, None);
        assert_eq!(store.value(USER_PROFILE_KEY).await, None);
    }

    #[tokio::test]
    async fn test_restore_purges_records_when_lookup_fails() {
        let store = Arc::new(RecordingStore::default());
        store.seed("at-stored", &stored_user()).await;
        let provider = Arc::new(FakeProvider {
            profile: Err(ProviderError::Network("offline".into())),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);

        session.restore().await;

        assert_eq!(session.snapshot(), signed_out());
        assert_eq!(store.value(ACCESS_TOKEN_KEY).await, None);
        assert_eq!(store.value(USER_PROFILE_KEY).await, None);
    }

    #[tokio::test]
    async fn test_restore_purges_partial_records() {
        let store = Arc::new(RecordingStore::default());
        store.inner.set(ACCESS_TOKEN_KEY, "orphan").await.unwrap();
        let provider = Arc::new(FakeProvider::default());
        let session = controller(&store, &provider);

        session.restore().await;

        assert_eq!(session.snapshot(), signed_out());
        assert_eq!(store.value(ACCESS_TOKEN_KEY).await, None);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_restore_purges_unreadable_profile() {
        let store = Arc::new(RecordingStore::default());
        store.inner.set(ACCESS_TOKEN_KEY, "at").await.unwrap();
        store.inner.set(USER_PROFILE_KEY, "{not json").await.unwrap();
        let provider = Arc::new(FakeProvider::default());
        let session = controller(&store, &provider);

        session.restore().await;

        assert_eq!(session.snapshot(), signed_out());
        assert_eq!(store.value(USER_PROFILE_KEY).await, None);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_restore_without_subject_reuses_cached_id() {
        let store = Arc::new(RecordingStore::default());
        store.seed("at", &stored_user()).await;
        let provider = Arc::new(FakeProvider {
            profile: Ok(ProviderProfile::default()),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);

        session.restore().await;

        let user = session.current_user().unwrap();
        assert_eq!(user.id, "auth0|123");
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn test_sign_in_rejects_blank_credentials_without_io() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider::default());
        let session = controller(&store, &provider);
        session.restore().await;
        let seen = record_states(&session);

        let err = session.sign_in("alice", "").await.unwrap_err();
        assert_eq!(err, SessionError::Validation(CREDENTIALS_REQUIRED.into()));

        let err = session.sign_in("   ", "secret").await.unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));

        assert!(provider.calls().is_empty());
        assert!(store.writes().is_empty());
        assert!(lock(&seen).is_empty());
        assert_eq!(session.snapshot(), signed_out());
    }

    #[tokio::test]
    async fn test_sign_in_persists_session() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider::default());
        let session = controller(&store, &provider);
        session.restore().await;

        session.sign_in("  alice ", " secret ").await.unwrap();

        let expected = AuthUser {
            id: "auth0|123".into(),
            username: "a@x.com".into(),
            email: Some("a@x.com".into()),
            name: None,
        };
        assert_eq!(session.current_user(), Some(expected.clone()));
        assert_eq!(session.phase(), SessionPhase::Authenticated);
        assert_eq!(
            provider.calls(),
            vec![
                format!("grant:alice:secret:{PASSWORD_REALM}:{DEFAULT_SCOPE}"),
                "userinfo:at-1".to_string(),
            ]
        );
        assert_eq!(store.value(ACCESS_TOKEN_KEY).await.as_deref(), Some("at-1"));
        let profile: AuthUser =
            serde_json::from_str(&store.value(USER_PROFILE_KEY).await.unwrap()).unwrap();
        assert_eq!(profile, expected);
    }

    #[tokio::test]
    async fn test_sign_in_falls_back_to_login_name() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider {
            profile: Ok(ProviderProfile {
                sub: Some("auth0|7".into()),
                ..ProviderProfile::default()
            }),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);

        session.sign_in(" alice ", "secret").await.unwrap();

        assert_eq!(session.current_user().unwrap().username, "alice");
    }

    #[tokio::test]
    async fn test_sign_in_passes_provider_message_through() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider {
            grant: Err(ProviderError::InvalidCredentials(
                "Wrong email or password.".into(),
            )),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);
        session.restore().await;

        let err = session.sign_in("alice", "nope").await.unwrap_err();

        assert_eq!(
            err,
            SessionError::AuthenticationFailed("Wrong email or password.".into())
        );
        assert_eq!(session.snapshot(), signed_out());
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_sign_in_network_failure_uses_generic_message() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider {
            grant: Err(ProviderError::Network("connection reset".into())),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);

        let err = session.sign_in("alice", "secret").await.unwrap_err();

        assert_eq!(err, SessionError::AuthenticationFailed(SIGN_IN_FAILED.into()));
    }

    #[tokio::test]
    async fn test_sign_in_profile_failure_leaves_no_records() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider {
            profile: Err(ProviderError::Network("timeout".into())),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);
        session.restore().await;

        let err = session.sign_in("alice", "secret").await.unwrap_err();

        assert!(matches!(err, SessionError::AuthenticationFailed(_)));
        assert_eq!(store.value(ACCESS_TOKEN_KEY).await, None);
        assert_eq!(store.value(USER_PROFILE_KEY).await, None);
        assert!(store.writes().is_empty());
        assert_eq!(session.snapshot(), signed_out());
    }

    #[tokio::test]
    async fn test_sign_in_rolls_back_token_when_profile_write_fails() {
        let store = Arc::new(RecordingStore {
            fail_set: Some(USER_PROFILE_KEY),
            ..RecordingStore::default()
        });
        let provider = Arc::new(FakeProvider::default());
        let session = controller(&store, &provider);
        session.restore().await;

        let err = session.sign_in("alice", "secret").await.unwrap_err();

        assert_eq!(err, SessionError::AuthenticationFailed(SIGN_IN_FAILED.into()));
        assert_eq!(store.value(ACCESS_TOKEN_KEY).await, None);
        assert_eq!(store.value(USER_PROFILE_KEY).await, None);
        assert_eq!(session.snapshot(), signed_out());
    }

    #[tokio::test]
    async fn test_sign_in_without_subject_fails() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider {
            profile: Ok(ProviderProfile {
                email: Some("a@x.com".into()),
                ..ProviderProfile::default()
            }),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);

        assert!(session.sign_in("alice", "secret").await.is_err());
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_interactive_sign_in_defaults_username() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider {
            profile: Ok(ProviderProfile {
                sub: Some("google-oauth2|5".into()),
                ..ProviderProfile::default()
            }),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);
        session.restore().await;

        session.sign_in_interactive().await.unwrap();

        let user = session.current_user().unwrap();
        assert_eq!(user.id, "google-oauth2|5");
        assert_eq!(user.username, "User");
        assert_eq!(
            provider.calls(),
            vec![format!("authorize:{DEFAULT_SCOPE}"), "userinfo:at-web".to_string()]
        );
        assert_eq!(store.value(ACCESS_TOKEN_KEY).await.as_deref(), Some("at-web"));
    }

    #[tokio::test]
    async fn test_interactive_cancel_is_a_no_op() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider {
            interactive: Err(ProviderError::UserCancelled),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);
        session.restore().await;
        let before = session.snapshot();

        session.sign_in_interactive().await.unwrap();

        assert_eq!(session.snapshot(), before);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_interactive_failure_surfaces_message() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider {
            interactive: Err(ProviderError::Network("dns".into())),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);
        session.restore().await;

        let err = session.sign_in_interactive().await.unwrap_err();

        assert_eq!(
            err,
            SessionError::AuthenticationFailed(INTERACTIVE_SIGN_IN_FAILED.into())
        );
        assert_eq!(session.snapshot(), signed_out());
    }

    #[tokio::test]
    async fn test_sign_out_survives_remote_failure() {
        let store = Arc::new(RecordingStore::default());
        store.seed("at-1", &stored_user()).await;
        let provider = Arc::new(FakeProvider {
            clear: Err(ProviderError::Network("unreachable".into())),
            ..FakeProvider::default()
        });
        let session = controller(&store, &provider);
        session.restore().await;
        assert_eq!(session.phase(), SessionPhase::Authenticated);

        session.sign_out().await;

        assert_eq!(session.snapshot(), signed_out());
        assert_eq!(store.value(ACCESS_TOKEN_KEY).await, None);
        assert_eq!(store.value(USER_PROFILE_KEY).await, None);
        assert!(provider.calls().contains(&"clear".to_string()));
    }

    #[tokio::test]
    async fn test_sign_out_without_token_skips_remote_clear() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider::default());
        let session = controller(&store, &provider);
        session.restore().await;

        session.sign_out().await;

        assert_eq!(session.snapshot(), signed_out());
        assert!(provider.calls().is_empty());
        assert_eq!(
            store.writes(),
            vec![
                format!("delete:{ACCESS_TOKEN_KEY}"),
                format!("delete:{USER_PROFILE_KEY}"),
            ]
        );
    }

    #[tokio::test]
    async fn test_corrupt_credential_file_heals_on_sign_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{\"access_token\": \"at-half").unwrap();
        let store: Arc<dyn CredentialStore> = Arc::new(FileStore::new(&path));
        let provider = Arc::new(FakeProvider::default());
        let session = SessionController::new(Arc::clone(&store), Arc::clone(&provider) as _);

        session.restore().await;
        assert_eq!(session.snapshot(), signed_out());

        session.sign_out().await;
        assert_eq!(session.snapshot(), signed_out());
        assert!(!path.exists());

        session.sign_in("alice", "secret").await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Authenticated);
        assert_eq!(
            store.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("at-1")
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_each_transition() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(FakeProvider::default());
        let session = controller(&store, &provider);
        session.restore().await;
        let seen = record_states(&session);

        session.sign_in("alice", "secret").await.unwrap();

        let states = lock(&seen).clone();
        assert_eq!(states.len(), 2);
        assert_eq!(
            states[0],
            SessionState {
                user: None,
                loading: true
            }
        );
        assert!(!states[1].loading);
        assert_eq!(states[1].user.as_ref().unwrap().id, "auth0|123");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_notifications() {
        let session = controller(&Arc::default(), &Arc::default());
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let id = session.subscribe(move |_| *lock(&sink) += 1);

        assert!(session.unsubscribe(id));
        assert!(!session.unsubscribe(id));
        session.restore().await;

        assert_eq!(*lock(&seen), 0);
    }

    #[tokio::test]
    async fn test_callbacks_may_read_the_controller() {
        let session = Arc::new(controller(&Arc::default(), &Arc::default()));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let reader = Arc::downgrade(&session);
        let sink = Arc::clone(&observed);
        session.subscribe(move |state| {
            if let Some(session) = reader.upgrade() {
                assert_eq!(&session.snapshot(), state);
                lock(&sink).push(session.phase());
            }
        });

        session.restore().await;

        assert_eq!(*lock(&observed), vec![SessionPhase::Unauthenticated]);
    }

    #[test]
    fn test_gate_follows_phase() {
        let user = stored_user();
        assert_eq!(Gate::resolve(true, &SessionState::default()), Gate::Loading);
        assert_eq!(Gate::resolve(true, &signed_out()), Gate::SignedOut);
        assert_eq!(
            Gate::resolve(
                true,
                &SessionState {
                    user: Some(user.clone()),
                    loading: false
                }
            ),
            Gate::SignedIn(user)
        );
    }

    #[test]
    fn test_gate_disabled_auth_uses_dev_user() {
        assert_eq!(
            Gate::resolve(false, &SessionState::default()),
            Gate::SignedIn(AuthUser::dev())
        );
    }
}
