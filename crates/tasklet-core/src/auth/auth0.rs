//! Auth0 implementation of [`IdentityProvider`].
//!
//! Password grants go straight to `/oauth/token`. The interactive flow is a
//! PKCE authorization-code login in the system browser, redirected back to a
//! short-lived listener on localhost.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::error::ProviderError;
use super::provider::IdentityProvider;
use super::user::{Credentials, ProviderProfile};
use crate::config::AuthConfig;

const PASSWORD_REALM_GRANT: &str = "http://auth0.com/oauth/grant-type/password-realm";
/// Local OAuth callback path (port comes from config).
pub const LOCAL_CALLBACK_PATH: &str = "/callback";
/// Callback error code Auth0 sends when the user declines or closes the login.
const ACCESS_DENIED: &str = "access_denied";

/// Set to skip launching a browser (CI, tests, headless hosts).
pub const NO_BROWSER_ENV: &str = "TASKLET_NO_BROWSER";

type UrlSink = Box<dyn Fn(&str) + Send + Sync>;

/// PKCE code verifier and challenge
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

/// Generate PKCE code verifier and challenge
pub fn generate_pkce() -> Pkce {
    // Two v4 UUIDs give 32 random bytes.
    let uuid1 = uuid::Uuid::new_v4();
    let uuid2 = uuid::Uuid::new_v4();
    let mut verifier_bytes = [0u8; 32];
    verifier_bytes[..16].copy_from_slice(uuid1.as_bytes());
    verifier_bytes[16..].copy_from_slice(uuid2.as_bytes());
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    Pkce {
        verifier,
        challenge,
    }
}

/// Builds the redirect URI for a given localhost port.
pub fn build_redirect_uri(port: u16) -> String {
    format!("http://localhost:{port}{LOCAL_CALLBACK_PATH}")
}

/// HTTP client for an Auth0 tenant.
pub struct Auth0Client {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    audience: Option<String>,
    logout_return_to: Option<String>,
    callback_port: u16,
    callback_timeout: Duration,
    open_browser: bool,
    url_sink: Option<UrlSink>,
}

impl Auth0Client {
    /// Creates a client from the `[auth]` config section.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &AuthConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.effective_base_url(),
            client_id: config.client_id.clone(),
            audience: config.audience.clone(),
            logout_return_to: config.logout_return_to.clone(),
            callback_port: config.callback_port,
            callback_timeout: config.callback_timeout(),
            open_browser: std::env::var_os(NO_BROWSER_ENV).is_none(),
            url_sink: None,
        })
    }

    /// Disables launching the system browser during the interactive flow.
    #[must_use]
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// Registers a callback that receives the authorize and logout URLs, e.g. to print them.
    #[must_use]
    pub fn with_url_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.url_sink = Some(Box::new(sink));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the `/authorize` URL for the hosted login page.
    pub fn build_auth_url(&self, pkce: &Pkce, state: &str, redirect_uri: &str, scope: &str) -> String {
        let mut params = vec![
            ("response_type", "code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", scope),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("state", state),
        ];
        if let Some(audience) = self.audience.as_deref() {
            params.push(("audience", audience));
        }

        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        format!("{}/authorize?{query}", self.base_url)
    }

    /// Builds the `/v2/logout` URL that ends the provider's browser session.
    pub fn build_logout_url(&self) -> String {
        let mut params = vec![("client_id", self.client_id.as_str())];
        if let Some(return_to) = self.logout_return_to.as_deref() {
            params.push(("returnTo", return_to));
        }

        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        format!("{}/v2/logout?{query}", self.base_url)
    }

    /// Hands `url` to the sink and, unless disabled, the system browser.
    ///
    /// Returns false if neither could present it.
    fn present_url(&self, url: &str) -> bool {
        let mut presented = false;
        if let Some(sink) = &self.url_sink {
            sink(url);
            presented = true;
        }
        if self.open_browser {
            match open::that(url) {
                Ok(()) => presented = true,
                Err(e) => warn!("failed to open browser: {e}"),
            }
        }
        presented
    }

    async fn token_request(&self, body: serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .json(&body)
            .send()
            .await?;
        Ok(response)
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce: &Pkce,
        redirect_uri: &str,
    ) -> Result<Credentials, ProviderError> {
        let response = self
            .token_request(serde_json::json!({
                "grant_type": "authorization_code",
                "client_id": self.client_id,
                "code": code,
                "code_verifier": pkce.verifier,
                "redirect_uri": redirect_uri,
            }))
            .await?;

        let status = response.status();
        if status.is_success() {
            return parse_credentials(response).await;
        }
        let message = error_message(response).await;
        if status.is_client_error() {
            Err(ProviderError::Rejected(message))
        } else {
            Err(ProviderError::Network(format!("HTTP {status}: {message}")))
        }
    }

    async fn bind_callback(&self) -> Result<TcpListener, ProviderError> {
        TcpListener::bind(("127.0.0.1", self.callback_port))
            .await
            .map_err(|e| {
                ProviderError::Network(format!(
                    "could not listen for the login redirect on port {}: {e}",
                    self.callback_port
                ))
            })
    }
}

#[async_trait]
impl IdentityProvider for Auth0Client {
    async fn password_grant(
        &self,
        username: &str,
        password: &str,
        realm: &str,
        scope: &str,
    ) -> Result<Credentials, ProviderError> {
        let mut body = serde_json::json!({
            "grant_type": PASSWORD_REALM_GRANT,
            "client_id": self.client_id,
            "username": username,
            "password": password,
            "realm": realm,
            "scope": scope,
        });
        if let Some(audience) = self.audience.as_deref() {
            body["audience"] = serde_json::Value::from(audience);
        }

        let response = self.token_request(body).await?;
        let status = response.status();
        if status.is_success() {
            return parse_credentials(response).await;
        }

        let message = error_message(response).await;
        debug!(%status, "password grant refused");
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(ProviderError::InvalidCredentials(message))
        } else {
            Err(ProviderError::Network(format!("HTTP {status}: {message}")))
        }
    }

    async fn interactive_authorize(&self, scope: &str) -> Result<Credentials, ProviderError> {
        let listener = self.bind_callback().await?;
        let port = listener
            .local_addr()
            .map_err(|e| ProviderError::Network(e.to_string()))?
            .port();

        let pkce = generate_pkce();
        let state = uuid::Uuid::new_v4().to_string();
        let redirect_uri = build_redirect_uri(port);
        let auth_url = self.build_auth_url(&pkce, &state, &redirect_uri, scope);

        self.present_url(&auth_url);
        info!(port, "waiting for login redirect");

        let outcome = match tokio::time::timeout(self.callback_timeout, wait_for_callback(&listener))
            .await
        {
            Ok(outcome) => outcome?,
            Err(_) => {
                info!("no login redirect before timeout; treating as cancelled");
                return Err(ProviderError::UserCancelled);
            }
        };

        if outcome.state.as_deref() != Some(state.as_str()) {
            return Err(ProviderError::Rejected("State mismatch".to_string()));
        }

        match outcome {
            CallbackParams {
                code: Some(code),
                error: None,
                ..
            } => self.exchange_code(&code, &pkce, &redirect_uri).await,
            CallbackParams {
                error: Some(error),
                error_description,
                ..
            } => {
                if error == ACCESS_DENIED {
                    Err(ProviderError::UserCancelled)
                } else {
                    Err(ProviderError::Rejected(error_description.unwrap_or(error)))
                }
            }
            CallbackParams { .. } => Err(ProviderError::Rejected(
                "Authorization code missing from redirect".to_string(),
            )),
        }
    }

    async fn user_info(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .http
            .get(format!("{}/userinfo", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => response
                .json::<ProviderProfile>()
                .await
                .map_err(|e| ProviderError::Network(format!("invalid userinfo response: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                Err(ProviderError::TokenInvalid)
            }
            _ => {
                let message = error_message(response).await;
                Err(ProviderError::Network(format!("HTTP {status}: {message}")))
            }
        }
    }

    /// The provider's SSO cookie lives in the browser, so logout has to go
    /// through it too.
    async fn clear_remote_session(&self) -> Result<(), ProviderError> {
        let logout_url = self.build_logout_url();
        if self.present_url(&logout_url) {
            info!("presented provider logout");
            Ok(())
        } else {
            Err(ProviderError::Rejected(
                "no browser available to end the provider session".to_string(),
            ))
        }
    }
}

async fn parse_credentials(response: reqwest::Response) -> Result<Credentials, ProviderError> {
    response
        .json::<Credentials>()
        .await
        .map_err(|e| ProviderError::Network(format!("invalid token response: {e}")))
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Extracts the most useful human message from an Auth0 error response.
async fn error_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed
            .error_description
            .or(parsed.message)
            .or(parsed.error)
            .unwrap_or(body),
        Err(_) => body,
    }
}

/// Query parameters of the login redirect.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Parses the request line of a redirect hitting the local listener.
///
/// Returns `None` for anything that isn't the callback path (favicon probes etc).
pub fn parse_callback_request(request: &str) -> Option<CallbackParams> {
    let request_line = request.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    let path = parts.next()?;

    let url = url::Url::parse(&format!("http://localhost{path}")).ok()?;
    if url.path() != LOCAL_CALLBACK_PATH {
        return None;
    }

    let mut params = CallbackParams::default();
    for (key, value) in url.query_pairs() {
        let value = Some(value.into_owned());
        match key.as_ref() {
            "code" => params.code = value,
            "state" => params.state = value,
            "error" => params.error = value,
            "error_description" => params.error_description = value,
            _ => {}
        }
    }
    Some(params)
}

async fn wait_for_callback(listener: &TcpListener) -> Result<CallbackParams, ProviderError> {
    loop {
        let (mut stream, _) = listener
            .accept()
            .await
            .map_err(|e| ProviderError::Network(format!("login redirect listener failed: {e}")))?;

        let mut buffer = [0u8; 4096];
        let read = stream.read(&mut buffer).await.unwrap_or(0);
        let request = String::from_utf8_lossy(&buffer[..read]);

        match parse_callback_request(&request) {
            Some(params) => {
                let page = if params.code.is_some() {
                    success_response()
                } else {
                    failure_response()
                };
                respond(&mut stream, &page).await;
                return Ok(params);
            }
            None => respond(&mut stream, &not_found_response()).await,
        }
    }
}

async fn respond(stream: &mut TcpStream, response: &str) {
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("failed to answer login redirect: {e}");
    }
    let _ = stream.shutdown().await;
}

fn success_response() -> String {
    let body = "<!doctype html><html><head><meta charset=\"utf-8\" /><title>Signed in</title></head><body><p>Signed in. Return to your terminal to continue.</p></body></html>";
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn failure_response() -> String {
    let body = "Sign-in did not complete. Return to your terminal.";
    format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn not_found_response() -> String {
    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
}
