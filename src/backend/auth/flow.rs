//! Federated sign-in with PKCE and a loopback redirect
//!
//! # Flow overview
//!
//! 1. Generate a PKCE verifier/challenge pair.
//! 2. Bind a local TCP listener for the redirect callback.
//! 3. Build the `/authorize?provider=...` URL and open it in the browser.
//!    The identity service forwards the user to the provider and back.
//! 4. Accept the callback on `/callback`, extract `code`.
//! 5. Exchange `code` + verifier at `/token?grant_type=pkce` for a session.
//!
//! Token refresh and logout use the same endpoints and live here as well.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use url::Url;

use crate::backend::auth::pkce;
use crate::error::{Result, SmartmarkError};
use crate::model::{Session, User};

// ---------------------------------------------------------------------------
// OAuthFlowConfig
// ---------------------------------------------------------------------------

/// Parameters for the identity service of one backend project.
#[derive(Debug, Clone)]
pub struct OAuthFlowConfig {
    /// Base of the identity API, ending in `/` (e.g.
    /// `https://abc.supabase.co/auth/v1/`).
    pub auth_base: Url,

    /// Public project key sent as `apikey`.
    pub anon_key: String,

    /// Loopback port for the redirect; `0` lets the OS choose.
    pub redirect_port: u16,

    /// How long to wait for the browser to come back.
    pub callback_timeout: Duration,
}

impl OAuthFlowConfig {
    /// Derives the identity API base from a project URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use smartmark::backend::auth::flow::OAuthFlowConfig;
    ///
    /// let config = OAuthFlowConfig::for_project(
    ///     "https://abc.supabase.co",
    ///     "anon",
    ///     0,
    ///     Duration::from_secs(60),
    /// )
    /// .unwrap();
    /// assert_eq!(config.auth_base.as_str(), "https://abc.supabase.co/auth/v1/");
    /// ```
    pub fn for_project(
        project_url: &str,
        anon_key: &str,
        redirect_port: u16,
        callback_timeout: Duration,
    ) -> Result<Self> {
        let base = format!("{}/auth/v1/", project_url.trim_end_matches('/'));
        let auth_base = Url::parse(&base)
            .map_err(|e| SmartmarkError::Config(format!("invalid backend url: {e}")))?;
        Ok(Self {
            auth_base,
            anon_key: anon_key.to_string(),
            redirect_port,
            callback_timeout,
        })
    }
}

// ---------------------------------------------------------------------------
// Token endpoint response
// ---------------------------------------------------------------------------

/// Raw JSON response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    user: User,
}

impl TokenResponse {
    /// Absolute `expires_at` wins over relative `expires_in`.
    fn into_session(self) -> Session {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => chrono::DateTime::from_timestamp(at, 0),
            (None, Some(secs)) => Some(chrono::Utc::now() + chrono::Duration::seconds(secs)),
            (None, None) => None,
        };

        Session {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

// ---------------------------------------------------------------------------
// OAuthFlow
// ---------------------------------------------------------------------------

/// Drives sign-in, refresh and logout against the identity service.
///
/// The flow does not persist anything; [`super::HttpAuth`] stores and
/// publishes the sessions it returns.
pub struct OAuthFlow {
    http: Arc<reqwest::Client>,
    config: OAuthFlowConfig,
}

impl OAuthFlow {
    /// Creates a flow sharing `http`.
    pub fn new(http: Arc<reqwest::Client>, config: OAuthFlowConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.config
            .auth_base
            .join(path)
            .map_err(|e| SmartmarkError::Config(format!("invalid auth endpoint {path}: {e}")).into())
    }

    /// Runs the full browser sign-in for `provider` and returns the new
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`SmartmarkError::Authentication`] if the listener cannot be
    /// bound, the browser does not come back within the callback timeout,
    /// the provider reports an error, or the code exchange fails.
    pub async fn authorize(&self, provider: &str) -> Result<Session> {
        let pkce = pkce::generate();

        let listener =
            tokio::net::TcpListener::bind(format!("127.0.0.1:{}", self.config.redirect_port))
                .await
                .map_err(|e| {
                    SmartmarkError::Authentication(format!(
                        "failed to bind redirect listener: {e}"
                    ))
                })?;
        let port = listener
            .local_addr()
            .map_err(|e| SmartmarkError::Authentication(format!("no local address: {e}")))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");

        let auth_url = self.build_authorization_url(provider, &redirect_uri, &pkce.challenge)?;

        eprintln!(
            "Open the following URL in your browser to sign in:\n{}",
            auth_url
        );
        try_open_browser(auth_url.as_str());
        tracing::debug!(provider, port, "Waiting for sign-in redirect");

        let code = tokio::time::timeout(self.config.callback_timeout, accept_callback(listener))
            .await
            .map_err(|_| {
                SmartmarkError::Authentication("timed out waiting for sign-in redirect".into())
            })??;

        self.exchange_code(&code, &pkce.verifier).await
    }

    /// Builds the authorize URL for `provider`.
    pub fn build_authorization_url(
        &self,
        provider: &str,
        redirect_uri: &str,
        code_challenge: &str,
    ) -> Result<Url> {
        let mut url = self.endpoint("authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_uri)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url)
    }

    /// Exchanges an authorization code and its PKCE verifier for a session.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<Session> {
        let body = serde_json::json!({
            "auth_code": code,
            "code_verifier": code_verifier,
        });
        self.token_request("pkce", &body).await
    }

    /// Exchanges a refresh token for a new session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        self.token_request("refresh_token", &body).await
    }

    async fn token_request(&self, grant_type: &str, body: &serde_json::Value) -> Result<Session> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let resp = self
            .http
            .post(url)
            .header("apikey", &self.config.anon_key)
            .json(body)
            .send()
            .await
            .map_err(SmartmarkError::Http)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(SmartmarkError::Authentication(format!(
                "token endpoint returned {status}: {text}"
            ))
            .into());
        }

        let raw: TokenResponse = resp.json().await.map_err(|e| {
            SmartmarkError::Authentication(format!("failed to parse token response: {e}"))
        })?;

        Ok(raw.into_session())
    }

    /// Revokes the session server-side.
    pub async fn logout(&self, access_token: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.endpoint("logout")?)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(SmartmarkError::Authentication(format!(
                "logout returned {status}: {text}"
            ))
            .into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redirect callback
// ---------------------------------------------------------------------------

/// Accepts connections until one hits `/callback`, answers it, and returns
/// the authorization code. Other paths (e.g. `/favicon.ico`) get a 404.
async fn accept_callback(listener: tokio::net::TcpListener) -> Result<String> {
    loop {
        let (stream, _peer) = listener.accept().await.map_err(|e| {
            SmartmarkError::Authentication(format!("failed to accept callback connection: {e}"))
        })?;

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        loop {
            let mut header = String::new();
            let n = reader.read_line(&mut header).await?;
            if n == 0 || header.trim().is_empty() {
                break;
            }
        }

        let target = request_line.split_whitespace().nth(1).unwrap_or("/");
        let outcome = parse_callback(target);

        let response = match &outcome {
            Ok(Some(_)) => http_response("200 OK", "Signed in to Smartmark. You may close this tab."),
            Ok(None) => http_response("404 Not Found", "Not found"),
            Err(e) => http_response("400 Bad Request", &format!("Sign-in failed: {e}")),
        };
        let _ = write_half.write_all(response.as_bytes()).await;
        let _ = write_half.shutdown().await;

        if let Some(code) = outcome? {
            return Ok(code);
        }
    }
}

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Interprets a request target received on the loopback listener.
///
/// - `Ok(Some(code))` for `/callback?code=...`
/// - `Ok(None)` for any other path
/// - `Err` when the callback carries `error`/`error_description` or lacks a
///   code
pub fn parse_callback(target: &str) -> Result<Option<String>> {
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| SmartmarkError::Authentication(format!("malformed callback: {e}")))?;

    if url.path() != "/callback" {
        return Ok(None);
    }

    let mut code = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let detail = description.unwrap_or_default();
        return Err(SmartmarkError::Authentication(format!(
            "provider returned {error}: {detail}"
        ))
        .into());
    }

    code.map(Some).ok_or_else(|| {
        SmartmarkError::Authentication("authorization code missing from callback".to_string())
            .into()
    })
}

/// Best-effort attempt to open `url` in the user's browser; the URL has
/// already been printed for manual use.
fn try_open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open").arg(url).spawn();
    }
    #[cfg(target_os = "windows")]
    {
        let _ = std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn();
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        let _ = url;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> OAuthFlow {
        let config = OAuthFlowConfig::for_project(
            "https://abc.supabase.co/",
            "anon",
            0,
            Duration::from_secs(5),
        )
        .unwrap();
        OAuthFlow::new(Arc::new(reqwest::Client::new()), config)
    }

    #[test]
    fn test_authorization_url_contains_pkce_and_provider() {
        let url = flow()
            .build_authorization_url("google", "http://127.0.0.1:5000/callback", "chal")
            .unwrap();
        assert_eq!(url.path(), "/auth/v1/authorize");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("provider").map(String::as_str), Some("google"));
        assert_eq!(
            pairs.get("redirect_to").map(String::as_str),
            Some("http://127.0.0.1:5000/callback")
        );
        assert_eq!(pairs.get("code_challenge").map(String::as_str), Some("chal"));
        assert_eq!(
            pairs.get("code_challenge_method").map(String::as_str),
            Some("s256")
        );
    }

    #[test]
    fn test_parse_callback_with_code() {
        let code = parse_callback("/callback?code=abc%20123").unwrap();
        assert_eq!(code, Some("abc 123".to_string()));
    }

    #[test]
    fn test_parse_callback_other_path() {
        assert_eq!(parse_callback("/favicon.ico").unwrap(), None);
    }

    #[test]
    fn test_parse_callback_provider_error() {
        let err = parse_callback("/callback?error=access_denied&error_description=nope")
            .unwrap_err()
            .to_string();
        assert!(err.contains("access_denied"));
        assert!(err.contains("nope"));
    }

    #[test]
    fn test_parse_callback_missing_code() {
        assert!(parse_callback("/callback?foo=bar").is_err());
    }

    #[test]
    fn test_token_response_prefers_absolute_expiry() {
        let raw: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "a",
            "expires_in": 3600,
            "expires_at": 1_800_000_000i64,
            "user": {"id": "u"}
        }))
        .unwrap();
        let session = raw.into_session();
        assert_eq!(session.token_type, "bearer");
        assert_eq!(session.expires_at.unwrap().timestamp(), 1_800_000_000);
    }

    #[tokio::test]
    async fn test_accept_callback_skips_unrelated_requests() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_callback(listener));

        for target in ["/favicon.ico", "/callback?code=xyz"] {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut buf = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf)
                .await
                .unwrap();
        }

        let code = server.await.unwrap().unwrap();
        assert_eq!(code, "xyz");
    }
}
