use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sheets_core::{ClientSecret, OAuthClient};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};
use url::Url;

use crate::storage::Credential;

/// Scope needed to read and append spreadsheet values.
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const OUT_OF_BAND_REDIRECT: &str = "urn:ietf:wg:oauth:2.0:oob";
const AUTH_STATE: &str = "state-token";

#[derive(Debug, Error)]
pub enum OAuthFlowError {
    #[error("oauth error: {0}")]
    OAuth(#[from] sheets_core::OAuthError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read client secret {path}: {source}")]
    ClientSecret {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("authorization code missing in redirect")]
    MissingCode,
    #[error("authorization timed out")]
    Timeout,
    #[error("authorization cancelled by user")]
    Cancelled,
}

/// Source of fresh credentials when nothing usable is cached.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn authorize(&self, scope: &str) -> Result<Credential, OAuthFlowError>;
}

/// Interactive installed-app authorization: the user opens the consent URL
/// and the code comes back either through a loopback redirect or by hand.
pub struct OAuthFlow {
    client: OAuthClient,
    redirect_uris: Vec<String>,
}

impl OAuthFlow {
    pub fn new(secret: &ClientSecret) -> Result<Self, OAuthFlowError> {
        Ok(Self {
            client: OAuthClient::from_client_secret(secret)?,
            redirect_uris: secret.redirect_uris.clone(),
        })
    }

    pub fn from_client_secret_file(path: &Path) -> Result<Self, OAuthFlowError> {
        let secret = read_client_secret(path)?;
        Self::new(&secret)
    }

    pub fn oauth_client(&self) -> &OAuthClient {
        &self.client
    }

    async fn wait_for_code(&self, scope: &str) -> Result<(String, String), OAuthFlowError> {
        if prefers_loopback_flow() {
            match self.wait_for_code_via_loopback(scope).await {
                Ok(pair) => return Ok(pair),
                Err(OAuthFlowError::Cancelled) => return Err(OAuthFlowError::Cancelled),
                Err(err) => {
                    warn!(error = %err, "loopback authorization unavailable, falling back to manual code entry");
                }
            }
        }
        self.wait_for_code_manual(scope).await
    }

    async fn wait_for_code_manual(
        &self,
        scope: &str,
    ) -> Result<(String, String), OAuthFlowError> {
        let redirect_uri = manual_redirect_uri(&self.redirect_uris).to_string();
        let url = self
            .client
            .authorize_url(&redirect_uri, scope, Some(AUTH_STATE));
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(
                format!(
                    "Go to the following link in your browser then type the authorization code:\n{url}\n"
                )
                .as_bytes(),
            )
            .await?;
        stdout.flush().await?;

        let mut input = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut input)
            .await?;
        let code = input.trim();
        if read == 0 || code.is_empty() {
            return Err(OAuthFlowError::Cancelled);
        }
        Ok((code.to_string(), redirect_uri))
    }

    async fn wait_for_code_via_loopback(
        &self,
        scope: &str,
    ) -> Result<(String, String), OAuthFlowError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let redirect_uri = format!("http://127.0.0.1:{}", addr.port());
        let url = self
            .client
            .authorize_url(&redirect_uri, scope, Some(AUTH_STATE));
        info!("open this URL in your browser to authorize spreadsheet access: {url}");

        let (mut stream, _) = tokio::time::timeout(oauth_timeout(), listener.accept())
            .await
            .map_err(|_| OAuthFlowError::Timeout)??;

        let mut request = vec![0u8; 8192];
        let read = tokio::time::timeout(Duration::from_secs(10), stream.read(&mut request))
            .await
            .map_err(|_| OAuthFlowError::Timeout)??;
        let request_text = String::from_utf8_lossy(&request[..read]);
        let code =
            extract_code_from_http_request(&request_text).ok_or(OAuthFlowError::MissingCode)?;

        let _ = stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
                <html><body><h2>Spreadsheet access granted</h2><p>You can close this tab.</p></body></html>",
            )
            .await;
        let _ = stream.shutdown().await;

        Ok((code, redirect_uri))
    }
}

#[async_trait]
impl CredentialProvider for OAuthFlow {
    async fn authorize(&self, scope: &str) -> Result<Credential, OAuthFlowError> {
        let (code, redirect_uri) = self.wait_for_code(scope).await?;
        let token = self.client.exchange_code(&code, &redirect_uri).await?;
        info!("authorization code exchanged for an access token");
        Ok(Credential::from_oauth_token(&token))
    }
}

pub fn read_client_secret(path: &Path) -> Result<ClientSecret, OAuthFlowError> {
    let raw = std::fs::read_to_string(path).map_err(|source| OAuthFlowError::ClientSecret {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(ClientSecret::from_json(&raw)?)
}

fn manual_redirect_uri(redirect_uris: &[String]) -> &str {
    redirect_uris
        .iter()
        .find(|uri| !uri.trim().is_empty())
        .map(String::as_str)
        .unwrap_or(OUT_OF_BAND_REDIRECT)
}

fn extract_code_from_http_request(request: &str) -> Option<String> {
    let request_line = request.lines().next()?;
    let target = request_line.split_whitespace().nth(1)?;
    let request_url = if target.starts_with("http://") || target.starts_with("https://") {
        Url::parse(target).ok()?
    } else {
        Url::parse(&format!("http://127.0.0.1{target}")).ok()?
    };
    request_url
        .query_pairs()
        .find_map(|(key, value)| (key == "code" && !value.is_empty()).then(|| value.into_owned()))
}

fn prefers_loopback_flow() -> bool {
    if env_flag("SHEETLOG_OAUTH_FORCE_MANUAL") {
        return false;
    }
    has_graphical_session()
}

fn has_graphical_session() -> bool {
    has_non_empty_env("WAYLAND_DISPLAY") || has_non_empty_env("DISPLAY")
}

fn has_non_empty_env(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .is_some()
}

fn oauth_timeout() -> Duration {
    let secs = std::env::var("SHEETLOG_OAUTH_TIMEOUT_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(180);
    Duration::from_secs(secs)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_code_from_request_line() {
        let req = "GET /?state=state-token&code=4/abc123&scope=x HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
        assert_eq!(
            extract_code_from_http_request(req).as_deref(),
            Some("4/abc123")
        );
    }

    #[test]
    fn returns_none_when_code_missing() {
        let req = "GET /?error=access_denied HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
        assert!(extract_code_from_http_request(req).is_none());
    }

    #[test]
    fn manual_redirect_prefers_registered_uri() {
        let uris = vec!["".to_string(), "http://localhost".to_string()];
        assert_eq!(manual_redirect_uri(&uris), "http://localhost");
        assert_eq!(manual_redirect_uri(&[]), OUT_OF_BAND_REDIRECT);
    }

    #[test]
    fn reading_missing_client_secret_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_secret.json");
        let err = read_client_secret(&path).expect_err("missing file must fail");
        match err {
            OAuthFlowError::ClientSecret { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn builds_flow_from_client_secret_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_secret.json");
        std::fs::write(
            &path,
            r#"{"installed":{"client_id":"id","client_secret":"shh","redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap();
        let flow = OAuthFlow::from_client_secret_file(&path).expect("flow should build");
        let url = flow
            .oauth_client()
            .authorize_url("http://localhost", SPREADSHEETS_SCOPE, None);
        assert!(url.as_str().contains("client_id=id"));
    }
}
