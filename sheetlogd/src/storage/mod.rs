mod credential_cache;

pub use credential_cache::{CredentialCache, CredentialError, default_cache_path};

use serde::{Deserialize, Serialize};
use sheets_core::OAuthToken;
use time::{Duration, OffsetDateTime};

/// Bearer token plus the metadata needed to refresh it.
///
/// Serialized in the same shape the Go `oauth2.Token` uses, so existing
/// cache files keep working: `expiry` is RFC 3339 and a zero or missing
/// value means the token never expires.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expiry: Option<OffsetDateTime>,
}

impl Credential {
    pub fn from_oauth_token(token: &OAuthToken) -> Self {
        Self::from_oauth_token_at(token, OffsetDateTime::now_utc())
    }

    pub fn from_oauth_token_at(token: &OAuthToken, issued_at: OffsetDateTime) -> Self {
        let expiry = token
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| issued_at + Duration::seconds(secs));
        Self {
            access_token: token.access_token.clone(),
            token_type: Some(token.token_type.clone()),
            refresh_token: token.refresh_token.clone(),
            expiry,
        }
    }

    /// Expiry as a real instant; the zero time written by Go clients counts as none.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expiry.filter(|expiry| expiry.year() > 1)
    }
}
