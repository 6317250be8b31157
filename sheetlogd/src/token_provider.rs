use sheets_core::OAuthClient;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::storage::Credential;

#[derive(Debug, Error)]
pub enum TokenProviderError {
    #[error("oauth client is required to refresh expired token")]
    MissingOAuthClient,
    #[error("refresh token is missing")]
    MissingRefreshToken,
    #[error("oauth refresh failed: {0}")]
    OAuth(#[from] sheets_core::OAuthError),
}

/// Hands out access tokens, refreshing in memory once the current one is
/// about to expire. Refreshed tokens are not written back to the cache file.
pub struct TokenProvider {
    state: Credential,
    oauth_client: Option<OAuthClient>,
    refresh_skew: Duration,
}

impl TokenProvider {
    pub fn new(state: Credential, oauth_client: Option<OAuthClient>) -> Self {
        Self {
            state,
            oauth_client,
            refresh_skew: Duration::seconds(60),
        }
    }

    pub async fn valid_access_token(&mut self) -> Result<String, TokenProviderError> {
        if self.should_refresh() {
            self.refresh().await?;
        }
        Ok(self.state.access_token.clone())
    }

    pub fn state(&self) -> &Credential {
        &self.state
    }

    fn should_refresh(&self) -> bool {
        let Some(expires_at) = self.state.expires_at() else {
            return false;
        };
        expires_at <= OffsetDateTime::now_utc() + self.refresh_skew
    }

    async fn refresh(&mut self) -> Result<(), TokenProviderError> {
        let refresh_token = self
            .state
            .refresh_token
            .clone()
            .ok_or(TokenProviderError::MissingRefreshToken)?;
        let client = self
            .oauth_client
            .as_ref()
            .ok_or(TokenProviderError::MissingOAuthClient)?;
        let token = client.refresh_token(&refresh_token).await?;
        let mut refreshed = Credential::from_oauth_token(&token);
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        debug!(expiry = ?refreshed.expires_at(), "access token refreshed");
        self.state = refreshed;
        Ok(())
    }
}
