//! Stored credentials and OAuth2 token refresh.
//!
//! Tokens live on the user row. When the provider answers 401 the access
//! token is refreshed once with the stored refresh token, the new pair is
//! persisted and the call is retried once.

use crate::config::ProviderConfig;
use crate::error::{Result, ShelfError};
use crate::model::{Credential, TokenPair};
use crate::provider::{TweetPage, TweetsProvider};
use crate::storage::SharedStorage;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// Exchanges a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// # Errors
    ///
    /// `Auth` when the token endpoint rejects the refresh token or cannot be
    /// reached.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair>;
}

/// OAuth2 `refresh_token` grant against the provider's token endpoint.
pub struct OAuthRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl OAuthRefresher {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShelfError::with_context("failed to build token client", e))?;
        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
        })
    }

    /// Refresher for the configured client, or `None` without a client id.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Self>> {
        let Some(client_id) = config.client_id.clone() else {
            return Ok(None);
        };
        Self::new(
            config.token_url.clone(),
            client_id,
            config.client_secret.clone(),
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        if refresh_token.is_empty() {
            return Err(ShelfError::auth("no refresh token available"));
        }
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];

        let mut request = self.client.post(&self.token_url).form(&form);
        if let Some(secret) = &self.client_secret {
            request = request.basic_auth(&self.client_id, Some(secret));
        }
        let response = request
            .send()
            .await
            .map_err(|e| ShelfError::auth(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShelfError::auth(format!("token refresh rejected with HTTP {status}")));
        }
        response
            .json::<TokenPair>()
            .await
            .map_err(|e| ShelfError::auth(format!("invalid token response: {e}")))
    }
}

/// Per-user credential access over storage.
#[derive(Clone)]
pub struct TokenStore {
    storage: SharedStorage,
}

impl TokenStore {
    #[must_use]
    pub const fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown user, `Auth` when no access token is stored.
    pub fn get(&self, user_id: i64) -> Result<Credential> {
        let user = self
            .storage
            .lock()
            .get_user(user_id)?
            .ok_or_else(|| ShelfError::not_found("User", user_id))?;
        let access_token = user
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ShelfError::auth(format!("user {user_id} has no stored access token")))?;
        Ok(Credential {
            account_id: user.twitter_id,
            access_token,
            refresh_token: user.refresh_token,
        })
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown user.
    pub fn set(&self, user_id: i64, tokens: &TokenPair) -> Result<()> {
        self.storage
            .lock()
            .set_tokens(user_id, &tokens.access_token, tokens.refresh_token.as_deref())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown user.
    pub fn clear(&self, user_id: i64) -> Result<()> {
        self.storage.lock().clear_tokens(user_id)?;
        info!(user_id, "Cleared stored tokens");
        Ok(())
    }

    /// Fetch one page, refreshing the credential once on a 401.
    ///
    /// On success after a refresh, `credential` holds the new tokens so the
    /// rest of the run uses them.
    ///
    /// # Errors
    ///
    /// `Auth` when refresh is impossible or fails, otherwise the provider
    /// error of the (last) call.
    pub async fn fetch_page(
        &self,
        provider: &dyn TweetsProvider,
        refresher: Option<&dyn TokenRefresher>,
        user_id: i64,
        credential: &mut Credential,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<TweetPage> {
        match provider.fetch_page(credential, cursor, page_size).await {
            Ok(page) => return Ok(page),
            Err(e) if !e.is_unauthorized() => return Err(e.into()),
            Err(e) => warn!(user_id, error = %e, "Access token rejected; refreshing"),
        }

        let refresher =
            refresher.ok_or_else(|| ShelfError::auth("access token rejected and no token refresher configured"))?;
        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or_else(|| ShelfError::auth("access token rejected and no refresh token stored"))?;

        let fresh = refresher.refresh(&refresh_token).await?;
        self.set(user_id, &fresh)?;
        credential.access_token = fresh.access_token;
        if let Some(token) = fresh.refresh_token {
            credential.refresh_token = Some(token);
        }
        info!(user_id, "Refreshed access token");

        Ok(provider.fetch_page(credential, cursor, page_size).await?)
    }
}
