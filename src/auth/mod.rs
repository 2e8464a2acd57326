pub mod cache;
pub mod pkce;
pub mod provider;
pub mod select;

pub use cache::{AppScope, CachedAccount, TokenCache};
pub use provider::{
    AccessToken, AuthorizationRequest, IdentityProvider, MicrosoftIdentity, TokenResponse,
};

use crate::browser::BrowserLauncher;
use crate::callback::CallbackListener;
use crate::config::FixConfig;
use crate::errors::FixError;
use anyhow::{Context, Result};
use chrono::Utc;
use pkce::{PkcePair, random_token};
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub redirect_bind: SocketAddr,
    pub callback_timeout: Duration,
}

impl From<&FixConfig> for AuthSettings {
    fn from(config: &FixConfig) -> Self {
        Self {
            redirect_bind: config.redirect_bind,
            callback_timeout: config.callback_timeout,
        }
    }
}

/// `http://localhost:{port}`; the provider redirects by host name.
pub fn redirect_uri_for(port: u16) -> String {
    format!("http://localhost:{port}")
}

pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    browser: Arc<dyn BrowserLauncher>,
    settings: AuthSettings,
}

impl Authenticator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        browser: Arc<dyn BrowserLauncher>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            provider,
            browser,
            settings,
        }
    }

    /// Cached accounts first (chosen by `preset` or interactively), then the
    /// browser flow when none exist or none can be refreshed silently.
    pub async fn authenticate<R, W>(
        &self,
        cache: &mut TokenCache,
        preset: Option<&str>,
        input: &mut R,
        output: &mut W,
    ) -> Result<AccessToken>
    where
        R: BufRead,
        W: Write,
    {
        if !cache.accounts().is_empty() {
            let index = match preset {
                Some(preset) => select::match_preset(preset, cache.accounts())?,
                None => select::choose_account(cache.accounts(), input, output)?,
            };
            let home_account_id = cache.accounts()[index].home_account_id.clone();
            if let Some(token) = self.acquire_silent(cache, &home_account_id).await {
                return Ok(token);
            }
        }

        let response = self.acquire_interactive().await?;
        let Some(token) = response.access_token() else {
            return Err(response.into_error().into());
        };

        match CachedAccount::from_response(&response, cache.app(), Utc::now()) {
            Some(account) => {
                tracing::info!(username = %account.username, "signed in");
                cache.upsert(account);
                persist(cache);
            }
            None => tracing::warn!("token response carried no id token; account not cached"),
        }
        Ok(token)
    }

    /// Token for a cached account without user interaction. Any failure is
    /// logged and reported as `None` so the caller can fall back.
    pub async fn acquire_silent(
        &self,
        cache: &mut TokenCache,
        home_account_id: &str,
    ) -> Option<AccessToken> {
        let mut account = cache.find(home_account_id)?.clone();
        let scope = cache.app().scope.clone();
        if let Some(token) = account.usable_access_token(&scope, Utc::now()) {
            tracing::debug!(username = %account.username, "using cached access token");
            return Some(token);
        }

        let refresh_token = account.refresh_token.clone()?;
        match self.provider.refresh(&refresh_token).await {
            Ok(response) if response.access_token.is_some() => {
                account.apply(&response, &scope, Utc::now());
                let token = response.access_token();
                cache.upsert(account);
                persist(cache);
                token
            }
            Ok(response) => {
                tracing::warn!(
                    error = ?response.error,
                    description = ?response.error_description,
                    "silent token refresh rejected"
                );
                if response.error.as_deref() == Some("invalid_grant") {
                    cache.remove(home_account_id);
                    persist(cache);
                }
                None
            }
            Err(error) => {
                tracing::warn!("silent token refresh failed: {error:#}");
                None
            }
        }
    }

    /// Authorization code flow with PKCE through the system browser and the
    /// loopback listener. Exactly one code exchange happens per call.
    pub async fn acquire_interactive(&self) -> Result<TokenResponse> {
        let pkce = PkcePair::generate();
        let state = random_token(16);

        let listener = CallbackListener::bind(self.settings.redirect_bind).await?;
        let redirect_uri = redirect_uri_for(listener.local_addr().port());

        let url = self.provider.authorization_url(&AuthorizationRequest {
            redirect_uri: &redirect_uri,
            state: &state,
            code_challenge: &pkce.challenge,
        })?;
        self.browser
            .open(&url)
            .context("failed to open the sign-in page")?;

        let params = listener.wait(self.settings.callback_timeout).await?;

        if let Some(error) = params.error() {
            return Ok(TokenResponse {
                error: Some(error.to_string()),
                error_description: params.error_description().map(str::to_string),
                ..Default::default()
            });
        }
        if params.state() != Some(state.as_str()) {
            return Err(FixError::StateMismatch.into());
        }
        let Some(code) = params.code() else {
            return Ok(TokenResponse {
                error: Some("missing_code".to_string()),
                error_description: Some(
                    "redirect did not carry an authorization code".to_string(),
                ),
                ..Default::default()
            });
        };

        self.provider
            .exchange_code(code, &pkce.verifier, &redirect_uri)
            .await
    }
}

fn persist(cache: &TokenCache) {
    if let Err(error) = cache.save() {
        tracing::warn!("failed to save token cache: {error:#}");
    }
}
