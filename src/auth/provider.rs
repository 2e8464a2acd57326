use crate::config::FixConfig;
use crate::errors::FixError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Url;
use serde::Deserialize;
use std::fmt;

/// Scopes the identity library always adds so a refresh token and an id
/// token come back with the access token.
const RESERVED_SCOPES: &[&str] = &["offline_access", "openid", "profile"];

/// Bearer token handed to every Graph call.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Token endpoint payload. Success and provider errors share one shape.
#[derive(Clone, Default, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub id_token: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .finish()
    }
}

impl TokenResponse {
    pub fn access_token(&self) -> Option<AccessToken> {
        self.access_token.clone().map(AccessToken)
    }

    pub fn into_error(self) -> FixError {
        FixError::auth_failed(self.error, self.error_description)
    }

    /// `(home_account_id, username)` from the unverified id token claims.
    pub fn account_identity(&self) -> Option<(String, String)> {
        let claims = decode_id_token(self.id_token.as_deref()?)?;
        let username = claims
            .preferred_username
            .or(claims.upn)
            .or(claims.email)
            .or(claims.name)?;
        let home_account_id = match (claims.oid, claims.tid) {
            (Some(oid), Some(tid)) => format!("{oid}.{tid}"),
            (Some(oid), None) => oid,
            _ => username.clone(),
        };
        Some((home_account_id, username))
    }
}

#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    preferred_username: Option<String>,
    upn: Option<String>,
    email: Option<String>,
    name: Option<String>,
    oid: Option<String>,
    tid: Option<String>,
}

fn decode_id_token(id_token: &str) -> Option<IdTokenClaims> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub redirect_uri: &'a str,
    pub state: &'a str,
    pub code_challenge: &'a str,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> Result<Url>;

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse>;
}

/// Microsoft identity platform v2.0 endpoints for one tenant.
pub struct MicrosoftIdentity {
    http: reqwest::Client,
    authority: String,
    client_id: String,
    client_secret: Option<String>,
    scope: String,
}

impl MicrosoftIdentity {
    pub fn new(http: reqwest::Client, config: &FixConfig) -> Self {
        let mut scopes: Vec<&str> = config.scopes.iter().map(String::as_str).collect();
        for reserved in RESERVED_SCOPES {
            if !scopes.contains(reserved) {
                scopes.push(*reserved);
            }
        }
        let scope = scopes.join(" ");
        Self {
            http,
            authority: config.authority_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope,
        }
    }

    fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority)
    }

    async fn post_token(&self, grant: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = grant.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        form.push(("scope", self.scope.as_str()));
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let endpoint = self.token_endpoint();
        tracing::debug!(endpoint = %endpoint, "requesting token");
        let response = self
            .http
            .post(&endpoint)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("failed to reach token endpoint {endpoint}"))?;

        // Rejections arrive as 4xx with an `error` body; keep them as data.
        let status = response.status();
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|_| {
            anyhow::Error::from(FixError::Api {
                operation: "token request",
                status,
                body,
            })
        })
    }
}

#[async_trait]
impl IdentityProvider for MicrosoftIdentity {
    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> Result<Url> {
        let endpoint = format!("{}/oauth2/v2.0/authorize", self.authority);
        Url::parse_with_params(
            &endpoint,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", request.redirect_uri),
                ("response_mode", "query"),
                ("scope", self.scope.as_str()),
                ("state", request.state),
                ("code_challenge", request.code_challenge),
                ("code_challenge_method", "S256"),
            ],
        )
        .with_context(|| format!("invalid authorization endpoint {endpoint}"))
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        self.post_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.post_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}
