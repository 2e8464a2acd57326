use super::provider::{AccessToken, TokenResponse};
use crate::config::FixConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Cached access tokens closer than this to expiry are refreshed instead.
const EXPIRY_SKEW_SECS: i64 = 300;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Application registration and scopes a cache is opened for. Accounts
/// signed in through another client or tenant stay on disk but are invisible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppScope {
    pub client_id: String,
    pub tenant_id: String,
    /// Space-separated resource scopes, as requested.
    pub scope: String,
}

impl AppScope {
    fn owns(&self, account: &CachedAccount) -> bool {
        account.client_id == self.client_id && account.tenant_id == self.tenant_id
    }
}

impl From<&FixConfig> for AppScope {
    fn from(config: &FixConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            tenant_id: config.tenant_id.clone(),
            scope: config.scopes.join(" "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAccount {
    pub home_account_id: String,
    pub username: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub tenant_id: String,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Scopes the cached access token was issued for.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedAccount {
    /// Cached access token when it was issued for `scope` and is valid for at
    /// least the skew window.
    pub fn usable_access_token(&self, scope: &str, now: DateTime<Utc>) -> Option<AccessToken> {
        if self.scope.as_deref() != Some(scope) {
            return None;
        }
        let expires_at = self.expires_at?;
        if expires_at - Duration::seconds(EXPIRY_SKEW_SECS) <= now {
            return None;
        }
        self.access_token.as_deref().map(AccessToken::new)
    }

    /// Build an account from a successful token response. Responses without
    /// an id token cannot be attributed to a user and are not cached.
    pub fn from_response(
        response: &TokenResponse,
        app: &AppScope,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let (home_account_id, username) = response.account_identity()?;
        let mut account = Self {
            home_account_id,
            username,
            client_id: app.client_id.clone(),
            tenant_id: app.tenant_id.clone(),
            refresh_token: None,
            access_token: None,
            scope: None,
            expires_at: None,
        };
        account.apply(response, &app.scope, now);
        Some(account)
    }

    /// Fold a token response issued for `scope` into this account. Providers
    /// may omit a rotated refresh token, in which case the old one stays.
    pub fn apply(&mut self, response: &TokenResponse, scope: &str, now: DateTime<Utc>) {
        if let Some(refresh) = response.refresh_token.as_ref() {
            self.refresh_token = Some(refresh.clone());
        }
        self.access_token = response.access_token.clone();
        self.scope = response.access_token.as_ref().map(|_| scope.to_string());
        self.expires_at = response.access_token.as_ref().map(|_| {
            now + Duration::seconds(response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
        });
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    accounts: Vec<CachedAccount>,
}

/// Accounts remembered between runs, persisted as JSON.
#[derive(Debug)]
pub struct TokenCache {
    path: Option<PathBuf>,
    app: AppScope,
    accounts: Vec<CachedAccount>,
    /// Accounts of other client or tenant registrations, kept for `save`.
    other_apps: Vec<CachedAccount>,
}

impl TokenCache {
    /// A cache that never touches disk.
    pub fn in_memory(app: AppScope) -> Self {
        Self {
            path: None,
            app,
            accounts: Vec::new(),
            other_apps: Vec::new(),
        }
    }

    pub fn load(path: &Path, app: AppScope) -> Result<Self> {
        let accounts = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read token cache {:?}", path))?;
            match serde_json::from_str::<CacheFile>(&contents) {
                Ok(file) => file.accounts,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        "ignoring unreadable token cache: {error}"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let (accounts, other_apps) = accounts
            .into_iter()
            .partition(|account: &CachedAccount| app.owns(account));
        Ok(Self {
            path: Some(path.to_path_buf()),
            app,
            accounts,
            other_apps,
        })
    }

    pub fn app(&self) -> &AppScope {
        &self.app
    }

    /// Accounts signed in through the active client and tenant.
    pub fn accounts(&self) -> &[CachedAccount] {
        &self.accounts
    }

    pub fn find(&self, home_account_id: &str) -> Option<&CachedAccount> {
        self.accounts
            .iter()
            .find(|account| account.home_account_id == home_account_id)
    }

    pub fn upsert(&mut self, mut account: CachedAccount) {
        account.client_id = self.app.client_id.clone();
        account.tenant_id = self.app.tenant_id.clone();
        match self
            .accounts
            .iter_mut()
            .find(|existing| existing.home_account_id == account.home_account_id)
        {
            Some(existing) => *existing = account,
            None => self.accounts.push(account),
        }
    }

    pub fn remove(&mut self, home_account_id: &str) {
        self.accounts
            .retain(|account| account.home_account_id != home_account_id);
    }

    /// Write the cache next to its final location and rename it into place.
    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create token cache dir {:?}", parent))?;

        let file = CacheFile {
            accounts: self
                .accounts
                .iter()
                .chain(&self.other_apps)
                .cloned()
                .collect(),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to stage token cache in {:?}", parent))?;
        serde_json::to_writer_pretty(&mut tmp, &file)?;
        tmp.write_all(b"\n")?;
        restrict_permissions(tmp.path())?;
        tmp.persist(path)
            .with_context(|| format!("failed to write token cache {:?}", path))?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
