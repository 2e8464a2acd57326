use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";
const DEFAULT_SCOPES: &[&str] = &["https://graph.microsoft.com/.default"];
const DEFAULT_REDIRECT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
const TOKEN_CACHE_FILE: &str = "token_cache.json";

#[derive(Debug, Clone)]
pub struct FixConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub tenant_id: String,
    pub authority_host: Url,
    pub graph_url: Url,
    pub scopes: Vec<String>,
    pub redirect_bind: SocketAddr,
    pub callback_timeout: Duration,
    pub http_timeout: Duration,
    /// `None` disables the on-disk token cache.
    pub token_cache: Option<PathBuf>,
    pub account: Option<String>,
    pub open_browser: bool,
    pub quiet: bool,
}

impl FixConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            file: _,
            config,
            client_id: cli_client_id,
            client_secret: cli_client_secret,
            tenant_id: cli_tenant_id,
            authority_host: cli_authority_host,
            graph_url: cli_graph_url,
            scopes: cli_scopes,
            redirect_bind: cli_redirect_bind,
            callback_timeout_secs: cli_callback_timeout_secs,
            http_timeout_secs: cli_http_timeout_secs,
            token_cache: cli_token_cache,
            no_token_cache: cli_no_token_cache,
            account: cli_account,
            no_browser: cli_no_browser,
            quiet: cli_quiet,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            client_id: file_client_id,
            client_secret: file_client_secret,
            tenant_id: file_tenant_id,
            authority_host: file_authority_host,
            graph_url: file_graph_url,
            scopes: file_scopes,
            redirect_bind: file_redirect_bind,
            callback_timeout_secs: file_callback_timeout_secs,
            http_timeout_secs: file_http_timeout_secs,
            token_cache: file_token_cache,
            no_token_cache: file_no_token_cache,
            account: file_account,
            no_browser: file_no_browser,
            quiet: file_quiet,
        } = file_config;

        let client_id = cli_client_id
            .or(file_client_id)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .context("client id is required (--client-id or XLSM_FIX_CLIENT_ID)")?;

        let tenant_id = cli_tenant_id
            .or(file_tenant_id)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .context("tenant id is required (--tenant-id or XLSM_FIX_TENANT_ID)")?;

        let client_secret = cli_client_secret
            .or(file_client_secret)
            .filter(|secret| !secret.is_empty());

        let authority_host = parse_url(
            cli_authority_host.or(file_authority_host),
            DEFAULT_AUTHORITY_HOST,
            "authority host",
        )?;
        let graph_url = parse_url(
            cli_graph_url.or(file_graph_url),
            DEFAULT_GRAPH_URL,
            "graph url",
        )?;

        let mut scopes: Vec<String> = Vec::new();
        for scope in cli_scopes
            .or(file_scopes)
            .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect())
        {
            let scope = scope.trim().to_string();
            if !scope.is_empty() && !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        anyhow::ensure!(!scopes.is_empty(), "at least one scope must be provided");

        let redirect_bind = cli_redirect_bind.or(file_redirect_bind).unwrap_or_else(|| {
            DEFAULT_REDIRECT_BIND
                .parse()
                .expect("default bind address valid")
        });

        let callback_timeout = Duration::from_secs(
            cli_callback_timeout_secs
                .or(file_callback_timeout_secs)
                .unwrap_or(DEFAULT_CALLBACK_TIMEOUT_SECS)
                .max(1),
        );
        let http_timeout = Duration::from_secs(
            cli_http_timeout_secs
                .or(file_http_timeout_secs)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)
                .max(1),
        );

        let no_token_cache = cli_no_token_cache || file_no_token_cache.unwrap_or(false);
        let token_cache = if no_token_cache {
            None
        } else {
            cli_token_cache
                .or(file_token_cache)
                .or_else(default_token_cache_path)
        };

        let account = cli_account
            .or(file_account)
            .map(|account| account.trim().to_string())
            .filter(|account| !account.is_empty());

        let open_browser = !(cli_no_browser || file_no_browser.unwrap_or(false));
        let quiet = cli_quiet || file_quiet.unwrap_or(false);

        Ok(Self {
            client_id,
            client_secret,
            tenant_id,
            authority_host,
            graph_url,
            scopes,
            redirect_bind,
            callback_timeout,
            http_timeout,
            token_cache,
            account,
            open_browser,
            quiet,
        })
    }

    /// `https://login.microsoftonline.com/{tenant}`
    pub fn authority_url(&self) -> String {
        format!(
            "{}/{}",
            self.authority_host.as_str().trim_end_matches('/'),
            self.tenant_id
        )
    }
}

fn parse_url(value: Option<String>, default: &str, what: &str) -> Result<Url> {
    let raw = value.unwrap_or_else(|| default.to_string());
    Url::parse(raw.trim()).with_context(|| format!("invalid {what} '{raw}'"))
}

fn default_token_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("xlsm-fix").join(TOKEN_CACHE_FILE))
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "xlsm-fix",
    about = "Fix corrupted macro-enabled Excel files through the Microsoft Graph workbook engine",
    version
)]
pub struct CliArgs {
    #[arg(value_name = "FILE", help = "Workbook to repair (prompted for when omitted)")]
    pub file: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "XLSM_FIX_CLIENT_ID",
        value_name = "ID",
        help = "Application (client) id registered with the identity provider"
    )]
    pub client_id: Option<String>,

    #[arg(
        long,
        env = "XLSM_FIX_CLIENT_SECRET",
        value_name = "SECRET",
        hide_env_values = true,
        help = "Client secret for confidential application registrations"
    )]
    pub client_secret: Option<String>,

    #[arg(
        long,
        env = "XLSM_FIX_TENANT_ID",
        value_name = "ID",
        help = "Directory (tenant) id used to build the authority URL"
    )]
    pub tenant_id: Option<String>,

    #[arg(
        long,
        env = "XLSM_FIX_AUTHORITY_HOST",
        value_name = "URL",
        help = "Identity provider host (default: https://login.microsoftonline.com)"
    )]
    pub authority_host: Option<String>,

    #[arg(
        long,
        env = "XLSM_FIX_GRAPH_URL",
        value_name = "URL",
        help = "Microsoft Graph base URL (default: https://graph.microsoft.com/v1.0)"
    )]
    pub graph_url: Option<String>,

    #[arg(
        long,
        env = "XLSM_FIX_SCOPES",
        value_name = "SCOPE",
        value_delimiter = ',',
        help = "Comma-separated list of scopes to request"
    )]
    pub scopes: Option<Vec<String>>,

    #[arg(
        long,
        env = "XLSM_FIX_REDIRECT_BIND",
        value_name = "ADDR",
        help = "Loopback address for the OAuth redirect listener (default: 127.0.0.1:8080)"
    )]
    pub redirect_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "XLSM_FIX_CALLBACK_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Seconds to wait for the browser redirect (default: 300)",
        value_parser = clap::value_parser!(u64)
    )]
    pub callback_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "XLSM_FIX_HTTP_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Per-request HTTP timeout in seconds (default: 120)",
        value_parser = clap::value_parser!(u64)
    )]
    pub http_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "XLSM_FIX_TOKEN_CACHE",
        value_name = "FILE",
        help = "Token cache location (default: <cache dir>/xlsm-fix/token_cache.json)"
    )]
    pub token_cache: Option<PathBuf>,

    #[arg(long, help = "Do not read or write the token cache")]
    pub no_token_cache: bool,

    #[arg(
        long,
        env = "XLSM_FIX_ACCOUNT",
        value_name = "USERNAME|INDEX",
        help = "Cached account to use without prompting"
    )]
    pub account: Option<String>,

    #[arg(long, help = "Print the sign-in URL instead of opening a browser")]
    pub no_browser: bool,

    #[arg(long, short, help = "Suppress the banner and progress bar")]
    pub quiet: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    client_id: Option<String>,
    client_secret: Option<String>,
    tenant_id: Option<String>,
    authority_host: Option<String>,
    graph_url: Option<String>,
    scopes: Option<Vec<String>>,
    redirect_bind: Option<SocketAddr>,
    callback_timeout_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    token_cache: Option<PathBuf>,
    no_token_cache: Option<bool>,
    account: Option<String>,
    no_browser: Option<bool>,
    quiet: Option<bool>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
