#![cfg(feature = "web")]
//! Server configuration read from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

use crate::mailer::SmtpConfig;
use crate::retry::RetryPolicy;
use crate::sheets::SheetsClientConfig;
use crate::store::StoreConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub root_domain: String,
    /// Take the tenant host from `X-Forwarded-Host` instead of `Host`. Only
    /// safe when a reverse proxy overwrites that header on every request.
    pub trust_forwarded_host: bool,
    pub master_spreadsheet_id: String,
    pub sheets_access_token: String,
    pub sheets_api_base: String,
    pub sheets_max_concurrent: usize,
    pub sheets_max_retries: usize,
    pub tenant_cache_ttl: Duration,
    pub client_list_cache_ttl: Duration,
    pub auth_userinfo_url: String,
    pub auth_cache_ttl: Duration,
    pub session_cookie: String,
    pub team_emails: Vec<String>,
    /// `None` disables the support endpoint.
    pub smtp: Option<SmtpConfig>,
    pub static_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_var("SMTP_PORT", get("SMTP_PORT"), 587)?,
                username: or("SMTP_USERNAME", ""),
                password: or("SMTP_PASSWORD", ""),
                from: required("SUPPORT_EMAIL_FROM")?,
                to: required("SUPPORT_EMAIL_TO")?,
            }),
            None => None,
        };

        let bind_addr = or("BIND_ADDR", "127.0.0.1:3000");
        let bind_addr = bind_addr.parse().map_err(|_| ConfigError::Invalid {
            var: "BIND_ADDR",
            value: bind_addr.clone(),
        })?;

        Ok(Config {
            bind_addr,
            root_domain: or("ROOT_DOMAIN", "localhost").to_ascii_lowercase(),
            trust_forwarded_host: parse_var(
                "TRUST_FORWARDED_HOST",
                get("TRUST_FORWARDED_HOST").map(|v| v.to_ascii_lowercase()),
                false,
            )?,
            master_spreadsheet_id: required("MASTER_SPREADSHEET_ID")?,
            sheets_access_token: required("SHEETS_ACCESS_TOKEN")?,
            sheets_api_base: or("SHEETS_API_BASE", crate::sheets::DEFAULT_API_BASE),
            sheets_max_concurrent: parse_var(
                "SHEETS_MAX_CONCURRENT",
                get("SHEETS_MAX_CONCURRENT"),
                5,
            )?,
            sheets_max_retries: parse_var("SHEETS_MAX_RETRIES", get("SHEETS_MAX_RETRIES"), 5)?,
            tenant_cache_ttl: seconds_var(
                "TENANT_CACHE_TTL_SECS",
                get("TENANT_CACHE_TTL_SECS"),
                300,
            )?,
            client_list_cache_ttl: seconds_var(
                "CLIENT_LIST_CACHE_TTL_SECS",
                get("CLIENT_LIST_CACHE_TTL_SECS"),
                120,
            )?,
            auth_userinfo_url: required("AUTH_USERINFO_URL")?,
            auth_cache_ttl: seconds_var("AUTH_CACHE_TTL_SECS", get("AUTH_CACHE_TTL_SECS"), 300)?,
            session_cookie: or("SESSION_COOKIE", "__session"),
            team_emails: get("TEAM_EMAILS")
                .map(|list| {
                    list.split(',')
                        .map(|e| e.trim().to_ascii_lowercase())
                        .filter(|e| !e.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            smtp,
            static_dir: or("STATIC_DIR", "static"),
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        let mut store = StoreConfig::new(self.master_spreadsheet_id.clone());
        store.max_concurrent = self.sheets_max_concurrent;
        store.retry = RetryPolicy::default().with_max_retries(self.sheets_max_retries);
        store.tenant_ttl = self.tenant_cache_ttl;
        store.client_list_ttl = self.client_list_cache_ttl;
        store
    }

    pub fn sheets_client_config(&self) -> SheetsClientConfig {
        SheetsClientConfig::new(self.sheets_access_token.clone())
            .with_api_base(self.sheets_api_base.clone())
    }
}

fn parse_var<T: FromStr>(
    var: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

fn seconds_var(
    var: &'static str,
    raw: Option<String>,
    default: i64,
) -> Result<Duration, ConfigError> {
    let secs: i64 = parse_var(var, raw, default)?;
    Ok(Duration::seconds(secs.max(0)))
}
