use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::warn;

use vault_crypto::keys::{self, KEY_LEN};

/// Placeholder keys that MUST NOT be used in production.
const PLACEHOLDER_KEYS: &[&str] = &["change-me", "changeme", "your-encryption-key-here"];

/// Hard cap on any message page, whatever `VAULT_PAGE_SIZE` says.
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Clone)]
pub struct Config {
    pub production: bool,
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub encryption_key: [u8; KEY_LEN],
    pub auth_timeout: Duration,
    pub page_size: u32,
    pub fanout_timeout: Duration,
    pub file_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. `get` returns `None` for unset names.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let production = get("VAULT_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production"));

        let encryption_key = match get("VAULT_ENCRYPTION_KEY").filter(|k| !k.trim().is_empty()) {
            Some(raw) if PLACEHOLDER_KEYS.contains(&raw.trim()) => {
                bail!("VAULT_ENCRYPTION_KEY is still a placeholder; generate a 32-byte base64 key")
            }
            Some(raw) => keys::key_from_base64(&raw).context("VAULT_ENCRYPTION_KEY is invalid")?,
            None if production => bail!("VAULT_ENCRYPTION_KEY must be set when VAULT_ENV=production"),
            None => {
                warn!("VAULT_ENCRYPTION_KEY is unset; using the development default key");
                keys::dev_key()
            }
        };

        let page_size: u32 = parse_or(&get, "VAULT_PAGE_SIZE", 50)?;
        if page_size == 0 {
            bail!("VAULT_PAGE_SIZE must be at least 1");
        }

        Ok(Self {
            production,
            host: get("VAULT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "VAULT_PORT", 3000)?,
            db_path: get("VAULT_DB_PATH").unwrap_or_else(|| "vault.db".into()).into(),
            encryption_key,
            auth_timeout: Duration::from_secs(parse_or(&get, "VAULT_AUTH_TIMEOUT_SECS", 10)?),
            page_size: page_size.min(MAX_PAGE_SIZE),
            fanout_timeout: Duration::from_millis(parse_or(&get, "VAULT_FANOUT_TIMEOUT_MS", 250)?),
            file_dir: get("VAULT_FILE_DIR").unwrap_or_else(|| "./vault-files".into()).into(),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("production", &self.production)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("encryption_key", &"<redacted>")
            .field("auth_timeout", &self.auth_timeout)
            .field("page_size", &self.page_size)
            .field("fanout_timeout", &self.fanout_timeout)
            .field("file_dir", &self.file_dir)
            .finish()
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", name, raw)),
        None => Ok(default),
    }
}
