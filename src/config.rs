use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}};

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    pub imap: ImapConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub delete: DeleteConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ImapConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub starttls: bool,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct FetchConfig {
    pub search: String,
    pub timezone: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct DeleteConfig {
    pub days: u32,
}

pub const DEFAULT_PORT: u16 = 993;
pub const DEFAULT_MAILBOX: &str = "INBOX";
pub const DEFAULT_SEARCH: &str = "UNSEEN";
pub const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";
pub const DEFAULT_DAYS: u32 = 90;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_mailbox() -> String {
    DEFAULT_MAILBOX.to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            search: DEFAULT_SEARCH.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self { days: DEFAULT_DAYS }
    }
}

impl ImapConfig {
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port: DEFAULT_PORT,
            username: username.to_string(),
            password: password.to_string(),
            starttls: false,
            mailbox: default_mailbox(),
        }
    }
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("no config dir"))?;
        Ok(dir.join("imapdict").join("config.toml"))
    }

    pub fn load_or_create() -> Result<(Self, bool, PathBuf)> {
        Self::load_or_create_at(&Self::path()?)
    }

    /// Loads `path`, writing the default config there first if it is missing.
    /// The flag is true when the file was just created.
    pub fn load_or_create_at(path: &Path) -> Result<(Self, bool, PathBuf)> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, DEFAULT_CONFIG)
                .with_context(|| format!("writing {}", path.display()))?;
            let cfg: Self = toml::from_str(DEFAULT_CONFIG)?;
            return Ok((cfg, true, path.to_path_buf()));
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cfg = toml::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok((cfg, false, path.to_path_buf()))
    }
}

const DEFAULT_CONFIG: &str = r#"
[imap]
host = "imap.example.com"
port = 993
username = "you@example.com"
password = "PASSWORD"
starttls = false
mailbox = "INBOX"

[fetch]
search = "UNSEEN"
timezone = "Asia/Tokyo"

[delete]
days = 90
"#;
