use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::keyring;
use crate::models::FolderPath;

pub const DEFAULT_INBOX: &str = "INBOX";
pub const DEFAULT_ROOT: &str = "INBOX.rss2imap";
pub const DEFAULT_INTERVAL_SECS: u64 = 600;

// ---------------------------------------------------------------------------
// On-disk config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend")]
pub enum PasswordBackend {
    #[serde(rename = "keyring")]
    Keyring,
    #[serde(rename = "plaintext")]
    Plaintext { value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub starttls: bool,
    pub password: PasswordBackend,
    /// Address entry messages are delivered to.
    pub recipient: String,
    #[serde(default = "default_inbox")]
    pub inbox: String,
    #[serde(default = "default_root")]
    pub root_folder: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub exit_on_error: bool,
    /// Run a single cycle and exit, for cron-style scheduling.
    #[serde(default)]
    pub once: bool,
}

fn default_port() -> u16 {
    993
}

fn default_inbox() -> String {
    DEFAULT_INBOX.into()
}

fn default_root() -> String {
    DEFAULT_ROOT.into()
}

fn default_delimiter() -> char {
    '.'
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

// ---------------------------------------------------------------------------
// Runtime config (resolved password, ready to use)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub imap_server: String,
    pub imap_port: u16,
    pub username: String,
    pub password: String,
    pub use_starttls: bool,
    pub recipient: String,
    pub inbox: String,
    pub root_folder: String,
    pub delimiter: char,
    pub interval: Duration,
    pub exit_on_error: bool,
    pub once: bool,
}

/// What the engine needs to know about the account layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub inbox: FolderPath,
    pub root: FolderPath,
    pub delimiter: char,
    pub recipient: String,
}

impl SyncSettings {
    pub fn new(inbox: &str, root: &str, delimiter: char, recipient: &str) -> Self {
        SyncSettings {
            inbox: FolderPath::parse(inbox, delimiter),
            root: FolderPath::parse(root, delimiter),
            delimiter,
            recipient: recipient.to_string(),
        }
    }
}

/// Poll loop policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Stop the loop on an unexpected cycle failure instead of logging it.
    pub exit_on_error: bool,
    /// Stop after this many cycles; `None` runs until the process dies.
    pub max_cycles: Option<usize>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rss2imap")
}

fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path).map_err(|e| Error::Config(format!("read config: {e}")))?;
        Self::parse(&data).map(Some)
    }

    pub fn parse(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| Error::Config(format!("parse config: {e}")))
    }
}

impl Config {
    /// Environment first, then `config.json` in the platform config directory.
    pub fn load() -> Result<Self> {
        if let Some(config) = Self::from_env() {
            log::info!("Config loaded from environment variables");
            return config.validated();
        }

        let path = config_path();
        match FileConfig::load(&path)? {
            Some(file) => {
                log::info!("Config loaded from {}", path.display());
                Self::from_file(file)?.validated()
            }
            None => Err(Error::Config(format!(
                "no RSS2IMAP_* environment and no config file at {}",
                path.display()
            ))),
        }
    }

    /// Try env vars. Returns None if any required var is missing.
    fn from_env() -> Option<Self> {
        let imap_server = std::env::var("RSS2IMAP_SERVER").ok()?;
        let username = std::env::var("RSS2IMAP_USER").ok()?;
        let password = std::env::var("RSS2IMAP_PASSWORD").ok()?;
        let imap_port = std::env::var("RSS2IMAP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(default_port);
        let use_starttls = std::env::var("RSS2IMAP_STARTTLS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let recipient = std::env::var("RSS2IMAP_RECIPIENT").unwrap_or_else(|_| username.clone());
        let root_folder = std::env::var("RSS2IMAP_ROOT").unwrap_or_else(|_| default_root());
        let delimiter = std::env::var("RSS2IMAP_DELIMITER")
            .ok()
            .and_then(|d| d.chars().next())
            .unwrap_or_else(default_delimiter);
        let interval_secs = std::env::var("RSS2IMAP_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        let exit_on_error = std::env::var("RSS2IMAP_EXIT_ON_ERROR")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let once = std::env::var("RSS2IMAP_ONCE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Some(Config {
            imap_server,
            imap_port,
            username,
            password,
            use_starttls,
            recipient,
            inbox: default_inbox(),
            root_folder,
            delimiter,
            interval: Duration::from_secs(interval_secs),
            exit_on_error,
            once,
        })
    }

    pub fn from_file(file: FileConfig) -> Result<Self> {
        let password = resolve_password(&file.password, &file.username, &file.server)?;
        Ok(Config {
            imap_server: file.server,
            imap_port: file.port,
            username: file.username,
            password,
            use_starttls: file.starttls,
            recipient: file.recipient,
            inbox: file.inbox,
            root_folder: file.root_folder,
            delimiter: file.delimiter,
            interval: Duration::from_secs(file.interval_secs),
            exit_on_error: file.exit_on_error,
            once: file.once,
        })
    }

    fn validated(self) -> Result<Self> {
        if self.interval.is_zero() {
            return Err(Error::Config("poll interval must be at least one second".into()));
        }
        let root = FolderPath::parse(&self.root_folder, self.delimiter);
        if root.depth() == 0 {
            return Err(Error::Config("root folder must not be empty".into()));
        }
        if root == FolderPath::parse(&self.inbox, self.delimiter) {
            return Err(Error::Config("root folder must differ from the inbox".into()));
        }
        Ok(self)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings::new(&self.inbox, &self.root_folder, self.delimiter, &self.recipient)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.interval,
            exit_on_error: self.exit_on_error,
            max_cycles: self.once.then_some(1),
        }
    }
}

fn resolve_password(backend: &PasswordBackend, username: &str, server: &str) -> Result<String> {
    match backend {
        PasswordBackend::Plaintext { value } => Ok(value.clone()),
        PasswordBackend::Keyring => keyring::get_password(username, server),
    }
}
