use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::Credentials;
use crate::error::SyncError;
use crate::filter::{ExclusionList, IncludeFilter, SizeGate};
use crate::policy::{DeleteAction, SyncPolicy};
use crate::sync::SyncPair;
use crate::timestamp::DEFAULT_UTC_SHIFT_HOURS;

/// Highest numbered `DIR_PAIRS<n>` variable that is read
const MAX_NUMBERED_PAIR_VARS: usize = 50;

/// Main configuration structure for alistsync
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Storage server address and credentials
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Pairs and sync behavior
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage server connection settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionConfig {
    /// Server base URL, `http://` is assumed when no scheme is given
    #[serde(default)]
    pub base_url: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// API token, tried before username/password
    pub token: Option<String>,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// `source:destination` entries; an entry may hold several pairs
    /// separated by `;` or `,`
    #[serde(default)]
    pub pairs: Vec<String>,

    /// What to do with destination extras
    #[serde(default = "default_delete_action")]
    pub delete_action: String, // "none", "move", "delete"

    /// Remove source files once the destination holds them
    #[serde(default)]
    pub move_file: bool,

    /// Absolute paths never touched on either side
    #[serde(default)]
    pub exclude_dirs: Vec<String>,

    /// Regular expression a file name must match to be copied
    pub file_filter: Option<String>,

    /// Smallest file size in bytes that is copied
    pub size_min: Option<u64>,

    /// Largest file size in bytes that is copied
    pub size_max: Option<u64>,

    /// Hours added to `Z` timestamps when comparing modification times
    #[serde(default = "default_utc_shift_hours")]
    pub utc_shift_hours: i64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "pretty", "json"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_base_url() -> String {
    "http://localhost:5244".to_string()
}
fn default_delete_action() -> String {
    "none".to_string()
}
const MAX_UTC_SHIFT_HOURS: i64 = 24;

fn default_utc_shift_hours() -> i64 {
    DEFAULT_UTC_SHIFT_HOURS
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            username: None,
            password: None,
            token: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            delete_action: default_delete_action(),
            move_file: false,
            exclude_dirs: Vec::new(),
            file_filter: None,
            size_min: None,
            size_max: None,
            utc_shift_hours: default_utc_shift_hours(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl Config {
    /// Load the configuration file if it exists, falling back to defaults.
    ///
    /// The environment can supply everything, so a missing file is not an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            Self::load(&config_path)
        } else if path.is_some() {
            bail!("Config file not found: {:?}", config_path)
        } else {
            debug!("No config file at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_values()?;

        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("alistsync").join("config.yml"))
    }

    /// Expand `~` and `${VAR}` references in the base URL and token
    pub fn expand_values(&mut self) -> Result<()> {
        self.connection.base_url = shellexpand::full(&self.connection.base_url)
            .context("Failed to expand base_url")?
            .into_owned();

        if let Some(token) = &self.connection.token {
            self.connection.token = Some(
                shellexpand::full(token)
                    .context("Failed to expand token")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides read through `lookup`. Unset and empty
    /// variables leave the current value alone.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BASE_URL") {
            self.connection.base_url = v;
        }
        if let Some(v) = get("USERNAME") {
            self.connection.username = Some(v);
        }
        if let Some(v) = get("PASSWORD") {
            self.connection.password = Some(v);
        }
        if let Some(v) = get("TOKEN") {
            self.connection.token = Some(v);
        }

        let pair_vars: Vec<String> = std::iter::once("DIR_PAIRS".to_string())
            .chain((1..=MAX_NUMBERED_PAIR_VARS).map(|n| format!("DIR_PAIRS{}", n)))
            .filter_map(|key| get(&key))
            .collect();
        if !pair_vars.is_empty() {
            self.sync.pairs = pair_vars;
        }

        if let Some(v) = get("SYNC_DELETE_ACTION") {
            self.sync.delete_action = v;
        }
        if let Some(v) = get("MOVE_FILE") {
            self.sync.move_file = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = get("EXCLUDE_DIRS") {
            self.sync.exclude_dirs = split_list(&v);
        }
        if let Some(v) = get("REGEX_PATTERNS") {
            self.sync.file_filter = Some(v);
        }
        if let Some(v) = get("SIZE_MIN") {
            self.sync.size_min = parse_size(&v, "SIZE_MIN");
        }
        if let Some(v) = get("SIZE_MAX") {
            self.sync.size_max = parse_size(&v, "SIZE_MAX");
        }
    }

    /// Reject configurations that cannot possibly connect
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.connection.base_url.trim().is_empty() {
            return Err(SyncError::InvalidConfig("base_url is not set".to_string()));
        }
        if !self.credentials().has_token() && !self.credentials().has_password() {
            return Err(SyncError::InvalidConfig(
                "either a token or a username and password is required".to_string(),
            ));
        }
        if !(-MAX_UTC_SHIFT_HOURS..=MAX_UTC_SHIFT_HOURS).contains(&self.sync.utc_shift_hours) {
            return Err(SyncError::InvalidConfig(format!(
                "utc_shift_hours must be between -{0} and {0}",
                MAX_UTC_SHIFT_HOURS
            )));
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            base_url: self.connection.base_url.trim().to_string(),
            username: self.connection.username.clone(),
            password: self.connection.password.clone(),
            token: self.connection.token.clone(),
        }
    }

    /// All configured pairs, in order. Malformed entries are skipped.
    pub fn pairs(&self) -> Vec<SyncPair> {
        self.sync
            .pairs
            .iter()
            .flat_map(|entry| parse_pairs(entry))
            .collect()
    }

    /// Delete action after applying the move-mode override
    pub fn delete_action(&self) -> DeleteAction {
        let action = parse_delete_action(&self.sync.delete_action);
        if self.sync.move_file && action != DeleteAction::None {
            warn!(
                "Move mode is enabled, ignoring delete action '{}'",
                action
            );
            return DeleteAction::None;
        }
        action
    }

    /// Build the immutable policy the engine runs with
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            delete_action: self.delete_action(),
            exclusions: ExclusionList::new(&self.sync.exclude_dirs),
            move_file: self.sync.move_file,
            include: IncludeFilter::compile(self.sync.file_filter.iter()),
            size_gate: SizeGate::new(self.sync.size_min, self.sync.size_max),
            utc_shift_hours: self.sync.utc_shift_hours,
        }
    }
}

/// Parse `src:dst` pairs separated by `;` or `,`
pub fn parse_pairs(raw: &str) -> Vec<SyncPair> {
    raw.split([';', ','])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<SyncPair>() {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!("Skipping directory pair {:?}: {}", entry, e);
                None
            }
        })
        .collect()
}

/// Parse a delete action, falling back to `none` for unknown values
pub fn parse_delete_action(raw: &str) -> DeleteAction {
    match raw.parse() {
        Ok(action) => action,
        Err(e) => {
            warn!("{}, using 'none'", e);
            DeleteAction::None
        }
    }
}

/// Parse an interval like `30s`, `15m`, `2h`, `1d` or raw seconds
pub fn parse_interval(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let seconds = if let Some(value) = duration_str.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")?
    } else if let Some(value) = duration_str.strip_suffix('m') {
        value.parse::<u64>().map(|v| v * 60).context("Invalid minutes value")?
    } else if let Some(value) = duration_str.strip_suffix('h') {
        value.parse::<u64>().map(|v| v * 3600).context("Invalid hours value")?
    } else if let Some(value) = duration_str.strip_suffix('d') {
        value.parse::<u64>().map(|v| v * 86400).context("Invalid days value")?
    } else {
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30m', '1h', '2d'")?
    };

    if seconds == 0 {
        bail!("Interval must be greater than zero");
    }
    Ok(Duration::from_secs(seconds))
}

/// Split a comma separated list, dropping blank entries
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_size(raw: &str, name: &str) -> Option<u64> {
    let raw = raw.trim();
    if !raw.chars().all(|c| c.is_ascii_digit()) {
        warn!("Ignoring {}={:?}: only digits are allowed", name, raw);
        return None;
    }
    raw.parse().ok()
}
