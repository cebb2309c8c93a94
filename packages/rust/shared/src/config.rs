//! Application configuration for regenrich.
//!
//! User config lives at `~/.regenrich/regenrich.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EnrichError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "regenrich.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".regenrich";

/// Upper bound on identifiers per lookup call.
pub const MAX_CHUNK_SIZE: usize = 100;

/// Upper bound on concurrent chunk lookups per wave.
pub const MAX_WAVE_SIZE: usize = 10;

// ---------------------------------------------------------------------------
// Config structs (matching regenrich.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Registry API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Chunking and pacing.
    #[serde(default)]
    pub batch: BatchSection,

    /// Spreadsheet layout.
    #[serde(default)]
    pub sheet: SheetConfig,

    /// Local cache database.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// `[api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Registry lookup endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api-fns.ru/api/egr".into()
}
fn default_api_key_env() -> String {
    "REGENRICH_API_KEY".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSection {
    /// Identifiers per lookup call.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks looked up concurrently per wave.
    #[serde(default = "default_wave_size")]
    pub wave_size: usize,

    /// Pause between successive chunk dispatches inside a wave.
    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            wave_size: default_wave_size(),
            dispatch_delay_ms: default_dispatch_delay_ms(),
        }
    }
}

fn default_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}
fn default_wave_size() -> usize {
    MAX_WAVE_SIZE
}
fn default_dispatch_delay_ms() -> u64 {
    100
}

/// `[sheet]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetConfig {
    /// Header label of the registration number column.
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,

    /// Worksheet to read; the first sheet when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,

    /// Single cell appended to rows without registry data.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,

    /// Header labels of the appended columns.
    #[serde(default)]
    pub labels: ColumnLabels,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            identifier_column: default_identifier_column(),
            sheet_name: None,
            placeholder: default_placeholder(),
            labels: ColumnLabels::default(),
        }
    }
}

fn default_identifier_column() -> String {
    "ОГРН".into()
}
fn default_placeholder() -> String {
    "Нет данных".into()
}

/// `[sheet.labels]`: headers for contact, finances, secondary id and CEO, in output order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLabels {
    #[serde(default = "default_contact_label")]
    pub contact: String,
    #[serde(default = "default_finances_label")]
    pub finances: String,
    #[serde(default = "default_secondary_id_label")]
    pub secondary_id: String,
    #[serde(default = "default_ceo_label")]
    pub ceo: String,
}

impl Default for ColumnLabels {
    fn default() -> Self {
        Self {
            contact: default_contact_label(),
            finances: default_finances_label(),
            secondary_id: default_secondary_id_label(),
            ceo: default_ceo_label(),
        }
    }
}

fn default_contact_label() -> String {
    "Контакты".into()
}
fn default_finances_label() -> String {
    "Финансы".into()
}
fn default_secondary_id_label() -> String {
    "ИНН".into()
}
fn default_ceo_label() -> String {
    "Руководитель".into()
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Database file; `~` expands to the home directory.
    #[serde(default = "default_cache_path")]
    pub path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

fn default_cache_path() -> String {
    "~/.regenrich/cache.db".into()
}

impl CacheConfig {
    /// Resolve `path`, expanding a leading `~/`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        expand_home(&self.path)
    }
}

// ---------------------------------------------------------------------------
// Batch config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime batch configuration derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Identifiers per chunk.
    pub chunk_size: usize,
    /// Chunks per wave.
    pub wave_size: usize,
    /// Delay between chunk dispatches within a wave.
    pub dispatch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for BatchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.batch.chunk_size,
            wave_size: config.batch.wave_size,
            dispatch_delay: Duration::from_millis(config.batch.dispatch_delay_ms),
        }
    }
}

impl BatchConfig {
    /// Reject sizes outside `1..=100` identifiers and `1..=10` chunks.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(EnrichError::config(format!(
                "chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if !(1..=MAX_WAVE_SIZE).contains(&self.wave_size) {
            return Err(EnrichError::config(format!(
                "wave_size must be between 1 and {MAX_WAVE_SIZE}, got {}",
                self.wave_size
            )));
        }
        Ok(())
    }
}

impl ApiConfig {
    /// Parse `base_url` into a [`Url`].
    pub fn endpoint(&self) -> Result<Url> {
        Url::parse(&self.base_url).map_err(|e| {
            EnrichError::config(format!("invalid api.base_url {:?}: {e}", self.base_url))
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.regenrich/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| EnrichError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.regenrich/regenrich.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EnrichError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| EnrichError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EnrichError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EnrichError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EnrichError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the registry API key from the env var named in config.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.api.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(EnrichError::config(format!(
            "registry API key not found. Set the {var_name} environment variable."
        ))),
    }
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| EnrichError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}
