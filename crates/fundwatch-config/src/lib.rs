use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FUNDWATCH_DIR_NAME: &str = ".fundwatch";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_SOURCE_URL: &str = "https://www.trackaipac.com/congress";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MAX_DOCUMENT_CHARS: usize = 100_000;
pub const DEFAULT_MAX_TOKENS: u32 = 8_000;
pub const DEFAULT_MIN_REGIONS: usize = 40;
pub const DEFAULT_MIN_RECORDS: usize = 400;
pub const DEFAULT_MIN_TOTAL_AMOUNT: u64 = 100_000_000;
pub const DEFAULT_NOISE_THRESHOLD: u64 = 1_000;
pub const DEFAULT_SNAPSHOT_PATH: &str = "src/data/congressData.json";
pub const DEFAULT_GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const DEFAULT_PUBLISH_BRANCH: &str = "main";
pub const DEFAULT_AUTHOR_NAME: &str = "Auto-Update Bot";
pub const DEFAULT_AUTHOR_EMAIL: &str = "bot@fundwatch.invalid";
pub const DEFAULT_UPDATE_CRON: &str = "0 3 * * 0";
pub const DEFAULT_BIND: &str = "0.0.0.0:3001";
pub const DEFAULT_UPDATE_API_KEY_ENV: &str = "UPDATE_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionProviderKind {
    #[default]
    Auto,
    Mock,
    Anthropic,
    Ollama,
    Markup,
}

impl ExtractionProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Mock => "mock",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
            Self::Markup => "markup",
        }
    }
}

impl std::str::FromStr for ExtractionProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "auto" => Ok(Self::Auto),
            "mock" => Ok(Self::Mock),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            "markup" => Ok(Self::Markup),
            other => Err(format!(
                "invalid provider '{other}', expected one of: auto, mock, anthropic, ollama, markup"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FundwatchConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub diff: DiffConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub url: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub provider: ExtractionProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: ExtractionProviderKind::Auto,
            model: None,
            endpoint: None,
            api_key_env: default_api_key_env(),
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_min_regions")]
    pub min_regions: usize,
    #[serde(default = "default_min_records")]
    pub min_records: usize,
    #[serde(default = "default_min_total_amount")]
    pub min_total_amount: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_regions: DEFAULT_MIN_REGIONS,
            min_records: DEFAULT_MIN_RECORDS,
            min_total_amount: DEFAULT_MIN_TOTAL_AMOUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffConfig {
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold: u64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            noise_threshold: DEFAULT_NOISE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repo: None,
            token_env: default_token_env(),
            branch: default_branch(),
            remote_url: None,
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_update_cron")]
    pub cron: String,
    #[serde(default)]
    pub run_on_startup: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: default_update_cron(),
            run_on_startup: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_update_api_key_env")]
    pub api_key_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key_env: default_update_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn fundwatch_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(FUNDWATCH_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    fundwatch_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<FundwatchConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(FundwatchConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: FundwatchConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<FundwatchConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(fundwatch_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = FundwatchConfig::default();
    save_workspace_config(workspace_root, &config)?;

    Ok(config)
}

pub fn save_workspace_config(
    workspace_root: impl AsRef<Path>,
    config: &FundwatchConfig,
) -> Result<(), ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(fundwatch_dir(workspace_root))?;
    let content = toml::to_string_pretty(config)?;
    fs::write(config_path(workspace_root), content)?;
    Ok(())
}

/// Applies the deployment environment on top of the file configuration.
///
/// `lookup` resolves a variable name to its value; the daemon passes
/// `std::env::var`, tests pass a map.
pub fn apply_env_overrides<F>(mut config: FundwatchConfig, lookup: F) -> FundwatchConfig
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| {
        lookup(name)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    };

    if let Some(value) = read("UPDATE_ENABLED") {
        let enabled = !value.eq_ignore_ascii_case("false");
        config.schedule.enabled = enabled;
    }
    if let Some(value) = read("UPDATE_CRON") {
        config.schedule.cron = value;
    }
    if let Some(value) = read("UPDATE_ON_STARTUP") {
        config.schedule.run_on_startup = value.eq_ignore_ascii_case("true");
    }
    if let Some(value) = read("GITHUB_REPO") {
        config.publish.repo = Some(value);
    }
    if let Some(port) = read("PORT") {
        config.server.bind = format!("0.0.0.0:{port}");
    }
    if let Some(value) = read("FUNDWATCH_BIND") {
        config.server.bind = value;
    }

    normalize_config(config)
}

pub fn validate_config(config: &FundwatchConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.source.url.trim().is_empty() {
        warnings.push(ConfigWarning {
            code: "source_url_empty",
            message: "source.url is empty; every run will fail at fetch".to_owned(),
        });
    }

    if config.source.timeout_secs == 0 {
        warnings.push(ConfigWarning {
            code: "source_timeout_zero",
            message: format!(
                "source.timeout_secs is 0; using {DEFAULT_FETCH_TIMEOUT_SECS}s instead"
            ),
        });
    }

    let cron_fields = config.schedule.cron.split_whitespace().count();
    if !(5..=7).contains(&cron_fields) {
        warnings.push(ConfigWarning {
            code: "schedule_cron_shape",
            message: format!(
                "schedule.cron '{}' has {cron_fields} fields, expected 5 to 7",
                config.schedule.cron
            ),
        });
    }

    let thresholds = &config.validation;
    if thresholds.min_regions == 0 || thresholds.min_records == 0 || thresholds.min_total_amount == 0
    {
        warnings.push(ConfigWarning {
            code: "validation_threshold_zero",
            message: "a validation threshold is 0; degenerate extractions may be published"
                .to_owned(),
        });
    }

    if config.publish.enabled && config.publish.repo.is_none() && config.publish.remote_url.is_none()
    {
        warnings.push(ConfigWarning {
            code: "publish_target_missing",
            message: "publish.enabled is set but neither publish.repo nor publish.remote_url is configured"
                .to_owned(),
        });
    }

    if config.extraction.max_document_chars == 0 {
        warnings.push(ConfigWarning {
            code: "extraction_prefix_zero",
            message: "extraction.max_document_chars is 0; nothing will be sent for extraction"
                .to_owned(),
        });
    }

    warnings
}

fn default_source_url() -> String {
    DEFAULT_SOURCE_URL.to_owned()
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_owned()
}

fn default_api_key_env() -> String {
    DEFAULT_ANTHROPIC_API_KEY_ENV.to_owned()
}

fn default_max_document_chars() -> usize {
    DEFAULT_MAX_DOCUMENT_CHARS
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_min_regions() -> usize {
    DEFAULT_MIN_REGIONS
}

fn default_min_records() -> usize {
    DEFAULT_MIN_RECORDS
}

fn default_min_total_amount() -> u64 {
    DEFAULT_MIN_TOTAL_AMOUNT
}

fn default_noise_threshold() -> u64 {
    DEFAULT_NOISE_THRESHOLD
}

fn default_snapshot_path() -> String {
    DEFAULT_SNAPSHOT_PATH.to_owned()
}

fn default_true() -> bool {
    true
}

fn default_token_env() -> String {
    DEFAULT_GITHUB_TOKEN_ENV.to_owned()
}

fn default_branch() -> String {
    DEFAULT_PUBLISH_BRANCH.to_owned()
}

fn default_author_name() -> String {
    DEFAULT_AUTHOR_NAME.to_owned()
}

fn default_author_email() -> String {
    DEFAULT_AUTHOR_EMAIL.to_owned()
}

fn default_update_cron() -> String {
    DEFAULT_UPDATE_CRON.to_owned()
}

fn default_bind() -> String {
    DEFAULT_BIND.to_owned()
}

fn default_update_api_key_env() -> String {
    DEFAULT_UPDATE_API_KEY_ENV.to_owned()
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_required(value: &mut String, fallback: fn() -> String) {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        *value = fallback();
    } else if trimmed.len() != value.len() {
        *value = trimmed.to_owned();
    }
}

fn normalize_config(mut config: FundwatchConfig) -> FundwatchConfig {
    config.extraction.model = normalize_optional(config.extraction.model.take());
    config.extraction.endpoint = normalize_optional(config.extraction.endpoint.take());
    config.publish.repo = normalize_optional(config.publish.repo.take());
    config.publish.remote_url = normalize_optional(config.publish.remote_url.take());

    normalize_required(&mut config.extraction.api_key_env, default_api_key_env);
    normalize_required(&mut config.publish.token_env, default_token_env);
    normalize_required(&mut config.publish.branch, default_branch);
    normalize_required(&mut config.schedule.cron, default_update_cron);
    normalize_required(&mut config.server.bind, default_bind);
    normalize_required(&mut config.server.api_key_env, default_update_api_key_env);
    normalize_required(&mut config.storage.snapshot_path, default_snapshot_path);

    config.source.url = config.source.url.trim().to_owned();
    if config.source.timeout_secs == 0 {
        config.source.timeout_secs = DEFAULT_FETCH_TIMEOUT_SECS;
    }

    config
}
