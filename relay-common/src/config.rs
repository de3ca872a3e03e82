//! Configuration management for the relay.
//!
//! The relay reads a JSON file at `~/.tg-relay/config.json` (or an explicit
//! path), then applies environment overrides on top.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (non-empty values only)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TELEGRAM_BOT_TOKEN` → telegram.bot_token
//! - `ADMIN_USER_IDS` → admin.user_ids (comma separated, invalid items skipped)
//! - `OPENROUTER_API_URL` / `OPENAI_API_URL` → completion.api_url
//! - `OPENROUTER_API_KEY` / `OPENAI_API_KEY` → completion.api_key
//! - `OPENROUTER_MODEL` / `OPENAI_MODEL` → completion.model
//! - `OPENROUTER_HTTP_REFERER` → completion.http_referer
//! - `OPENROUTER_X_TITLE` → completion.x_title
//! - `REDIS_URL`, or `REDIS_HOST` + `REDIS_PORT` → redis.url
//! - `RELAY_DB_PATH` → database.path
//! - `RELAY_LOG_LEVEL` → observability.log_level
//! - `RELAY_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::kv::KvBackend;

/// Default system instruction used when a user has no preset.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".tg-relay"),
        |dirs| dirs.home_dir().join(".tg-relay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Sections
// ============================================================================

/// Telegram transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(default)]
    pub bot_token: String,

    /// Bot API base URL.
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Long-poll timeout passed to getUpdates, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout_secs() -> u64 {
    60
}

/// OpenAI-compatible completion service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL; requests go to `{api_url}/v1/chat/completions`.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Sent as `HTTP-Referer` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_referer: Option<String>,

    /// Sent as `X-Title` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_title: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            http_referer: None,
            x_title: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://openrouter.ai/api".into()
}

fn default_model() -> String {
    "openai/gpt-4o".into()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Ephemeral store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub backend: KvBackend,

    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            backend: KvBackend::default(),
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".into()
}

/// Allow-list database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    config_dir().join("allowlist.db")
}

/// Admin bootstrap configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Telegram user ids that are bootstrapped as admins at startup.
    #[serde(default)]
    pub user_ids: Vec<i64>,
}

/// Session window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// System instruction for users without a preset.
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,

    /// Prompt budget in characters (Unicode scalar values).
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Sliding TTL for history, refreshed on each append.
    #[serde(default = "default_history_ttl_secs")]
    pub history_ttl_secs: u64,

    #[serde(default = "default_preset_ttl_secs")]
    pub preset_ttl_secs: u64,
}

impl SessionConfig {
    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_ttl_secs)
    }

    pub fn preset_ttl(&self) -> Duration {
        Duration::from_secs(self.preset_ttl_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: default_system_prompt(),
            max_context_chars: default_max_context_chars(),
            history_ttl_secs: default_history_ttl_secs(),
            preset_ttl_secs: default_preset_ttl_secs(),
        }
    }
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}

fn default_max_context_chars() -> usize {
    3000
}

fn default_history_ttl_secs() -> u64 {
    30 * 60
}

fn default_preset_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Fixed-window rate limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_max_requests() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

/// Event dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum events processed at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Capacity of the channel between the transport listener and the dispatcher.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_max_concurrent() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    100
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

/// One selectable persona.
///
/// `command` is the slash command that selects it (e.g. `/coder`), `button` is
/// the label shown on the inline keyboard, `content` is the system instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetItem {
    pub button: String,
    pub command: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
struct PresetFile {
    #[serde(default)]
    items: Vec<PresetItem>,
}

fn default_presets_file() -> PathBuf {
    PathBuf::from("config/presets.toml")
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Inline presets. When empty, `presets_file` is read instead.
    #[serde(default)]
    pub presets: Vec<PresetItem>,

    #[serde(default = "default_presets_file")]
    pub presets_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            completion: CompletionConfig::default(),
            redis: RedisConfig::default(),
            database: DatabaseConfig::default(),
            admin: AdminConfig::default(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            dispatcher: DispatcherConfig::default(),
            observability: ObservabilityConfig::default(),
            presets: Vec::new(),
            presets_file: default_presets_file(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration, apply environment overrides and resolve presets.
    ///
    /// `path` wins over `$RELAY_CONFIG`, which wins over the default path.
    /// An explicit path that does not exist is an error.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| non_empty_env("RELAY_CONFIG").map(PathBuf::from));

        let mut config = match explicit {
            Some(p) => Self::load_from(&p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        config.resolve_presets();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(non_empty_env);
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// `lookup` must return `None` for unset or empty variables.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }

        if let Some(ids) = lookup("ADMIN_USER_IDS") {
            self.admin.user_ids = parse_id_list(&ids);
        }

        if let Some(url) = lookup("OPENROUTER_API_URL").or_else(|| lookup("OPENAI_API_URL")) {
            self.completion.api_url = url;
        }
        if let Some(key) = lookup("OPENROUTER_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.completion.api_key = Some(key);
        }
        if let Some(model) = lookup("OPENROUTER_MODEL").or_else(|| lookup("OPENAI_MODEL")) {
            self.completion.model = model;
        }
        if let Some(referer) = lookup("OPENROUTER_HTTP_REFERER") {
            self.completion.http_referer = Some(referer);
        }
        if let Some(title) = lookup("OPENROUTER_X_TITLE") {
            self.completion.x_title = Some(title);
        }

        if let Some(url) = lookup("REDIS_URL") {
            self.redis.url = url;
        } else if lookup("REDIS_HOST").is_some() || lookup("REDIS_PORT").is_some() {
            let host = lookup("REDIS_HOST").unwrap_or_else(|| "localhost".into());
            let port = lookup("REDIS_PORT").unwrap_or_else(|| "6379".into());
            self.redis.url = format!("redis://{host}:{port}");
        }

        if let Some(path) = lookup("RELAY_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }

        if let Some(level) = lookup("RELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("RELAY_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Fill `presets` from `presets_file` when none are configured inline.
    ///
    /// A missing or unparseable file leaves the relay without presets.
    pub fn resolve_presets(&mut self) {
        if !self.presets.is_empty() {
            return;
        }
        match load_presets_file(&self.presets_file) {
            Ok(items) => {
                tracing::info!(
                    path = %self.presets_file.display(),
                    count = items.len(),
                    "Presets loaded"
                );
                self.presets = items;
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.presets_file.display(),
                    error = %e,
                    "Could not load presets, continuing without them"
                );
            }
        }
    }

    /// Check the settings startup cannot do without.
    pub fn validate(&self) -> crate::Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(Error::Config("TELEGRAM_BOT_TOKEN is not set".into()));
        }
        if self.admin.user_ids.is_empty() {
            return Err(Error::Config("ADMIN_USER_IDS is not set".into()));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(Error::Config(
                "rate_limit.max_requests and rate_limit.window_secs must be positive".into(),
            ));
        }
        if self.dispatcher.max_concurrent == 0 || self.dispatcher.queue_capacity == 0 {
            return Err(Error::Config(
                "dispatcher.max_concurrent and dispatcher.queue_capacity must be positive".into(),
            ));
        }
        if self.session.max_context_chars == 0 {
            return Err(Error::Config("session.max_context_chars must be positive".into()));
        }
        for item in &self.presets {
            if !item.command.starts_with('/') || item.command.len() < 2 {
                return Err(Error::Config(format!(
                    "preset command '{}' must start with '/'",
                    item.command
                )));
            }
        }
        Ok(())
    }
}

/// Read `[[items]]` presets from a TOML file.
pub fn load_presets_file(path: &Path) -> Result<Vec<PresetItem>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read presets from {}", path.display()))?;
    let file: PresetFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse presets from {}", path.display()))?;
    Ok(file.items)
}

/// Parse a comma separated id list, skipping invalid items.
pub fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Load `KEY=VALUE` pairs from a dotenv-style file into the process environment.
///
/// Blank lines and `#` comments are skipped, surrounding quotes are stripped.
/// Returns the number of variables set. Call before any threads are spawned.
pub fn load_env_file(path: &Path) -> Result<usize> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read env file {}", path.display()))?;

    let mut count = 0;
    for (key, value) in parse_env_lines(&content) {
        std::env::set_var(key, value);
        count += 1;
    }
    Ok(count)
}

fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.telegram.bot_token = "123:abc".into();
        config.admin.user_ids = vec![42];
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session.max_context_chars, 3000);
        assert_eq!(config.session.history_ttl(), Duration::from_secs(1800));
        assert_eq!(config.session.preset_ttl(), Duration::from_secs(86400));
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.dispatcher.max_concurrent, 10);
        assert_eq!(config.completion.api_url, "https://openrouter.ai/api");
        assert_eq!(config.completion.timeout_secs, 60);
        assert_eq!(config.redis.backend, KvBackend::Redis);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "telegram": { "bot_token": "t" },
            "session": { "max_context_chars": 500 },
            "observability": { "level": "debug" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.telegram.bot_token, "t");
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
        assert_eq!(config.session.max_context_chars, 500);
        assert_eq!(config.session.history_ttl_secs, 1800);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides_from(lookup_from(&[
            ("TELEGRAM_BOT_TOKEN", "bot-token"),
            ("ADMIN_USER_IDS", "1, 2,abc,,3"),
            ("OPENAI_API_URL", "http://openai.local"),
            ("OPENROUTER_API_KEY", "or-key"),
            ("OPENAI_API_KEY", "oa-key"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("OPENROUTER_X_TITLE", "Relay"),
            ("REDIS_HOST", "cache"),
            ("RELAY_LOG_FORMAT", "json"),
        ]));

        assert_eq!(config.telegram.bot_token, "bot-token");
        assert_eq!(config.admin.user_ids, vec![1, 2, 3]);
        assert_eq!(config.completion.api_url, "http://openai.local");
        assert_eq!(config.completion.api_key.as_deref(), Some("or-key"));
        assert_eq!(config.completion.model, "gpt-4o-mini");
        assert_eq!(config.completion.x_title.as_deref(), Some("Relay"));
        assert_eq!(config.completion.http_referer, None);
        assert_eq!(config.redis.url, "redis://cache:6379");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_redis_url_wins_over_host_port() {
        let mut config = Config::default();
        config.apply_overrides_from(lookup_from(&[
            ("REDIS_URL", "redis://primary:6380/2"),
            ("REDIS_HOST", "ignored"),
        ]));
        assert_eq!(config.redis.url, "redis://primary:6380/2");
    }

    #[test]
    fn test_validate() {
        assert!(valid_config().validate().is_ok());

        let mut missing_token = valid_config();
        missing_token.telegram.bot_token.clear();
        let err = missing_token.validate().unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));

        let mut missing_admins = valid_config();
        missing_admins.admin.user_ids.clear();
        assert!(missing_admins.validate().is_err());

        let mut zero_limit = valid_config();
        zero_limit.rate_limit.max_requests = 0;
        assert!(zero_limit.validate().is_err());

        let mut bad_preset = valid_config();
        bad_preset.presets.push(PresetItem {
            button: "Coder".into(),
            command: "coder".into(),
            content: "You write code.".into(),
        });
        assert!(bad_preset.validate().is_err());
    }

    #[test]
    fn test_presets_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[items]]
button = "Coder"
command = "/coder"
content = "You are a senior engineer."

[[items]]
button = "Translator"
command = "/translate"
content = "Translate everything into English."
"#
        )
        .unwrap();

        let mut config = Config {
            presets_file: file.path().to_path_buf(),
            ..Config::default()
        };
        config.resolve_presets();
        assert_eq!(config.presets.len(), 2);
        assert_eq!(config.presets[0].command, "/coder");
        assert_eq!(config.presets[1].button, "Translator");
    }

    #[test]
    fn test_shipped_samples_parse() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("config");

        let presets = load_presets_file(&root.join("presets.toml")).unwrap();
        assert!(!presets.is_empty());
        assert!(presets.iter().all(|p| p.command.starts_with('/')));

        let mut config = Config::load_from(&root.join("config.example.json")).unwrap();
        config.presets = presets;
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_presets_file_leaves_empty() {
        let mut config = Config {
            presets_file: PathBuf::from("/nonexistent/presets.toml"),
            ..Config::default()
        };
        config.resolve_presets();
        assert!(config.presets.is_empty());
    }

    #[test]
    fn test_inline_presets_skip_file() {
        let inline = PresetItem {
            button: "Inline".into(),
            command: "/inline".into(),
            content: "x".into(),
        };
        let mut config = Config {
            presets: vec![inline.clone()],
            presets_file: PathBuf::from("/nonexistent/presets.toml"),
            ..Config::default()
        };
        config.resolve_presets();
        assert_eq!(config.presets, vec![inline]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"admin": {"user_ids": [7, 8]}, "rate_limit": {"max_requests": 3}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.admin.user_ids, vec![7, 8]);
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.rate_limit.window_secs, 60);
    }

    #[test]
    fn test_load_from_missing_file_errors() {
        assert!(Config::load_from(Path::new("/nonexistent/config.json")).is_err());
    }

    #[test]
    fn test_parse_env_lines() {
        let parsed = parse_env_lines(
            "# comment\n\nTELEGRAM_BOT_TOKEN=\"123:abc\"\nexport REDIS_PORT=6380\nOPENAI_MODEL='gpt'\nnoequals\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("TELEGRAM_BOT_TOKEN".to_string(), "123:abc".to_string()),
                ("REDIS_PORT".to_string(), "6380".to_string()),
                ("OPENAI_MODEL".to_string(), "gpt".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list(""), Vec::<i64>::new());
        assert_eq!(parse_id_list("10,-5, x ,20"), vec![10, -5, 20]);
    }
}
