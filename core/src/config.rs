use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;

use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::prediction::PredictionSettings;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const CONFIG_TOML_FILE: &str = "config.toml";

/// Application configuration loaded from disk and merged with overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
    /// Environment variable holding the model API key.
    pub api_key_env: String,
    pub context_lines_before: usize,
    pub context_lines_after: usize,
    pub history_capacity: usize,
    /// Estimated tokens of recent edits included in a prediction prompt.
    pub history_token_budget: usize,
    /// Give up on a model request after this long. Unset means wait forever.
    pub prediction_timeout: Option<Duration>,
    /// Directory holding `config.toml` and `log/`.
    pub foresight_home: PathBuf,
}

/// On-disk shape of `config.toml`.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub context_lines_before: Option<usize>,
    pub context_lines_after: Option<usize>,
    pub history_capacity: Option<usize>,
    pub history_token_budget: Option<usize>,
    pub prediction_timeout_ms: Option<u64>,
}

/// Optional overrides for user configuration (e.g., from CLI flags).
#[derive(Default, Debug, Clone)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl Config {
    /// Load `config.toml` from the foresight home, apply the generic `-c`
    /// overrides and then the strongly typed ones.
    pub fn load_with_cli_overrides(
        cli_overrides: Vec<(String, Value)>,
        overrides: ConfigOverrides,
    ) -> std::io::Result<Self> {
        let foresight_home = find_foresight_home()?;
        let mut root = load_config_as_value(&foresight_home)?;
        for (path, value) in cli_overrides {
            apply_override(&mut root, &path, value);
        }
        let cfg: ConfigToml = serde_json::from_value(root).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid configuration: {e}"),
            )
        })?;
        Ok(Self::load_from_base_config_with_overrides(
            cfg,
            overrides,
            foresight_home,
        ))
    }

    pub fn load_from_base_config_with_overrides(
        cfg: ConfigToml,
        overrides: ConfigOverrides,
        foresight_home: PathBuf,
    ) -> Self {
        let ConfigOverrides { model, base_url } = overrides;
        Self {
            model: model
                .or(cfg.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: cfg.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            base_url: base_url
                .or(cfg.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key_env: cfg
                .api_key_env
                .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
            context_lines_before: cfg.context_lines_before.unwrap_or(10),
            context_lines_after: cfg.context_lines_after.unwrap_or(20),
            history_capacity: cfg.history_capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY),
            history_token_budget: cfg.history_token_budget.unwrap_or(1000),
            prediction_timeout: cfg.prediction_timeout_ms.map(Duration::from_millis),
            foresight_home,
        }
    }

    pub fn prediction_settings(&self) -> PredictionSettings {
        PredictionSettings {
            lines_before: self.context_lines_before,
            lines_after: self.context_lines_after,
            history_token_budget: self.history_token_budget,
            timeout: self.prediction_timeout,
        }
    }
}

/// Read `config.toml` from `foresight_home` as a JSON tree so overrides can
/// be layered on top. A missing file is an empty table.
fn load_config_as_value(foresight_home: &Path) -> std::io::Result<Value> {
    let path = foresight_home.join(CONFIG_TOML_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Value::Object(Map::new()));
        }
        Err(e) => return Err(e),
    };
    let table: toml::Value = toml::from_str(&contents).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to parse {}: {e}", path.display()),
        )
    })?;
    serde_json::to_value(table).map_err(std::io::Error::other)
}

/// Set `value` at the dotted `path` in `root`, creating intermediate tables
/// and replacing non-table values in the way.
fn apply_override(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(table) = current else {
            return;
        };
        if parts.peek().is_none() {
            table.insert(part.to_string(), value);
            return;
        }
        current = table
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Returns the foresight home directory: `$FORESIGHT_HOME` when set and
/// non-empty, `~/.foresight` otherwise. Does not verify that it exists.
pub fn find_foresight_home() -> std::io::Result<PathBuf> {
    if let Ok(value) = std::env::var("FORESIGHT_HOME")
        && !value.is_empty()
    {
        return Ok(PathBuf::from(value));
    }
    let mut p = home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find home directory",
        )
    })?;
    p.push(".foresight");
    Ok(p)
}

/// Returns the path to the folder where logs are stored. Does not verify
/// that the directory exists.
pub fn log_dir(cfg: &Config) -> PathBuf {
    cfg.foresight_home.join("log")
}
