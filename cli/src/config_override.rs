//! `-c key=value` overrides layered on top of `config.toml`.

use clap::ArgAction;
use clap::Parser;
use serde_json::Value;

/// Raw `-c key=value` occurrences, kept unparsed until the configuration is
/// loaded.
#[derive(Parser, Debug, Default, Clone)]
pub struct CliConfigOverrides {
    /// Override a value from `~/.foresight/config.toml`. Use a dotted path
    /// for nested values. The value is parsed as JSON and falls back to a
    /// literal string.
    ///
    /// Examples:
    ///   - `-c model=claude-haiku-4-5`
    ///   - `-c prediction_timeout_ms=4000`
    #[arg(
        short = 'c',
        long = "config",
        value_name = "key=value",
        action = ArgAction::Append,
        global = true,
    )]
    pub raw_overrides: Vec<String>,
}

impl CliConfigOverrides {
    /// Split each override on its first `=` into a dotted path and a value.
    pub fn parse_overrides(&self) -> Result<Vec<(String, Value)>, String> {
        self.raw_overrides
            .iter()
            .map(|raw| {
                let (key, value) = raw
                    .split_once('=')
                    .ok_or_else(|| format!("Invalid override (missing '='): {raw}"))?;
                let key = key.trim();
                if key.is_empty() {
                    return Err(format!("Empty key in override: {raw}"));
                }
                let value = value.trim();
                let value = serde_json::from_str(value)
                    .unwrap_or_else(|_| Value::String(value.to_string()));
                Ok((key.to_string(), value))
            })
            .collect()
    }
}
