//! Environment-driven configuration, with a per-environment settings overlay.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "staging" => Environment::Staging,
            "production" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Settings that vary by deployment environment, matching the original
/// `get_environment_settings()` overlay rather than a bare global dict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    pub fallback_enabled: bool,
    pub validation_strict: bool,
    pub log_format: &'static str,
}

impl EnvironmentSettings {
    fn for_environment(env: Environment) -> Self {
        match env {
            Environment::Development => EnvironmentSettings {
                fallback_enabled: true,
                validation_strict: false,
                log_format: "detailed",
            },
            Environment::Staging | Environment::Production => EnvironmentSettings {
                fallback_enabled: true,
                validation_strict: true,
                log_format: "standard",
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataSourceConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub debug: bool,
    pub log_level: String,
    pub api_host: String,
    pub api_port: u16,
    pub storage_root: String,
    pub load_forecast: DataSourceConfig,
    pub historical_prices: DataSourceConfig,
    pub generation_forecast: DataSourceConfig,
    pub settings: EnvironmentSettings,
}

/// Optional overlay read from a TOML file (`--config-file`), applied on top
/// of the environment-derived `Config`. Every field is optional so a file
/// only needs to name the settings it overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFileOverrides {
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
    pub storage_root: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigFileOverrides {
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let environment = Environment::parse(&env_var("ENVIRONMENT", "development"));
        let debug = parse_bool(&env_var("DEBUG", "true"));
        let log_level = env_var("LOG_LEVEL", "INFO");
        let api_host = env_var("API_HOST", "0.0.0.0");
        let api_port = env_var("API_PORT", "5000").parse().unwrap_or(5000);
        let storage_root = env_var("STORAGE_ROOT_DIR", "./data/forecasts");

        let load_forecast = DataSourceConfig {
            url: env_var("LOAD_FORECAST_URL", "http://example.com/api/load-forecast"),
            api_key: env_var("LOAD_FORECAST_API_KEY", ""),
        };
        let historical_prices = DataSourceConfig {
            url: env_var(
                "HISTORICAL_PRICES_URL",
                "http://example.com/api/historical-prices",
            ),
            api_key: env_var("HISTORICAL_PRICES_API_KEY", ""),
        };
        let generation_forecast = DataSourceConfig {
            url: env_var(
                "GENERATION_FORECAST_URL",
                "http://example.com/api/generation-forecast",
            ),
            api_key: env_var("GENERATION_FORECAST_API_KEY", ""),
        };

        let settings = EnvironmentSettings::for_environment(environment);

        Self {
            environment,
            debug,
            log_level,
            api_host,
            api_port,
            storage_root,
            load_forecast,
            historical_prices,
            generation_forecast,
            settings,
        }
    }

    /// Applies a config-file overlay on top of the environment-derived
    /// settings; the file wins wherever it sets a field.
    pub fn apply_overrides(mut self, overrides: ConfigFileOverrides) -> Self {
        if let Some(host) = overrides.api_host {
            self.api_host = host;
        }
        if let Some(port) = overrides.api_port {
            self.api_port = port;
        }
        if let Some(root) = overrides.storage_root {
            self.storage_root = root;
        }
        if let Some(log_level) = overrides.log_level {
            self.log_level = log_level;
        }
        self
    }
}

fn env_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "t")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parse_defaults_to_development() {
        assert_eq!(Environment::parse("bogus").as_str(), "development");
        assert_eq!(Environment::parse("PRODUCTION").as_str(), "production");
    }

    #[test]
    fn development_settings_are_lenient() {
        let s = EnvironmentSettings::for_environment(Environment::Development);
        assert!(!s.validation_strict);
        assert_eq!(s.log_format, "detailed");
    }

    #[test]
    fn production_settings_are_strict() {
        let s = EnvironmentSettings::for_environment(Environment::Production);
        assert!(s.validation_strict);
        assert_eq!(s.log_format, "standard");
    }

    #[test]
    fn parse_bool_accepts_common_truthy_forms() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("T"));
        assert!(!parse_bool("false"));
    }
}
