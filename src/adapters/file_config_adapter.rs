//! INI file configuration adapter with environment overrides.
//!
//! A value for `[section] key` is taken from `MARKET_TRACKER_<SECTION>_<KEY>`
//! when that variable is set, otherwise from the file.

use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::collections::HashMap;
use std::path::Path;

pub const ENV_PREFIX: &str = "MARKET_TRACKER_";

pub struct FileConfigAdapter {
    config: Ini,
    overrides: HashMap<String, String>,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut config = Ini::new();
        config.load(path).map_err(std::io::Error::other)?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new();
        config.read(content.to_string())?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    /// Layer the process environment over the file.
    pub fn with_env(self) -> Self {
        let vars = std::env::vars().filter(|(name, _)| name.starts_with(ENV_PREFIX));
        self.with_overrides(vars)
    }

    /// Layer `(VARIABLE, value)` pairs over the file.
    pub fn with_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.overrides
            .extend(vars.into_iter().map(|(k, v)| (k.to_uppercase(), v)));
        self
    }

    fn env_name(section: &str, key: &str) -> String {
        format!("{ENV_PREFIX}{section}_{key}").to_uppercase()
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.overrides
            .get(&Self::env_name(section, key))
            .cloned()
            .or_else(|| self.config.get(section, key))
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get_string(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.get_string(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get_string(section, key)
            .as_deref()
            .and_then(Self::parse_bool)
            .unwrap_or(default)
    }
}
