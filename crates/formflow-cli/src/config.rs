//! CLI Configuration

use crate::output::OutputFormat;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use formflow_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub default_format: Option<String>,
    pub log_level: Option<String>,
    pub engine: EngineConfig,
}

/// Keys understood by `config get` and `config set`
pub const KEYS: [&str; 5] = [
    "data_dir",
    "default_format",
    "log_level",
    "engine.password_min_length",
    "engine.formula_error_text",
];

impl Config {
    pub fn load(profile: Option<&str>) -> Result<Self> {
        let path = Self::config_path(profile)?;
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, profile: Option<&str>) -> Result<PathBuf> {
        let path = Self::config_path(profile)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub fn config_path(profile: Option<&str>) -> Result<PathBuf> {
        let filename = match profile {
            Some(p) => format!("config.{}.toml", p),
            None => "config.toml".to_string(),
        };
        Ok(Self::home()?.join(filename))
    }

    /// Where forms live when neither `--data-dir` nor `data_dir` is given
    pub fn default_data_dir() -> Result<PathBuf> {
        Ok(Self::home()?.join("forms"))
    }

    fn home() -> Result<PathBuf> {
        let home = dirs::home_dir().context("cannot find home directory")?;
        Ok(home.join(".formflow"))
    }

    pub fn output_format(&self) -> Option<OutputFormat> {
        self.default_format
            .as_deref()
            .and_then(|f| OutputFormat::from_str(f, true).ok())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(match key {
            "data_dir" => self.data_dir.as_ref().map(|d| d.display().to_string()),
            "default_format" => self.default_format.clone(),
            "log_level" => self.log_level.clone(),
            "engine.password_min_length" => Some(self.engine.password_min_length.to_string()),
            "engine.formula_error_text" => Some(self.engine.formula_error_text.clone()),
            _ => bail!("unknown config key: {key}"),
        })
    }

    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "data_dir" => self.data_dir = Some(value.into()),
            "default_format" => {
                OutputFormat::from_str(&value, true)
                    .map_err(|e| anyhow::anyhow!("invalid format {value:?}: {e}"))?;
                self.default_format = Some(value);
            }
            "log_level" => self.log_level = Some(value),
            "engine.password_min_length" => {
                self.engine.password_min_length = value
                    .parse()
                    .with_context(|| format!("invalid length {value:?}"))?;
            }
            "engine.formula_error_text" => self.engine.formula_error_text = value,
            _ => bail!("unknown config key: {key}"),
        }
        Ok(())
    }
}
