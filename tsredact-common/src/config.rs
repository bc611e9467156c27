use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<String>, // falls back to the data dir when None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_unit")]
    pub most_significant_unit: String,
}

fn default_true() -> bool {
    true
}
fn default_unit() -> String {
    "year".into()
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            most_significant_unit: default_unit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub first_day: i64,
    #[serde(default)]
    pub until_day: Option<i64>, // unbounded when None
    #[serde(default = "default_true")]
    pub pretty: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            first_day: 0,
            until_day: None,
            pretty: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tsredact")
            .join("config.toml")
    }

    /// default location of the JSON key-value store backing the study
    pub fn default_storage_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tsredact")
            .join("storage.json")
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_storage_path)
    }

    pub fn load() -> crate::Result<Self> {
        let path = if let Ok(env_path) = std::env::var("TSREDACT_CONFIG") {
            PathBuf::from(env_path) // $TSREDACT_CONFIG overrides default config path
        } else {
            Self::config_path()
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let cfg: Self =
            toml::from_str(&content).map_err(|e| crate::StudyError::Config(e.to_string()))?;
        Ok(cfg)
    }

    pub fn save(&self) -> crate::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::StudyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
