use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const MODS_DIR_ENV: &str = "MODS_DIR";
pub const API_KEY_ENV: &str = "NEXUSMODS_API_KEY";
const LIBRARY_FILE: &str = "modwatch.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mods_dir: Option<PathBuf>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub library_path: Option<PathBuf>,
    #[serde(default = "default_check_workers")]
    pub check_workers: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mods_dir: None,
            api_key: None,
            library_path: None,
            check_workers: default_check_workers(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            serde_json::from_str(&raw).context("parse app config")?
        } else {
            let config = AppConfig::default();
            config.save()?;
            config
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    /// Environment values win over the file; blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(dir) = value(MODS_DIR_ENV) {
            self.mods_dir = Some(PathBuf::from(dir));
        }
        if let Some(key) = value(API_KEY_ENV) {
            self.api_key = Some(key.trim().to_string());
        }
    }

    /// Explicit path, else next to the mods directory, else the data dir.
    pub fn library_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.library_path {
            return Ok(path.clone());
        }
        if let Some(parent) = self.mods_dir.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                return Ok(parent.join(LIBRARY_FILE));
            }
        }
        Ok(base_data_dir()?.join(LIBRARY_FILE))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn default_check_workers() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    10
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("modwatch"))
}
