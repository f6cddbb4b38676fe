use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::PedigreeError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-pedigree.json";
pub const DEFAULT_OFFSET: u64 = 100_000;
pub const DEFAULT_ALIAS_MAX_LENGTH: usize = 100;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    /// Boundary between numeric names and durable ids.
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub alias_max_length: Option<usize>,
    #[serde(default)]
    pub store: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub schema_version: u32,
    pub offset: u64,
    pub alias_max_length: usize,
    pub store_root: Utf8PathBuf,
}

impl CatalogConfig {
    /// Defaults with an explicit store root; handy for tests and embedding.
    pub fn with_store_root(store_root: Utf8PathBuf) -> Self {
        Self {
            schema_version: 1,
            offset: DEFAULT_OFFSET,
            alias_max_length: DEFAULT_ALIAS_MAX_LENGTH,
            store_root,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; the implicit `kira-pedigree.json` is optional.
    pub fn resolve(path: Option<&str>) -> Result<CatalogConfig, PedigreeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PedigreeError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PedigreeError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<CatalogConfig, PedigreeError> {
        let alias_max_length = config.alias_max_length.unwrap_or(DEFAULT_ALIAS_MAX_LENGTH);
        if alias_max_length == 0 {
            return Err(PedigreeError::ConfigParse(
                "alias_max_length must be positive".to_string(),
            ));
        }

        let store_root = match config.store {
            Some(store) => Utf8PathBuf::from(store),
            None => default_store_root()?,
        };

        Ok(CatalogConfig {
            schema_version: config.schema_version.unwrap_or(1),
            offset: config.offset.unwrap_or(DEFAULT_OFFSET),
            alias_max_length,
            store_root,
        })
    }
}

pub fn default_store_root() -> Result<Utf8PathBuf, PedigreeError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-pedigree")).ok()
        })
        .ok_or_else(|| PedigreeError::Filesystem("unable to resolve store directory".to_string()))
}
