use std::collections::BTreeMap;
use std::fs;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::GrabError;
use crate::grabber::GrabberConfig;
use crate::lifecycle::LifecycleOptions;
use crate::pattern::PatternSpec;
use crate::registry::GrabberRegistry;

pub const DEFAULT_CONFIG_FILE: &str = "kira-dg.json";
const SUPPORTED_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub grabbers: Vec<GrabberEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GrabberEntry {
    pub name: String,
    #[serde(default)]
    pub types: Option<Vec<String>>,
    pub replacements: Vec<String>,
    pub patterns: BTreeMap<String, PatternSpec>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub local_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub root_subdir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub skip_id_check: bool,
    #[serde(default)]
    pub skip_dirty_check: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub registry: GrabberRegistry,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GrabError> {
        let config_path = Utf8PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| GrabError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GrabError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GrabError> {
        let schema_version = config.schema_version.unwrap_or(SUPPORTED_SCHEMA_VERSION);
        if schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(GrabError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let mut registry = GrabberRegistry::new();
        for entry in config.grabbers {
            registry.register(entry.into_config())?;
        }

        Ok(ResolvedConfig {
            schema_version,
            registry,
        })
    }
}

impl GrabberEntry {
    fn into_config(self) -> GrabberConfig {
        GrabberConfig {
            name: self.name,
            types: self.types.unwrap_or_default(),
            replacements: self.replacements,
            patterns: self.patterns,
            remote_uri: self.uri,
            local_path: self.local_path,
            root_subdir: self.root_subdir,
            lifecycle: LifecycleOptions {
                skip_id_check: self.skip_id_check,
                skip_dirty_check: self.skip_dirty_check,
            },
        }
    }
}
