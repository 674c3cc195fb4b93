use std::path::Path;

use tidemark_common::{Error, Result};
use tracing::{debug, info};

use crate::model::RunnerConfig;

/// Reads `RunnerConfig` from YAML or TOML, picked by file extension.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &Path) -> Result<RunnerConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::parse(path, &contents)?;
        info!("config loaded from {}", path.display());
        Ok(config)
    }

    /// Like [`ConfigLoader::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<RunnerConfig> {
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(RunnerConfig::default());
        }
        Self::load(path)
    }

    fn parse(path: &Path, contents: &str) -> Result<RunnerConfig> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }
}
