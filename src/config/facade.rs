//! Entry points for loading a [`DocketConfig`].

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::DocketConfig;
use crate::error::DocketError;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, user file, `docket.toml` under `root`, then environment.
    pub fn load(root: &Path) -> Result<DocketConfig, DocketError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, root)?;
        let builder = environment::add_to_builder(builder)?;
        let config: DocketConfig = builder.build()?.try_deserialize()?;
        debug!(root = %root.display(), "Configuration loaded");
        Ok(config)
    }

    /// Defaults, the given file, then environment. The file must exist.
    pub fn load_from_file(path: &Path) -> Result<DocketConfig, DocketError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = workspace_file::add_file_to_builder(builder, path)?;
        let builder = environment::add_to_builder(builder)?;
        let config: DocketConfig = builder.build()?.try_deserialize()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load and validate, joining every validation problem into one error.
    pub fn load_validated(file: Option<&Path>, root: &Path) -> Result<DocketConfig, DocketError> {
        let config = match file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load(root)?,
        };
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            DocketError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Ok(config)
    }

    pub fn user_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
