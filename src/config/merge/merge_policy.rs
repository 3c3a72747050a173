//! Merge rules: defaults first, later sources override earlier ones key by key.

use crate::config::default_store_path;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the defaults every later source overrides.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default(
            "storage.path",
            default_store_path().to_string_lossy().into_owned(),
        )?
        .set_default("queue.concurrency", 1_i64)?
        .set_default("queue.poll_interval_ms", 1_000_i64)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}
