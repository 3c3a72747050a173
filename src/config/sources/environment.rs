//! Environment sources: DOCKET_<SECTION>__<KEY> variables and BROWSERLESS_ENDPOINT.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

pub const ENV_PREFIX: &str = "DOCKET";
pub const BROWSERLESS_ENDPOINT: &str = "BROWSERLESS_ENDPOINT";

/// `DOCKET_QUEUE__CONCURRENCY=4` sets `queue.concurrency`.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    builder.set_override_option("browser.endpoint", std::env::var(BROWSERLESS_ENDPOINT).ok())
}
