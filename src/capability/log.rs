use super::Capability;
use crate::error::CapabilityError;
use crate::script::runtime::ScriptResult;
use rhai::{ImmutableString, Module};
use tracing::{debug, error, info, warn};

/// Structured logging from scripts under the `docket::script` target.
pub struct LogCapability;

impl Capability for LogCapability {
    fn name(&self) -> &str {
        "log"
    }

    fn build(&self) -> Result<Module, CapabilityError> {
        let mut module = Module::new();
        module.set_native_fn("debug", |msg: ImmutableString| -> ScriptResult<()> {
            debug!(target: "docket::script", "{}", msg);
            Ok(())
        });
        module.set_native_fn("info", |msg: ImmutableString| -> ScriptResult<()> {
            info!(target: "docket::script", "{}", msg);
            Ok(())
        });
        module.set_native_fn("warn", |msg: ImmutableString| -> ScriptResult<()> {
            warn!(target: "docket::script", "{}", msg);
            Ok(())
        });
        module.set_native_fn("error", |msg: ImmutableString| -> ScriptResult<()> {
            error!(target: "docket::script", "{}", msg);
            Ok(())
        });
        Ok(module)
    }
}
