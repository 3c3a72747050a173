use super::Capability;
use crate::error::CapabilityError;
use crate::script::runtime::{bridge, host_error, ScriptResult};
use chrono::{TimeZone, Utc};
use rhai::{ImmutableString, Module, INT};
use std::fmt::Write;
use std::time::Duration;

/// Clock access: `time::now()`, `time::millis()`, `time::format(ms, fmt)`, `time::sleep(ms)`.
pub struct TimeCapability;

impl Capability for TimeCapability {
    fn name(&self) -> &str {
        "time"
    }

    fn build(&self) -> Result<Module, CapabilityError> {
        let mut module = Module::new();
        module.set_native_fn("now", || -> ScriptResult<String> { Ok(Utc::now().to_rfc3339()) });
        module.set_native_fn("millis", || -> ScriptResult<INT> {
            Ok(Utc::now().timestamp_millis() as INT)
        });
        module.set_native_fn(
            "format",
            |millis: INT, pattern: ImmutableString| -> ScriptResult<String> {
                let dt = Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| host_error(format!("timestamp {} is out of range", millis)))?;
                let mut out = String::new();
                write!(out, "{}", dt.format(pattern.as_str()))
                    .map_err(|_| host_error(format!("invalid time format '{}'", pattern)))?;
                Ok(out)
            },
        );
        module.set_native_fn("sleep", |millis: INT| -> ScriptResult<()> {
            let millis = millis.max(0) as u64;
            bridge(tokio::time::sleep(Duration::from_millis(millis)))
        });
        Ok(module)
    }
}
