use super::Capability;
use crate::error::CapabilityError;
use crate::script::runtime::ScriptResult;
use rhai::{Dynamic, ImmutableString, Module};

/// Read-only environment access: `env::get(name)`, `env::get(name, default)`,
/// `env::has(name)`.
pub struct EnvCapability;

impl Capability for EnvCapability {
    fn name(&self) -> &str {
        "env"
    }

    fn build(&self) -> Result<Module, CapabilityError> {
        let mut module = Module::new();
        module.set_native_fn("get", |name: ImmutableString| -> ScriptResult<Dynamic> {
            Ok(std::env::var(name.as_str())
                .map(Dynamic::from)
                .unwrap_or(Dynamic::UNIT))
        });
        module.set_native_fn(
            "get",
            |name: ImmutableString, default: Dynamic| -> ScriptResult<Dynamic> {
                Ok(std::env::var(name.as_str())
                    .map(Dynamic::from)
                    .unwrap_or(default))
            },
        );
        module.set_native_fn("has", |name: ImmutableString| -> ScriptResult<bool> {
            Ok(std::env::var_os(name.as_str()).is_some())
        });
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Engine;

    #[test]
    fn missing_variable_falls_back_to_default() {
        let mut engine = Engine::new();
        engine.register_static_module("env", EnvCapability.build().unwrap().into());
        let value: String = engine
            .eval(r#"env::get("DOCKET_TEST_SURELY_UNSET_VARIABLE", "fallback")"#)
            .unwrap();
        assert_eq!(value, "fallback");
        assert!(!engine
            .eval::<bool>(r#"env::has("DOCKET_TEST_SURELY_UNSET_VARIABLE")"#)
            .unwrap());
    }
}
