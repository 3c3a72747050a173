use super::Capability;
use crate::error::CapabilityError;
use crate::script::runtime::{bridge, host_error, ScriptResult};
use rhai::{Array, Dynamic, ImmutableString, Map, Module, INT};
use tokio::process::Command;

/// Run a command to completion: `process::run("ls -l")` goes through `sh -c`,
/// `process::run("ls", ["-l"])` executes directly. Returns `#{code, stdout, stderr}`.
pub struct ProcessCapability;

impl Capability for ProcessCapability {
    fn name(&self) -> &str {
        "process"
    }

    fn build(&self) -> Result<Module, CapabilityError> {
        let mut module = Module::new();
        module.set_native_fn("run", |command: ImmutableString| -> ScriptResult<Map> {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command.as_str());
            run(cmd)
        });
        module.set_native_fn(
            "run",
            |program: ImmutableString, args: Array| -> ScriptResult<Map> {
                let mut cmd = Command::new(program.as_str());
                cmd.args(args.iter().map(|a| a.to_string()));
                run(cmd)
            },
        );
        Ok(module)
    }
}

fn run(mut cmd: Command) -> ScriptResult<Map> {
    // Killed when a cancelled job drops the bridged future.
    cmd.kill_on_drop(true);
    let output = bridge(async move { cmd.output().await })?
        .map_err(|e| host_error(format!("failed to run process: {}", e)))?;
    let mut result = Map::new();
    result.insert(
        "code".into(),
        Dynamic::from_int(output.status.code().map(INT::from).unwrap_or(-1)),
    );
    result.insert(
        "stdout".into(),
        Dynamic::from(String::from_utf8_lossy(&output.stdout).into_owned()),
    );
    result.insert(
        "stderr".into(),
        Dynamic::from(String::from_utf8_lossy(&output.stderr).into_owned()),
    );
    Ok(result)
}
