//! Script modules loaded from the modules directory.

use crate::error::CapabilityError;
use crate::script::ScriptRuntime;
use rhai::{Module, Scope};
use std::path::Path;
use tracing::debug;

/// Compile `locator` (relative to `dir`) into a module.
///
/// The resolved file must stay inside `dir` after symlinks and `..` are resolved.
pub(super) fn load(
    dir: &Path,
    locator: &str,
    name: &str,
    runtime: &ScriptRuntime,
) -> Result<Module, CapabilityError> {
    let forbidden = || CapabilityError::Forbidden(locator.to_string());
    let load_error = |message: String| CapabilityError::Load {
        name: name.to_string(),
        message,
    };

    let root = dir
        .canonicalize()
        .map_err(|e| load_error(format!("modules directory {}: {}", dir.display(), e)))?;
    let candidate = Path::new(locator);
    if candidate.is_absolute() {
        return Err(forbidden());
    }
    let mut path = root.join(candidate);
    if path.extension().is_none() {
        path.set_extension("rhai");
    }
    let path = match path.canonicalize() {
        Ok(path) => path,
        Err(_) if !lexically_inside(&root, &path) => return Err(forbidden()),
        Err(e) => return Err(load_error(format!("{}: {}", path.display(), e))),
    };
    if !path.starts_with(&root) {
        return Err(forbidden());
    }

    let text = std::fs::read_to_string(&path)
        .map_err(|e| load_error(format!("{}: {}", path.display(), e)))?;
    let engine = runtime.bare_engine();
    let ast = engine
        .compile(&text)
        .map_err(|e| load_error(e.to_string()))?;
    let module = Module::eval_ast_as_new(Scope::new(), &ast, &engine)
        .map_err(|e| load_error(e.to_string()))?;
    debug!(module = name, path = %path.display(), "Loaded script module");
    Ok(module)
}

fn lexically_inside(root: &Path, path: &Path) -> bool {
    let mut depth: i32 = 0;
    for component in path.strip_prefix(root).map(|p| p.components()).into_iter().flatten() {
        match component {
            std::path::Component::ParentDir => depth -= 1,
            std::path::Component::Normal(_) => depth += 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    path.starts_with(root)
}
