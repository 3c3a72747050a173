//! Capability modules
//!
//! Capabilities are the host services a job's code may use. A document lists the ones it
//! needs under `modules`; each entry is resolved when the execution context is built and
//! exposed to scripts as a namespace (`time::now()`, `kv::get("k")`).
//!
//! Entries are either a built-in name or a `{name, source}` pair, where `source` names a
//! built-in (aliasing it under `name`) or a `.rhai` file inside the configured modules
//! directory.

mod env;
mod http;
mod kv;
mod log;
mod process;
mod script;
mod time;

pub use env::EnvCapability;
pub use http::HttpCapability;
pub use kv::KvCapability;
pub use log::LogCapability;
pub use process::ProcessCapability;
pub use time::TimeCapability;

use crate::document::ModuleRef;
use crate::error::CapabilityError;
use crate::script::ScriptRuntime;
use indexmap::IndexMap;
use rhai::{Module, Shared};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// A host service exposed to scripts as a module.
pub trait Capability: Send + Sync {
    /// Name the capability is registered under
    fn name(&self) -> &str;

    /// Build the script module. Called once, when the capability is registered.
    fn build(&self) -> Result<Module, CapabilityError>;
}

/// A module ready to be installed into an engine under `name`.
#[derive(Clone)]
pub struct ResolvedModule {
    pub name: String,
    pub module: Shared<Module>,
}

/// Modules resolved for one invocation.
pub type ModuleSet = Arc<Vec<ResolvedModule>>;

/// Name or locator to ready module.
pub struct CapabilityRegistry {
    builtins: IndexMap<String, Shared<Module>>,
    modules_dir: Option<PathBuf>,
}

impl CapabilityRegistry {
    /// Empty registry. Script modules may be loaded from `modules_dir` when set.
    pub fn new(modules_dir: Option<PathBuf>) -> Self {
        Self {
            builtins: IndexMap::new(),
            modules_dir,
        }
    }

    /// Registry with every built-in capability.
    pub fn with_builtins(
        db: &sled::Db,
        client: reqwest::Client,
        modules_dir: Option<PathBuf>,
    ) -> Result<Self, CapabilityError> {
        let mut registry = Self::new(modules_dir);
        registry.register(&TimeCapability)?;
        registry.register(&KvCapability::open(db)?)?;
        registry.register(&HttpCapability::new(client))?;
        registry.register(&ProcessCapability)?;
        registry.register(&LogCapability)?;
        registry.register(&EnvCapability)?;
        Ok(registry)
    }

    pub fn register(&mut self, capability: &dyn Capability) -> Result<(), CapabilityError> {
        let module = capability.build()?;
        debug!(capability = capability.name(), "Registered capability");
        self.builtins
            .insert(capability.name().to_string(), Shared::new(module));
        Ok(())
    }

    /// Registered built-in names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.builtins.keys().cloned().collect()
    }

    pub fn modules_dir(&self) -> Option<&PathBuf> {
        self.modules_dir.as_ref()
    }

    /// Resolve one document entry.
    pub fn resolve(
        &self,
        entry: &ModuleRef,
        runtime: &ScriptRuntime,
    ) -> Result<ResolvedModule, CapabilityError> {
        let locator = entry.source.as_deref().unwrap_or(&entry.name);
        let module = match self.builtins.get(locator) {
            Some(module) => module.clone(),
            None if entry.source.is_some() => {
                let dir = self
                    .modules_dir
                    .as_ref()
                    .ok_or_else(|| CapabilityError::Forbidden(locator.to_string()))?;
                Shared::new(script::load(dir, locator, &entry.name, runtime)?)
            }
            None => return Err(CapabilityError::Unresolvable(entry.name.clone())),
        };
        Ok(ResolvedModule {
            name: entry.name.clone(),
            module,
        })
    }

    /// Resolve every entry; the first failure fails the whole set.
    pub fn resolve_all(
        &self,
        entries: &[ModuleRef],
        runtime: &ScriptRuntime,
    ) -> Result<ModuleSet, CapabilityError> {
        let resolved = entries
            .iter()
            .map(|entry| self.resolve(entry, runtime))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(resolved))
    }
}
