use super::Capability;
use crate::error::CapabilityError;
use crate::script::convert::{dynamic_to_json, json_to_dynamic};
use crate::script::runtime::{host_error, ScriptResult};
use rhai::{Array, Dynamic, ImmutableString, Module};

/// Tree holding script key/value data.
pub const KV_TREE: &str = "kv";

/// Durable key/value storage in the job store: `kv::get`, `kv::set`, `kv::remove`,
/// `kv::keys`.
///
/// Values are stored as JSON.
pub struct KvCapability {
    tree: sled::Tree,
}

impl KvCapability {
    pub fn open(db: &sled::Db) -> Result<Self, CapabilityError> {
        let tree = db.open_tree(KV_TREE).map_err(|e| CapabilityError::Load {
            name: "kv".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { tree })
    }
}

impl Capability for KvCapability {
    fn name(&self) -> &str {
        "kv"
    }

    fn build(&self) -> Result<Module, CapabilityError> {
        let mut module = Module::new();

        let tree = self.tree.clone();
        module.set_native_fn("get", move |key: ImmutableString| -> ScriptResult<Dynamic> {
            match tree.get(key.as_bytes()).map_err(|e| host_error(e.to_string()))? {
                Some(bytes) => {
                    let value: serde_json::Value = serde_json::from_slice(&bytes)
                        .map_err(|e| host_error(format!("kv value '{}' is corrupt: {}", key, e)))?;
                    Ok(json_to_dynamic(&value))
                }
                None => Ok(Dynamic::UNIT),
            }
        });

        let tree = self.tree.clone();
        module.set_native_fn("set", move |key: ImmutableString, value: Dynamic| -> ScriptResult<()> {
            let bytes = serde_json::to_vec(&dynamic_to_json(&value))
                .map_err(|e| host_error(e.to_string()))?;
            tree.insert(key.as_bytes(), bytes)
                .map_err(|e| host_error(e.to_string()))?;
            Ok(())
        });

        let tree = self.tree.clone();
        module.set_native_fn("remove", move |key: ImmutableString| -> ScriptResult<bool> {
            let removed = tree
                .remove(key.as_bytes())
                .map_err(|e| host_error(e.to_string()))?;
            Ok(removed.is_some())
        });

        let tree = self.tree.clone();
        module.set_native_fn("keys", move |prefix: ImmutableString| -> ScriptResult<Array> {
            let mut keys = Array::new();
            for entry in tree.scan_prefix(prefix.as_bytes()) {
                let (key, _) = entry.map_err(|e| host_error(e.to_string()))?;
                keys.push(Dynamic::from(String::from_utf8_lossy(&key).into_owned()));
            }
            Ok(keys)
        });

        Ok(module)
    }
}
