//! The `Page` type seen by scripts.
//!
//! Custom actions and `callback` receive a page handle. Every method goes through the
//! action registry, so `page.goto(url)` and `page.run("goto", url)` are the same call
//! and custom actions are reachable by name.

use super::interpreter::ActionScope;
use crate::document::DocValue;
use crate::script::convert::{dynamic_to_doc, json_to_dynamic};
use crate::script::runtime::{bridge, host_error, ScriptResult};
use rhai::{Dynamic, Engine, ImmutableString};

#[derive(Clone)]
pub struct PageHandle {
    scope: ActionScope,
}

impl PageHandle {
    pub fn new(scope: ActionScope) -> Self {
        Self { scope }
    }

    fn run(&self, name: &str, arg: DocValue) -> ScriptResult<Dynamic> {
        let scope = self.scope.clone();
        let result = bridge(async move { scope.run(name, &arg).await })?
            .map_err(|e| host_error(e.to_string()))?;
        Ok(json_to_dynamic(&result))
    }
}

pub fn register_page_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<PageHandle>("Page")
        .register_get("url", |page: &mut PageHandle| -> ScriptResult<String> {
            let scope = page.scope.clone();
            bridge(async move { scope.page().url().await })?.map_err(|e| host_error(e.to_string()))
        })
        .register_fn(
            "run",
            |page: &mut PageHandle, name: ImmutableString, arg: Dynamic| {
                page.run(name.as_str(), dynamic_to_doc(&arg))
            },
        )
        .register_fn("run", |page: &mut PageHandle, name: ImmutableString| {
            page.run(name.as_str(), DocValue::Bool(true))
        })
        .register_fn("goto", |page: &mut PageHandle, arg: Dynamic| {
            page.run("goto", dynamic_to_doc(&arg))
        })
        .register_fn("wait", |page: &mut PageHandle, arg: Dynamic| {
            page.run("wait", dynamic_to_doc(&arg))
        })
        .register_fn("scrape", |page: &mut PageHandle, arg: Dynamic| {
            page.run("scrape", dynamic_to_doc(&arg))
        })
        .register_fn("screenshot", |page: &mut PageHandle, arg: Dynamic| {
            page.run("screenshot", dynamic_to_doc(&arg))
        })
        .register_fn("actions", |page: &mut PageHandle| -> rhai::Array {
            page.scope
                .registry()
                .names()
                .into_iter()
                .map(|name| Dynamic::from(name.to_string()))
                .collect()
        });
}
