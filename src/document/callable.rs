//! Callable values carried inside job documents.

use serde::{Deserialize, Serialize};

/// A function reconstructed from a document's source text.
///
/// Only the data is stored here. The callable becomes executable inside the script
/// runtime, which compiles [`Callable::script_definition`] on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callable {
    /// Parameter names in declaration order
    pub params: Vec<String>,
    /// Executable statements (concise arrow bodies already wrapped in `return`)
    pub body: String,
    /// Whether the literal was declared `async`
    pub is_async: bool,
    /// The literal as written in the document
    pub source: String,
}

impl Callable {
    /// Name under which the callable is defined when compiled.
    pub const ENTRY: &'static str = "__docket_callable";

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Script text defining the callable as a function named [`Callable::ENTRY`].
    pub fn script_definition(&self) -> String {
        format!(
            "fn {}({}) {{{}\n}}",
            Self::ENTRY,
            self.params.join(", "),
            self.body
        )
    }
}
