//! Script execution for document callables.

pub mod convert;
pub mod handle;
pub mod runtime;

pub use handle::JobHandle;
pub use runtime::{Cancellation, ScriptRuntime, ScriptUnit};
