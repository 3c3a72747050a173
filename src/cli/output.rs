//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::DocketError;

/// Map domain errors to a string for CLI output.
pub fn map_error(e: &DocketError) -> String {
    match e {
        DocketError::Document(inner) => format!("Invalid document: {}", inner),
        DocketError::NotFound { .. } => e.to_string(),
        DocketError::ConfigError(_) => e.to_string(),
        other => format!("Error: {}", other),
    }
}
