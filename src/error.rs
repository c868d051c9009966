//! Errors the resolver surfaces to callers

use crate::types::{ErrorKind, ErrorResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to extract company name or category")]
    MalformedExtraction { raw_lines: Vec<String> },

    #[error("company not found: '{name}' does not exist")]
    EntityNotFound { name: String },

    #[error("upstream service failed: {reason}")]
    ServiceFailure { reason: String },
}

impl From<ResolveError> for ErrorResult {
    fn from(err: ResolveError) -> Self {
        let message = err.to_string();
        match err {
            ResolveError::MalformedExtraction { raw_lines } => ErrorResult {
                kind: ErrorKind::MalformedExtraction,
                message,
                raw_lines,
            },
            ResolveError::EntityNotFound { .. } => ErrorResult {
                kind: ErrorKind::EntityNotFound,
                message,
                raw_lines: vec![],
            },
            ResolveError::ServiceFailure { .. } => ErrorResult {
                kind: ErrorKind::ServiceFailure,
                message,
                raw_lines: vec![],
            },
        }
    }
}
