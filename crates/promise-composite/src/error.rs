//! Error types for promise-composite

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;

/// Failure used when every producer handle of a pending promise is dropped
#[derive(Debug, Error)]
#[error("Promise was dropped before completion")]
pub struct BrokenPromise {}

/// Errors raised by the indexed accessors of a composite
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositeError {
    /// The index is outside `[0, size)`
    #[error("index {index} out of range for composite of size {size}")]
    IndexOutOfRange { index: usize, size: usize },
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// The failure carried by a failed future.
///
/// A producer hands over an [`anyhow::Error`]; every observer, composite slot
/// and derived future then shares that same instance. The value is never
/// wrapped or reclassified on its way through a composite, so
/// [`Cause::ptr_eq`] can be used to check that a propagated failure is the
/// one a given input produced.
#[derive(Clone)]
pub struct Cause(Arc<anyhow::Error>);

impl Cause {
    /// Whether both causes are the same failure instance
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl From<anyhow::Error> for Cause {
    fn from(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl Deref for Cause {
    type Target = anyhow::Error;

    fn deref(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for Cause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}
