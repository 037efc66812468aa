//! Fatal build errors
//!
//! Anything in here aborts the build: no partial chunk graph is ever handed to
//! the code generator once one of these is returned. Recoverable problems are
//! recorded as [`crate::diagnostics::Diagnostic`] instead.

use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Two different async boundaries resolved to the same split-point key, or
    /// two chunks claim the same user-visible name
    #[error(
        "chunk naming collision on '{key}': '{first}' and '{second}' would be emitted under the \
         same name"
    )]
    ChunkNamingCollision {
        key: String,
        first: String,
        second: String,
    },

    /// The deterministic id policy ran out of salts before finding a free id
    #[error("could not assign a unique id to '{identity}' after {attempts} salted attempts")]
    IdSpaceExhausted { identity: String, attempts: u32 },

    /// The optimizer produced a graph in which a chunk group no longer
    /// provides every module it provided before optimization
    #[error("chunk group '{group}' lost required modules during optimization: {missing:?}")]
    InvalidChunkGraph { group: String, missing: Vec<String> },

    /// Malformed configuration, rejected before construction begins
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// A dependency points at a module that has not been built
    #[error("module graph is incomplete: '{module}' depends on unbuilt module '{missing}'")]
    IncompleteModuleGraph { module: String, missing: String },

    #[error("module '{0}' was added to the module graph twice")]
    DuplicateModule(String),

    #[error("entry '{entry}' refers to unknown module '{module}'")]
    UnknownEntry { entry: String, module: String },

    #[error("entry '{0}' is configured more than once")]
    DuplicateEntry(String),

    /// Cancellation was requested before sealing began
    #[error("build aborted before chunk sealing")]
    Aborted,
}

impl BuildError {
    pub(crate) fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error was caused by caller input rather than by the graph
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::UnknownEntry { .. } | Self::DuplicateEntry(_)
        )
    }
}
