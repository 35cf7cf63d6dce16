//! Error types for mdblocks.
//!
//! Each concern gets its own enum: [`ConfigError`] for construction-time
//! validation, [`ConvertError`] for converter failures and [`PipelineError`]
//! for the orchestrator's awaitable completion.
//!
//! Converter implementations outside this crate should map their own failures
//! into [`ConvertError::Failed`]:
//!
//! ```ignore
//! impl From<MyRenderError> for mdblocks::ConvertError {
//!     fn from(err: MyRenderError) -> Self {
//!         mdblocks::ConvertError::Failed(err.to_string())
//!     }
//! }
//! ```

use thiserror::Error;

/// Invalid configuration, reported synchronously when building a component.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The orchestrator was built without a render sink.
    #[error("a render sink must be provided")]
    MissingSink,

    /// The block id prefix cannot produce a readable ASCII identifier.
    ///
    /// Prefixes must be non-empty, printable ASCII and free of whitespace.
    #[error("invalid block id prefix {prefix:?}")]
    InvalidBlockIdPrefix {
        /// The rejected prefix.
        prefix: String,
    },
}

/// A converter could not turn a block's markdown into output.
///
/// The orchestrator never propagates this error: the message is rendered in
/// place of the block's output and the update still counts as settled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// Conversion failed with the given message.
    #[error("conversion failed: {0}")]
    Failed(String),

    /// A dialect renderer refused the fenced block's language.
    #[error("unsupported fenced block language {language:?}")]
    Unsupported {
        /// Info string of the fenced block.
        language: String,
    },
}

/// Errors surfaced by the orchestrator's async API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    /// The orchestrator was destroyed before the stream completed.
    #[error("pipeline destroyed before completion")]
    Destroyed,
}
