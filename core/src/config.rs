//! Construction-time configuration.
//!
//! This module provides [`ChunkerConfig`] for the stream chunker and
//! [`SinkConfig`] for the bundled HTML sink. Both follow the same shape: a
//! `DEFAULT` constant usable in const contexts, and `with_*` builder methods.
//!
//! # Example
//!
//! ```ignore
//! use mdblocks_core::config::ChunkerConfig;
//!
//! // Default: ids "block-1", "block-2", ... and no link withholding
//! let config = ChunkerConfig::default();
//!
//! // Custom prefix, hide half-typed links until their URL is closed
//! let config = ChunkerConfig::new()
//!     .with_block_id_prefix("msg-7-")
//!     .with_withhold_incomplete_links(true);
//! ```

use std::borrow::Cow;

use crate::ConfigError;

/// Configuration for [`StreamChunker`](crate::chunker::StreamChunker).
///
/// # Default Values
///
/// | Setting | Default |
/// |---------|---------|
/// | `block_id_prefix` | `"block-"` |
/// | `withhold_incomplete_links` | `false` |
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ChunkerConfig {
    /// Prefix of every block id. The chunker appends a counter starting at 1.
    pub block_id_prefix: Cow<'static, str>,

    /// Truncate emitted updates before an unterminated `[...]` or `[...](`
    /// construct. The buffer itself always keeps the full text.
    pub withhold_incomplete_links: bool,
}

impl Default for ChunkerConfig {
    #[inline]
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl ChunkerConfig {
    /// Default configuration, usable in const contexts.
    pub const DEFAULT: Self = Self {
        block_id_prefix: Cow::Borrowed("block-"),
        withhold_incomplete_links: false,
    };

    /// Creates a new configuration with default values.
    #[inline]
    pub const fn new() -> Self {
        Self::DEFAULT
    }

    /// Sets the block id prefix.
    #[inline]
    pub fn with_block_id_prefix(mut self, prefix: impl Into<Cow<'static, str>>) -> Self {
        self.block_id_prefix = prefix.into();
        self
    }

    /// Enables or disables incomplete link withholding.
    #[inline]
    pub const fn with_withhold_incomplete_links(mut self, withhold: bool) -> Self {
        self.withhold_incomplete_links = withhold;
        self
    }

    /// Checks that the prefix yields readable ASCII ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.block_id_prefix;
        let printable = prefix.bytes().all(|b| b.is_ascii_graphic());
        if prefix.is_empty() || !printable {
            return Err(ConfigError::InvalidBlockIdPrefix {
                prefix: prefix.to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration for [`HtmlSink`](crate::sink::HtmlSink).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SinkConfig {
    /// Attribute carrying the block id on each unit. Default: `data-block-id`.
    pub data_attribute: Cow<'static, str>,

    /// Class added to units finalized as complete. Default: `md-block-complete`.
    pub complete_class: Cow<'static, str>,
}

impl Default for SinkConfig {
    #[inline]
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl SinkConfig {
    /// Default configuration, usable in const contexts.
    pub const DEFAULT: Self = Self {
        data_attribute: Cow::Borrowed("data-block-id"),
        complete_class: Cow::Borrowed("md-block-complete"),
    };

    /// Creates a new configuration with default values.
    #[inline]
    pub const fn new() -> Self {
        Self::DEFAULT
    }

    /// Sets the attribute that carries the block id.
    #[inline]
    pub fn with_data_attribute(mut self, attribute: impl Into<Cow<'static, str>>) -> Self {
        self.data_attribute = attribute.into();
        self
    }

    /// Sets the class applied to complete units.
    #[inline]
    pub fn with_complete_class(mut self, class: impl Into<Cow<'static, str>>) -> Self {
        self.complete_class = class.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_chunker_config_defaults() {
        let config = ChunkerConfig::default();
        assert_eq!(config.block_id_prefix, "block-");
        assert!(!config.withhold_incomplete_links);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunker_config_builder() {
        let config = ChunkerConfig::new()
            .with_block_id_prefix(String::from("answer-"))
            .with_withhold_incomplete_links(true);

        assert_eq!(config.block_id_prefix, "answer-");
        assert!(config.withhold_incomplete_links);
    }

    #[test_case(""; "empty")]
    #[test_case("my block-"; "inner space")]
    #[test_case("blöck-"; "non ascii")]
    #[test_case("block\n"; "control char")]
    fn test_chunker_config_rejects_prefix(prefix: &'static str) {
        let config = ChunkerConfig::new().with_block_id_prefix(prefix);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBlockIdPrefix {
                prefix: prefix.to_string()
            })
        );
    }

    #[test]
    fn test_sink_config_builder() {
        let config = SinkConfig::new()
            .with_data_attribute("data-md")
            .with_complete_class("done");
        assert_eq!(config.data_attribute, "data-md");
        assert_eq!(config.complete_class, "done");
        assert_eq!(SinkConfig::default(), SinkConfig::DEFAULT);
    }
}
