#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
pub mod chunker;
pub mod config;
pub mod convert;
pub mod emitter;
mod error;
pub mod scan;
pub mod sink;

#[cfg(feature = "tokio")]
pub mod pipeline;

#[cfg(feature = "futures")]
pub mod stream;

pub use chunker::{BLANK_LINE, BlockId, ChunkEvent, ChunkEventKind, StreamChunker};
pub use config::{ChunkerConfig, SinkConfig};
#[cfg(feature = "pulldown")]
pub use convert::MarkdownConverter;
pub use convert::{Conversion, Converter, DialectConverter, FnConverter, from_fn};
pub use emitter::{Emitter, Event, Listener, ListenerId};
pub use error::{ConfigError, ConvertError, PipelineError};
pub use sink::{HtmlSink, RenderSink, RenderedBlock};

#[cfg(feature = "tokio")]
pub use pipeline::{
    Orchestrator, OrchestratorBuilder, PipelineEvent, PipelineEventKind, PipelineState,
};

#[cfg(feature = "futures")]
pub use stream::BlockEvents;
