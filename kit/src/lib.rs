#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro
)]
//! Streaming markdown block chunker with async per-block rendering.
//!
//! Feed model output into an [`Orchestrator`] token by token; it splits the
//! text into blank-line separated blocks (keeping fenced code whole), converts
//! each block independently and writes the results to a [`RenderSink`].
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `tokio` | yes | [`Orchestrator`] |
//! | `pulldown` | yes | [`MarkdownConverter`] |
//! | `futures` | no | [`BlockEvents`](stream::BlockEvents) |
//! | `serde` | no | serde derives on configs and events |
pub use mdblocks_core::*;
