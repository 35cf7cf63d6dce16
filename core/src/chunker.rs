//! Streaming block chunker.
//!
//! [`StreamChunker`] turns an arbitrarily fragmented markdown stream into a
//! strictly sequential series of blocks. Boundaries are blank lines (`"\n\n"`),
//! except inside a fenced code block that itself spans blank lines: while an
//! unbalanced fence is open every following segment is folded into the same
//! block until the segment that closes it.
//!
//! All events are emitted synchronously from [`StreamChunker::write`] and
//! [`StreamChunker::end`]:
//!
//! ```text
//! write("Hi\n\nthere")
//!   BlockStart  { block-1 }
//!   BlockUpdate { block-1, "Hi", complete }
//!   BlockEnd    { block-1, complete }
//!   BlockStart  { block-2 }
//!   BlockUpdate { block-2, "there", incomplete }
//!   BlockRemains{ block-2, "there" }
//! end()
//!   BlockUpdate { block-2, "there", complete }
//!   BlockEnd    { block-2, complete }
//!   StreamEnd
//! ```
//!
//! Every update carries the block's whole text so far and replaces the
//! previous one.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ConfigError;
use crate::config::ChunkerConfig;
use crate::emitter::{Emitter, Event, ListenerId};
use crate::scan;

/// The blank-line marker separating blocks.
pub const BLANK_LINE: &str = "\n\n";

/// Identifier of a block: the configured prefix followed by a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct BlockId(String);

impl BlockId {
    fn new(prefix: &str, counter: u64) -> Self {
        Self(format!("{prefix}{counter}"))
    }

    /// The id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlockId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for BlockId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for BlockId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Block lifecycle events produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "kebab-case"))]
pub enum ChunkEvent {
    /// A new block received its first content. Always precedes its first update.
    BlockStart { block_id: BlockId },

    /// The block's full text so far.
    BlockUpdate {
        block_id: BlockId,
        content: String,
        is_complete: bool,
    },

    /// Full pending text after an incomplete update, before any link
    /// withholding. Includes an open fence span.
    BlockRemains { block_id: BlockId, content: String },

    /// The block will receive no further updates.
    BlockEnd { block_id: BlockId, is_complete: bool },

    /// The stream ended; emitted once per [`StreamChunker::end`] call.
    StreamEnd,
}

/// Subscription key for [`ChunkEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ChunkEventKind {
    BlockStart,
    BlockUpdate,
    BlockRemains,
    BlockEnd,
    StreamEnd,
}

impl ChunkEventKind {
    /// Every kind, in lifecycle order.
    pub const ALL: [ChunkEventKind; 5] = [
        ChunkEventKind::BlockStart,
        ChunkEventKind::BlockUpdate,
        ChunkEventKind::BlockRemains,
        ChunkEventKind::BlockEnd,
        ChunkEventKind::StreamEnd,
    ];
}

impl ChunkEvent {
    /// The block this event refers to, if any.
    pub fn block_id(&self) -> Option<&BlockId> {
        match self {
            ChunkEvent::BlockStart { block_id }
            | ChunkEvent::BlockUpdate { block_id, .. }
            | ChunkEvent::BlockRemains { block_id, .. }
            | ChunkEvent::BlockEnd { block_id, .. } => Some(block_id),
            ChunkEvent::StreamEnd => None,
        }
    }
}

impl Event for ChunkEvent {
    type Kind = ChunkEventKind;

    fn kind(&self) -> ChunkEventKind {
        match self {
            ChunkEvent::BlockStart { .. } => ChunkEventKind::BlockStart,
            ChunkEvent::BlockUpdate { .. } => ChunkEventKind::BlockUpdate,
            ChunkEvent::BlockRemains { .. } => ChunkEventKind::BlockRemains,
            ChunkEvent::BlockEnd { .. } => ChunkEventKind::BlockEnd,
            ChunkEvent::StreamEnd => ChunkEventKind::StreamEnd,
        }
    }
}

/// Splits a markdown stream into blocks on blank lines, respecting fences.
///
/// # State
///
/// - `buffer`: input after the last resolved boundary.
/// - `fence_span`: segments already folded into a block whose fence is still
///   open. Together with `buffer` it forms the pending block text.
/// - `current`: the open block, if any. At most one block is open.
///
/// # Example
///
/// ```ignore
/// let mut chunker = StreamChunker::new();
/// chunker.on(ChunkEventKind::BlockEnd, |event| println!("{event:?}"));
///
/// for token in ["# Ti", "tle\n", "\nBody"] {
///     chunker.write(token);
/// }
/// chunker.end();
/// ```
pub struct StreamChunker {
    config: ChunkerConfig,
    buffer: String,
    fence_span: Option<String>,
    next_block: u64,
    current: Option<BlockId>,
    events: Rc<Emitter<ChunkEvent>>,
}

impl StreamChunker {
    /// Create a chunker with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ChunkerConfig::default())
    }

    /// Create a chunker with a custom configuration.
    ///
    /// The configuration is not validated; see [`StreamChunker::try_with_config`].
    pub fn with_config(config: ChunkerConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            fence_span: None,
            next_block: 1,
            current: None,
            events: Rc::new(Emitter::new()),
        }
    }

    /// Create a chunker after validating `config`.
    pub fn try_with_config(config: ChunkerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    /// The active configuration.
    #[inline]
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Subscribe to one kind of chunk event.
    pub fn on(&self, kind: ChunkEventKind, listener: impl Fn(&ChunkEvent) + 'static) -> ListenerId {
        self.events.on(kind, listener)
    }

    /// Unsubscribe a listener.
    pub fn off(&self, kind: ChunkEventKind, id: ListenerId) -> bool {
        self.events.off(kind, id)
    }

    /// Shared handle to the listener registry.
    ///
    /// Lets an owner detach listeners while the chunker itself is borrowed.
    pub fn emitter(&self) -> Rc<Emitter<ChunkEvent>> {
        Rc::clone(&self.events)
    }

    /// The open block, if any.
    #[inline]
    pub fn current_block(&self) -> Option<&BlockId> {
        self.current.as_ref()
    }

    /// Whether a fenced code block is open across a blank line.
    #[inline]
    pub fn in_fence_span(&self) -> bool {
        self.fence_span.is_some()
    }

    /// Text received but not yet closed by a boundary.
    pub fn pending(&self) -> Cow<'_, str> {
        match &self.fence_span {
            Some(span) => Cow::Owned(format!("{span}{}", self.buffer)),
            None => Cow::Borrowed(&self.buffer),
        }
    }

    /// Feed a fragment and emit events for every boundary it completes.
    pub fn write(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }

        let mut data = std::mem::take(&mut self.buffer);
        data.push_str(fragment);

        let mut rest = data.as_str();
        while let Some(idx) = rest.find(BLANK_LINE) {
            let part = &rest[..idx];
            rest = &rest[idx + BLANK_LINE.len()..];
            self.resolve_segment(part);
        }

        self.buffer.push_str(rest);
        self.emit_pending();
    }

    /// Flush the pending block as final and signal the end of the stream.
    ///
    /// The flushed block is complete iff its fences are balanced. With nothing
    /// but whitespace pending only [`ChunkEvent::StreamEnd`] is emitted.
    pub fn end(&mut self) {
        let pending = self.pending().into_owned();
        let carries_block = !self.is_blank(&pending);
        self.buffer.clear();
        self.fence_span = None;

        if carries_block {
            let is_complete = scan::fences_balanced(&pending);
            self.emit_update(pending, is_complete);
            self.emit_end(is_complete);
        }

        debug!("chunk stream ended");
        self.events.emit(&ChunkEvent::StreamEnd);
    }

    fn resolve_segment(&mut self, part: &str) {
        let span_was_open = self.fence_span.is_some();

        // Extra blank lines between blocks carry nothing.
        if self.is_blank(part) {
            return;
        }

        let balanced = scan::fences_balanced(part);
        let is_complete = if balanced {
            !span_was_open
        } else {
            span_was_open
        };

        let content = match self.fence_span.as_mut() {
            Some(span) => {
                span.push_str(part);
                span.push_str(BLANK_LINE);
                span.clone()
            }
            None => part.to_owned(),
        };
        self.emit_update(content, is_complete);

        if !balanced {
            self.fence_span = match self.fence_span.take() {
                Some(_) => {
                    debug!("fence span closed");
                    None
                }
                None => {
                    debug!("fence span opened across blank line");
                    Some(format!("{part}{BLANK_LINE}"))
                }
            };
        }

        if self.fence_span.is_none() {
            self.emit_end(is_complete);
        }
    }

    fn emit_pending(&mut self) {
        if self.is_blank(&self.buffer) {
            return;
        }

        let pending = self.pending().into_owned();
        let shown = if self.config.withhold_incomplete_links {
            scan::withhold_incomplete_link(&pending).to_owned()
        } else {
            pending.clone()
        };
        if shown.len() < pending.len() {
            trace!(withheld = pending.len() - shown.len(), "incomplete link withheld");
        }

        let block_id = self.emit_update(shown, false);
        self.events.emit(&ChunkEvent::BlockRemains {
            block_id,
            content: pending,
        });
    }

    /// Whitespace outside any block never opens one.
    fn is_blank(&self, text: &str) -> bool {
        self.fence_span.is_none() && self.current.is_none() && text.trim().is_empty()
    }

    fn emit_update(&mut self, content: String, is_complete: bool) -> BlockId {
        let block_id = match &self.current {
            Some(id) => id.clone(),
            None => {
                let id = BlockId::new(&self.config.block_id_prefix, self.next_block);
                self.next_block += 1;
                self.current = Some(id.clone());
                debug!(block = %id, "block started");
                self.events.emit(&ChunkEvent::BlockStart {
                    block_id: id.clone(),
                });
                id
            }
        };

        trace!(block = %block_id, len = content.len(), is_complete, "block update");
        self.events.emit(&ChunkEvent::BlockUpdate {
            block_id: block_id.clone(),
            content,
            is_complete,
        });
        block_id
    }

    fn emit_end(&mut self, is_complete: bool) {
        if let Some(block_id) = self.current.take() {
            debug!(block = %block_id, is_complete, "block ended");
            self.events.emit(&ChunkEvent::BlockEnd {
                block_id,
                is_complete,
            });
        }
    }
}

impl Default for StreamChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamChunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChunker")
            .field("config", &self.config)
            .field("buffer", &self.buffer)
            .field("fence_span", &self.fence_span)
            .field("current", &self.current)
            .field("next_block", &self.next_block)
            .finish()
    }
}
