//! Render targets.
//!
//! A [`RenderSink`] owns one display unit per block. The orchestrator creates
//! a unit when a block starts, replaces its content on every settled update,
//! finalizes it once the block can change no more, and clears everything on
//! destroy. Sinks are driven synchronously from the orchestrator's thread.
//!
//! [`HtmlSink`] is the bundled implementation: it keeps units in creation
//! order and serializes them as tagged `<div>` elements.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::chunker::BlockId;
use crate::config::SinkConfig;

/// Receives rendered block output.
pub trait RenderSink {
    /// A block started. Creates an empty unit for it.
    fn create_block(&mut self, block_id: &BlockId);

    /// Replace the unit's content with `html`.
    fn update_block(&mut self, block_id: &BlockId, html: &str, is_complete: bool);

    /// The block is done. Called at most once per block.
    fn finalize_block(&mut self, block_id: &BlockId, is_complete: bool);

    /// Remove every unit.
    fn clear(&mut self);
}

impl<S: RenderSink + ?Sized> RenderSink for Box<S> {
    fn create_block(&mut self, block_id: &BlockId) {
        (**self).create_block(block_id);
    }

    fn update_block(&mut self, block_id: &BlockId, html: &str, is_complete: bool) {
        (**self).update_block(block_id, html, is_complete);
    }

    fn finalize_block(&mut self, block_id: &BlockId, is_complete: bool) {
        (**self).finalize_block(block_id, is_complete);
    }

    fn clear(&mut self) {
        (**self).clear();
    }
}

/// Shared sinks let the caller inspect output while the orchestrator writes.
///
/// A call that arrives while the caller holds a borrow is dropped with a
/// warning.
impl<S: RenderSink + ?Sized> RenderSink for Rc<RefCell<S>> {
    fn create_block(&mut self, block_id: &BlockId) {
        match self.try_borrow_mut() {
            Ok(mut sink) => sink.create_block(block_id),
            Err(_) => warn!(block = %block_id, "sink busy, dropped create"),
        }
    }

    fn update_block(&mut self, block_id: &BlockId, html: &str, is_complete: bool) {
        match self.try_borrow_mut() {
            Ok(mut sink) => sink.update_block(block_id, html, is_complete),
            Err(_) => warn!(block = %block_id, "sink busy, dropped update"),
        }
    }

    fn finalize_block(&mut self, block_id: &BlockId, is_complete: bool) {
        match self.try_borrow_mut() {
            Ok(mut sink) => sink.finalize_block(block_id, is_complete),
            Err(_) => warn!(block = %block_id, "sink busy, dropped finalize"),
        }
    }

    fn clear(&mut self) {
        match self.try_borrow_mut() {
            Ok(mut sink) => sink.clear(),
            Err(_) => warn!("sink busy, dropped clear"),
        }
    }
}

/// One display unit held by [`HtmlSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RenderedBlock {
    pub block_id: BlockId,
    /// Content of the latest update.
    pub html: String,
    /// Completeness reported with the latest update.
    pub is_complete: bool,
    /// `Some(is_complete)` once finalized.
    pub finalized: Option<bool>,
}

/// In-memory HTML sink.
///
/// Updates and finalizations for unknown ids are ignored, as is a second
/// finalization of the same block.
#[derive(Debug, Default)]
pub struct HtmlSink {
    config: SinkConfig,
    blocks: Vec<RenderedBlock>,
    index: HashMap<BlockId, usize>,
}

impl HtmlSink {
    pub fn new() -> Self {
        Self::with_config(SinkConfig::DEFAULT)
    }

    pub fn with_config(config: SinkConfig) -> Self {
        Self {
            config,
            blocks: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Wrap in `Rc<RefCell<_>>` for sharing with an orchestrator.
    pub fn shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Units in creation order.
    pub fn blocks(&self) -> &[RenderedBlock] {
        &self.blocks
    }

    pub fn block(&self, block_id: &BlockId) -> Option<&RenderedBlock> {
        self.index.get(block_id).map(|&i| &self.blocks[i])
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn block_mut(&mut self, block_id: &BlockId) -> Option<&mut RenderedBlock> {
        let i = *self.index.get(block_id)?;
        self.blocks.get_mut(i)
    }

    /// Serialize every unit, one `<div>` per line.
    ///
    /// Units finalized as complete carry the configured class.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            let _ = write!(
                out,
                "<div {}=\"{}\"",
                self.config.data_attribute,
                escape_html(block.block_id.as_str())
            );
            if block.finalized == Some(true) {
                let _ = write!(out, " class=\"{}\"", self.config.complete_class);
            }
            let _ = writeln!(out, ">{}</div>", block.html);
        }
        out
    }
}

impl RenderSink for HtmlSink {
    fn create_block(&mut self, block_id: &BlockId) {
        if self.index.contains_key(block_id) {
            debug!(block = %block_id, "unit already exists");
            return;
        }
        self.index.insert(block_id.clone(), self.blocks.len());
        self.blocks.push(RenderedBlock {
            block_id: block_id.clone(),
            html: String::new(),
            is_complete: false,
            finalized: None,
        });
    }

    fn update_block(&mut self, block_id: &BlockId, html: &str, is_complete: bool) {
        let Some(block) = self.block_mut(block_id) else {
            trace!(block = %block_id, "update for unknown unit");
            return;
        };
        block.html.clear();
        block.html.push_str(html);
        block.is_complete = is_complete;
    }

    fn finalize_block(&mut self, block_id: &BlockId, is_complete: bool) {
        let Some(block) = self.block_mut(block_id) else {
            trace!(block = %block_id, "finalize for unknown unit");
            return;
        };
        if block.finalized.is_some() {
            debug!(block = %block_id, "unit already finalized");
            return;
        }
        block.finalized = Some(is_complete);
    }

    fn clear(&mut self) {
        self.blocks.clear();
        self.index.clear();
    }
}

/// Escape text for use in HTML content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamChunker;
    use crate::chunker::ChunkEvent;

    /// Real ids only come from the chunker.
    fn ids(n: usize) -> Vec<BlockId> {
        let mut chunker = StreamChunker::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        chunker.on(crate::ChunkEventKind::BlockStart, move |event| {
            if let ChunkEvent::BlockStart { block_id } = event {
                sink.borrow_mut().push(block_id.clone());
            }
        });
        for i in 0..n {
            chunker.write(&format!("b{i}\n\n"));
        }
        seen.take()
    }

    #[test]
    fn test_html_sink_lifecycle() {
        let ids = ids(2);
        let mut sink = HtmlSink::new();

        sink.create_block(&ids[0]);
        sink.create_block(&ids[1]);
        sink.update_block(&ids[0], "<p>a</p>", true);
        sink.update_block(&ids[1], "<pre>x", false);
        sink.finalize_block(&ids[0], true);
        sink.finalize_block(&ids[1], false);

        insta::assert_snapshot!(sink.render(), @r#"
        <div data-block-id="block-1" class="md-block-complete"><p>a</p></div>
        <div data-block-id="block-2"><pre>x</div>
        "#);
    }

    #[test]
    fn test_html_sink_finalizes_once() {
        let ids = ids(1);
        let mut sink = HtmlSink::new();
        sink.create_block(&ids[0]);
        sink.finalize_block(&ids[0], false);
        sink.finalize_block(&ids[0], true);
        assert_eq!(sink.block(&ids[0]).map(|b| b.finalized), Some(Some(false)));
    }

    #[test]
    fn test_html_sink_ignores_unknown_ids() {
        let ids = ids(2);
        let mut sink = HtmlSink::new();
        sink.create_block(&ids[0]);
        sink.update_block(&ids[1], "<p>lost</p>", true);
        sink.finalize_block(&ids[1], true);

        assert_eq!(sink.len(), 1);
        assert!(sink.block(&ids[1]).is_none());
    }

    #[test]
    fn test_html_sink_custom_config_and_clear() {
        let ids = ids(1);
        let mut sink =
            HtmlSink::with_config(SinkConfig::new().with_data_attribute("data-md").with_complete_class("done"));
        sink.create_block(&ids[0]);
        sink.update_block(&ids[0], "<h1>T</h1>", true);
        sink.finalize_block(&ids[0], true);
        assert_eq!(
            sink.render(),
            "<div data-md=\"block-1\" class=\"done\"><h1>T</h1></div>\n"
        );

        sink.clear();
        assert!(sink.is_empty());
        assert_eq!(sink.render(), "");
    }

    #[test]
    fn test_shared_sink_forwards() {
        let ids = ids(1);
        let shared = HtmlSink::new().shared();
        let mut handle: Rc<RefCell<HtmlSink>> = Rc::clone(&shared);

        handle.create_block(&ids[0]);
        handle.update_block(&ids[0], "x", true);
        assert_eq!(shared.borrow().blocks()[0].html, "x");

        // Held borrow: the call is dropped instead of panicking.
        let guard = shared.borrow();
        handle.update_block(&ids[0], "y", true);
        drop(guard);
        assert_eq!(shared.borrow().blocks()[0].html, "x");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }
}
