//! Async orchestration of chunking, conversion and rendering.
//!
//! An [`Orchestrator`] owns a [`StreamChunker`], a [`Converter`] and a
//! [`RenderSink`]. Text written to it is split into blocks; every block
//! update is converted on its own local task, so a slow block never holds
//! back the blocks after it. Settled conversions are written to the sink,
//! and a block's unit is finalized once the chunker has ended it and none of
//! its conversions are still running.
//!
//! # Lifecycle
//!
//! | State | Accepts input | Conversions settle | Events |
//! |-------|---------------|--------------------|--------|
//! | `Processing` | yes | yes | yes |
//! | `Paused` | dropped | yes | yes |
//! | `Idle` (after `end`) | no | yes | yes |
//! | `Destroyed` | no | discarded | none |
//!
//! [`PipelineEvent::Complete`] fires exactly once, after `end` when every
//! block has been finalized.
//!
//! # Runtime
//!
//! Conversions are spawned with [`tokio::task::spawn_local`], so the
//! orchestrator must be used from within a [`tokio::task::LocalSet`].
//! With no runtime on the thread `write` and `end` are ignored with a
//! warning.
//!
//! ```ignore
//! let sink = HtmlSink::new().shared();
//! let pipeline = Orchestrator::builder(MarkdownConverter::new())
//!     .sink(Rc::clone(&sink))
//!     .build()?;
//!
//! LocalSet::new()
//!     .run_until(async {
//!         pipeline.write("# Title\n\nBody");
//!         pipeline.end();
//!         pipeline.finished().await
//!     })
//!     .await?;
//! println!("{}", sink.borrow().render());
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::chunker::{BlockId, ChunkEvent, ChunkEventKind, StreamChunker};
use crate::config::ChunkerConfig;
use crate::convert::{Conversion, Converter};
use crate::emitter::{Emitter, Event, ListenerId};
use crate::sink::{RenderSink, escape_html};
use crate::{ConfigError, ConvertError, PipelineError};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum PipelineState {
    /// Not accepting input. Entered after the stream ends.
    Idle,
    Processing,
    Paused,
    /// Terminal.
    Destroyed,
}

/// Progress notifications from the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A unit was created in the sink.
    BlockCreated { block_id: BlockId },
    /// A conversion finished. `html` is what was (or, for a stale result,
    /// would have been) rendered.
    UpdateSettled {
        block_id: BlockId,
        html: String,
        is_complete: bool,
    },
    /// The block's unit was finalized.
    BlockFinalized { block_id: BlockId, is_complete: bool },
    /// No conversion is in flight.
    Quiescent,
    /// The stream ended and every block has been finalized.
    Complete,
}

/// Subscription key for [`PipelineEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineEventKind {
    BlockCreated,
    UpdateSettled,
    BlockFinalized,
    Quiescent,
    Complete,
}

impl Event for PipelineEvent {
    type Kind = PipelineEventKind;

    fn kind(&self) -> PipelineEventKind {
        match self {
            PipelineEvent::BlockCreated { .. } => PipelineEventKind::BlockCreated,
            PipelineEvent::UpdateSettled { .. } => PipelineEventKind::UpdateSettled,
            PipelineEvent::BlockFinalized { .. } => PipelineEventKind::BlockFinalized,
            PipelineEvent::Quiescent => PipelineEventKind::Quiescent,
            PipelineEvent::Complete => PipelineEventKind::Complete,
        }
    }
}

/// Bookkeeping for one block that has not been finalized yet.
#[derive(Debug, Default)]
struct BlockProgress {
    in_flight: usize,
    next_seq: u64,
    rendered_seq: Option<u64>,
    ended: bool,
    end_complete: bool,
    content_complete: bool,
}

impl BlockProgress {
    /// A block that ended complete waits for its complete content to settle.
    /// One that ended incomplete only waits for in-flight work to drain.
    fn ready_to_finalize(&self) -> bool {
        self.ended && self.in_flight == 0 && (self.content_complete || !self.end_complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Running,
    Complete,
    Destroyed,
}

struct Shared<C> {
    chunker: RefCell<StreamChunker>,
    chunk_events: Rc<Emitter<ChunkEvent>>,
    subscriptions: RefCell<Vec<(ChunkEventKind, ListenerId)>>,
    converter: C,
    sink: RefCell<Box<dyn RenderSink>>,
    state: Cell<PipelineState>,
    blocks: RefCell<HashMap<BlockId, BlockProgress>>,
    events: Emitter<PipelineEvent>,
    outcome: watch::Sender<Outcome>,
}

impl<C: Converter + 'static> Shared<C> {
    fn hookup(shared: &Rc<Self>) {
        const KINDS: [ChunkEventKind; 4] = [
            ChunkEventKind::BlockStart,
            ChunkEventKind::BlockUpdate,
            ChunkEventKind::BlockEnd,
            ChunkEventKind::StreamEnd,
        ];

        let subscriptions = KINDS
            .into_iter()
            .map(|kind| {
                let weak = Rc::downgrade(shared);
                let id = shared.chunk_events.on(kind, move |event| {
                    if let Some(shared) = weak.upgrade() {
                        Shared::on_chunk_event(&shared, event);
                    }
                });
                (kind, id)
            })
            .collect();

        *shared.subscriptions.borrow_mut() = subscriptions;
        shared.state.set(PipelineState::Processing);
    }

    fn on_chunk_event(shared: &Rc<Self>, event: &ChunkEvent) {
        if shared.state.get() != PipelineState::Processing {
            trace!(state = ?shared.state.get(), "chunk event ignored");
            return;
        }

        match event {
            ChunkEvent::BlockStart { block_id } => shared.start_block(block_id),
            ChunkEvent::BlockUpdate {
                block_id,
                content,
                is_complete,
            } => Shared::dispatch_update(shared, block_id, content, *is_complete),
            ChunkEvent::BlockEnd {
                block_id,
                is_complete,
            } => shared.end_block(block_id, *is_complete),
            ChunkEvent::StreamEnd => {
                debug!("stream ended");
                shared.state.set(PipelineState::Idle);
                // Completion never fires from inside `end`.
                let task = Rc::clone(shared);
                tokio::task::spawn_local(async move { task.check_complete() });
            }
            ChunkEvent::BlockRemains { .. } => {}
        }
    }

    fn start_block(&self, block_id: &BlockId) {
        self.sink.borrow_mut().create_block(block_id);
        self.blocks
            .borrow_mut()
            .insert(block_id.clone(), BlockProgress::default());
        trace!(block = %block_id, "block created");
        self.events.emit(&PipelineEvent::BlockCreated {
            block_id: block_id.clone(),
        });
    }

    fn dispatch_update(shared: &Rc<Self>, block_id: &BlockId, content: &str, is_complete: bool) {
        let seq = {
            let mut blocks = shared.blocks.borrow_mut();
            let progress = blocks.entry(block_id.clone()).or_default();
            progress.in_flight += 1;
            let seq = progress.next_seq;
            progress.next_seq += 1;
            seq
        };

        trace!(block = %block_id, seq, is_complete, "conversion dispatched");
        let task = Rc::clone(shared);
        let block_id = block_id.clone();
        let content = content.to_owned();
        tokio::task::spawn_local(async move {
            let result = task.converter.convert(&content).await;
            task.settle(block_id, seq, is_complete, result);
        });
    }

    fn settle(
        &self,
        block_id: BlockId,
        seq: u64,
        is_complete: bool,
        result: Result<Conversion, ConvertError>,
    ) {
        if self.state.get() == PipelineState::Destroyed {
            trace!(block = %block_id, seq, "conversion discarded");
            return;
        }

        let html = match result {
            Ok(conversion) => {
                if conversion.is_complete != is_complete {
                    debug!(block = %block_id, "converter disagrees on completeness");
                }
                conversion.html
            }
            Err(err) => {
                warn!(block = %block_id, error = %err, "conversion failed");
                failure_html(&err)
            }
        };

        let (render, finalize) = {
            let mut blocks = self.blocks.borrow_mut();
            let Some(progress) = blocks.get_mut(&block_id) else {
                debug!(block = %block_id, "settled update for unknown block");
                return;
            };
            progress.in_flight = progress.in_flight.saturating_sub(1);
            let render = progress.rendered_seq.is_none_or(|rendered| seq > rendered);
            if render {
                progress.rendered_seq = Some(seq);
            }
            if is_complete {
                progress.content_complete = true;
            }
            (render, progress.ready_to_finalize())
        };

        if render {
            self.sink
                .borrow_mut()
                .update_block(&block_id, &html, is_complete);
        } else {
            debug!(block = %block_id, seq, "stale conversion not rendered");
        }

        self.events.emit(&PipelineEvent::UpdateSettled {
            block_id: block_id.clone(),
            html,
            is_complete,
        });

        if finalize {
            self.finish_block(&block_id);
        }
        if self.state.get() != PipelineState::Destroyed && self.in_flight() == 0 {
            self.events.emit(&PipelineEvent::Quiescent);
        }
        self.check_complete();
    }

    fn end_block(&self, block_id: &BlockId, is_complete: bool) {
        let finalize = {
            let mut blocks = self.blocks.borrow_mut();
            let progress = blocks.entry(block_id.clone()).or_default();
            progress.ended = true;
            progress.end_complete = is_complete;
            progress.ready_to_finalize()
        };

        trace!(block = %block_id, is_complete, finalize, "block ended");
        if finalize {
            self.finish_block(block_id);
            self.check_complete();
        }
    }

    fn finish_block(&self, block_id: &BlockId) {
        if self.state.get() == PipelineState::Destroyed {
            return;
        }
        let Some(progress) = self.blocks.borrow_mut().remove(block_id) else {
            return;
        };

        self.sink
            .borrow_mut()
            .finalize_block(block_id, progress.end_complete);
        debug!(block = %block_id, is_complete = progress.end_complete, "block finalized");
        self.events.emit(&PipelineEvent::BlockFinalized {
            block_id: block_id.clone(),
            is_complete: progress.end_complete,
        });
    }

    fn check_complete(&self) {
        if self.state.get() != PipelineState::Idle || !self.blocks.borrow().is_empty() {
            return;
        }
        let running = *self.outcome.borrow() == Outcome::Running;
        if !running {
            return;
        }

        self.outcome.send_replace(Outcome::Complete);
        debug!("pipeline complete");
        self.events.emit(&PipelineEvent::Complete);
    }

    fn in_flight(&self) -> usize {
        self.blocks.borrow().values().map(|p| p.in_flight).sum()
    }
}

fn failure_html(err: &ConvertError) -> String {
    format!(
        "<pre class=\"md-block-error\">{}</pre>",
        escape_html(&err.to_string())
    )
}

fn in_runtime() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

/// Drives a chunker, a converter and a sink together.
///
/// See the [module documentation](self) for the state machine.
pub struct Orchestrator<C> {
    shared: Rc<Shared<C>>,
}

impl<C: Converter + 'static> Orchestrator<C> {
    /// Start building an orchestrator around `converter`.
    pub fn builder(converter: C) -> OrchestratorBuilder<C> {
        OrchestratorBuilder {
            converter,
            sink: None,
            chunker: None,
            config: ChunkerConfig::DEFAULT,
        }
    }

    /// Feed a fragment. Ignored unless processing, and ignored with a
    /// warning when no tokio runtime is running on this thread.
    ///
    /// # Panics
    ///
    /// Panics when called inside a runtime but outside a
    /// [`tokio::task::LocalSet`] and the fragment produces a block update.
    pub fn write(&self, fragment: &str) {
        let state = self.shared.state.get();
        if state != PipelineState::Processing {
            trace!(?state, len = fragment.len(), "write ignored");
            return;
        }
        if !in_runtime() {
            warn!(len = fragment.len(), "write outside a tokio runtime ignored");
            return;
        }
        match self.shared.chunker.try_borrow_mut() {
            Ok(mut chunker) => chunker.write(fragment),
            Err(_) => warn!("write from inside a chunk event ignored"),
        }
    }

    /// End the stream. Ignored unless processing.
    ///
    /// [`PipelineEvent::Complete`] is delivered later, from the local task
    /// set, even when nothing is left to convert. Like [`write`](Self::write)
    /// this does nothing without a running tokio runtime.
    pub fn end(&self) {
        let state = self.shared.state.get();
        if state != PipelineState::Processing {
            trace!(?state, "end ignored");
            return;
        }
        if !in_runtime() {
            warn!("end outside a tokio runtime ignored");
            return;
        }
        match self.shared.chunker.try_borrow_mut() {
            Ok(mut chunker) => chunker.end(),
            Err(_) => warn!("end from inside a chunk event ignored"),
        }
    }

    /// Stop accepting input. Fragments written while paused are dropped;
    /// conversions already running still settle.
    pub fn pause(&self) {
        if self.shared.state.get() == PipelineState::Processing {
            debug!("paused");
            self.shared.state.set(PipelineState::Paused);
        }
    }

    pub fn resume(&self) {
        if self.shared.state.get() == PipelineState::Paused {
            debug!("resumed");
            self.shared.state.set(PipelineState::Processing);
        }
    }

    /// Tear down: detach from the chunker, clear the sink and discard any
    /// conversion that settles later. Idempotent.
    pub fn destroy(&self) {
        let shared = &self.shared;
        if shared.state.get() == PipelineState::Destroyed {
            return;
        }
        shared.state.set(PipelineState::Destroyed);

        for (kind, id) in shared.subscriptions.borrow_mut().drain(..) {
            shared.chunk_events.off(kind, id);
        }
        shared.blocks.borrow_mut().clear();
        match shared.sink.try_borrow_mut() {
            Ok(mut sink) => sink.clear(),
            Err(_) => warn!("sink busy during destroy, not cleared"),
        }
        shared.outcome.send_if_modified(|outcome| {
            let running = *outcome == Outcome::Running;
            if running {
                *outcome = Outcome::Destroyed;
            }
            running
        });
        debug!("destroyed");
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state.get()
    }

    /// Blocks started but not yet finalized.
    pub fn pending_blocks(&self) -> usize {
        self.shared.blocks.borrow().len()
    }

    /// Conversions dispatched but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }

    /// Subscribe to orchestrator events.
    pub fn on(
        &self,
        kind: PipelineEventKind,
        listener: impl Fn(&PipelineEvent) + 'static,
    ) -> ListenerId {
        self.shared.events.on(kind, listener)
    }

    pub fn off(&self, kind: PipelineEventKind, id: ListenerId) -> bool {
        self.shared.events.off(kind, id)
    }

    /// Resolves once the pipeline completes, or fails if it is destroyed
    /// first.
    pub async fn finished(&self) -> Result<(), PipelineError> {
        let mut rx = self.shared.outcome.subscribe();
        let outcome = match rx.wait_for(|outcome| *outcome != Outcome::Running).await {
            Ok(outcome) => *outcome,
            Err(_) => Outcome::Destroyed,
        };
        match outcome {
            Outcome::Complete => Ok(()),
            Outcome::Running | Outcome::Destroyed => Err(PipelineError::Destroyed),
        }
    }

    /// Write every fragment received on `rx`, then end the stream once the
    /// channel closes.
    pub async fn drive(&self, mut rx: mpsc::Receiver<String>) {
        while let Some(fragment) = rx.recv().await {
            self.write(&fragment);
        }
        self.end();
    }
}

impl<C> fmt::Debug for Orchestrator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.shared.state.get())
            .field("pending_blocks", &self.shared.blocks.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder<C> {
    converter: C,
    sink: Option<Box<dyn RenderSink>>,
    chunker: Option<StreamChunker>,
    config: ChunkerConfig,
}

impl<C: Converter + 'static> OrchestratorBuilder<C> {
    /// Render target. Required.
    pub fn sink(mut self, sink: impl RenderSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Configuration for the internally created chunker.
    pub fn chunker_config(mut self, config: ChunkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing chunker. Its listeners stay subscribed.
    pub fn chunker(mut self, chunker: StreamChunker) -> Self {
        self.chunker = Some(chunker);
        self
    }

    pub fn build(self) -> Result<Orchestrator<C>, ConfigError> {
        let sink = self.sink.ok_or(ConfigError::MissingSink)?;
        let chunker = match self.chunker {
            Some(chunker) => {
                chunker.config().validate()?;
                chunker
            }
            None => StreamChunker::try_with_config(self.config)?,
        };

        let (outcome, _) = watch::channel(Outcome::Running);
        let shared = Rc::new(Shared {
            chunk_events: chunker.emitter(),
            chunker: RefCell::new(chunker),
            subscriptions: RefCell::new(Vec::new()),
            converter: self.converter,
            sink: RefCell::new(sink),
            state: Cell::new(PipelineState::Idle),
            blocks: RefCell::new(HashMap::new()),
            events: Emitter::new(),
            outcome,
        });
        Shared::hookup(&shared);

        debug!("orchestrator ready");
        Ok(Orchestrator { shared })
    }
}
