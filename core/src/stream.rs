//! Runtime-agnostic stream adapter.
//!
//! [`BlockEvents`] turns any [`Stream`] of text fragments into a stream of
//! [`ChunkEvent`]s, without an orchestrator or an executor of its own. When
//! the source ends the pending block is flushed and the final item is
//! [`ChunkEvent::StreamEnd`].
//!
//! ```ignore
//! let mut events = BlockEvents::new(token_stream);
//! while let Some(event) = events.next().await {
//!     if let ChunkEvent::BlockEnd { block_id, .. } = event {
//!         println!("{block_id} done");
//!     }
//! }
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::chunker::{ChunkEvent, ChunkEventKind, StreamChunker};
use crate::config::ChunkerConfig;

/// Chunk events produced from a stream of fragments.
pub struct BlockEvents<S> {
    inner: S,
    chunker: StreamChunker,
    queue: Rc<RefCell<VecDeque<ChunkEvent>>>,
    finished: bool,
}

impl<S> BlockEvents<S> {
    pub fn new(inner: S) -> Self {
        Self::with_chunker(inner, StreamChunker::new())
    }

    pub fn with_config(inner: S, config: ChunkerConfig) -> Self {
        Self::with_chunker(inner, StreamChunker::with_config(config))
    }

    /// Wrap a configured chunker. Its existing listeners keep receiving
    /// events alongside the stream.
    pub fn with_chunker(inner: S, chunker: StreamChunker) -> Self {
        let queue = Rc::new(RefCell::new(VecDeque::new()));
        for kind in ChunkEventKind::ALL {
            let queue = Rc::clone(&queue);
            chunker.on(kind, move |event: &ChunkEvent| {
                queue.borrow_mut().push_back(event.clone());
            });
        }

        Self {
            inner,
            chunker,
            queue,
            finished: false,
        }
    }

    pub fn chunker(&self) -> &StreamChunker {
        &self.chunker
    }
}

impl<S, T> Stream for BlockEvents<S>
where
    S: Stream<Item = T> + Unpin,
    T: AsRef<str>,
{
    type Item = ChunkEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let queued = this.queue.borrow_mut().pop_front();
            if let Some(event) = queued {
                return Poll::Ready(Some(event));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(fragment)) => this.chunker.write(fragment.as_ref()),
                Poll::Ready(None) => {
                    this.finished = true;
                    this.chunker.end();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
