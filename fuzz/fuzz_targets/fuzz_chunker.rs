#![no_main]

use std::cell::RefCell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mdblocks::{ChunkEvent, ChunkEventKind, ChunkerConfig, StreamChunker};

#[derive(Debug, Arbitrary)]
struct Input {
    text: String,
    cuts: Vec<u16>,
    withhold: bool,
}

/// `(content, is_complete)` of the final update of every ended block.
fn blocks(config: &ChunkerConfig, fragments: &[&str]) -> Vec<(String, bool)> {
    let mut chunker = StreamChunker::with_config(config.clone());
    let events = Rc::new(RefCell::new(Vec::new()));
    for kind in ChunkEventKind::ALL {
        let events = Rc::clone(&events);
        chunker.on(kind, move |event| events.borrow_mut().push(event.clone()));
    }
    for fragment in fragments {
        chunker.write(fragment);
    }
    chunker.end();

    let mut last = None;
    let mut out = Vec::new();
    let mut open = None;
    for event in events.take() {
        match event {
            ChunkEvent::BlockStart { block_id } => {
                assert!(open.is_none());
                open = Some(block_id);
            }
            ChunkEvent::BlockUpdate { content, .. } => last = Some(content),
            ChunkEvent::BlockEnd { block_id, is_complete } => {
                assert_eq!(open.take(), Some(block_id));
                out.push((last.take().unwrap_or_default(), is_complete));
            }
            ChunkEvent::BlockRemains { .. } => {}
            ChunkEvent::StreamEnd => assert!(open.is_none()),
        }
    }
    out
}

fuzz_target!(|input: Input| {
    let config = ChunkerConfig::new().with_withhold_incomplete_links(input.withhold);
    let text = input.text.as_str();

    let mut cuts: Vec<usize> = input
        .cuts
        .iter()
        .map(|&cut| usize::from(cut) % (text.len() + 1))
        .filter(|&cut| text.is_char_boundary(cut))
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut fragments = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        fragments.push(&text[start..cut]);
        start = cut;
    }
    fragments.push(&text[start..]);

    assert_eq!(blocks(&config, &[text]), blocks(&config, &fragments));
});
