//! Streams a markdown document through an orchestrator in random-sized
//! fragments, the way a chat model would emit it, and prints the final HTML.
//!
//! ```text
//! RUST_LOG=mdblocks_core=debug cargo run -p stream-demo -- --seed 7 --pause-after 20
//! ```

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use mdblocks::sink::escape_html;
use mdblocks::{
    ChunkerConfig, ConfigError, ConvertError, DialectConverter, HtmlSink, MarkdownConverter,
    Orchestrator, PipelineError, PipelineEvent, PipelineEventKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const SAMPLE: &str = r#"# Streaming Markdown

Each block below is converted **on its own**, so a slow block never holds
up the ones after it.

## Features

- Blank-line block splitting
- Fenced code kept whole, even across blank lines
- Pause and resume

```rust
fn main() {
    println!("hello");

    println!("still the same block");
}
```

> Quotes, [links](https://commonmark.org) and ~~strikethrough~~
> render as usual.

| Event | Meaning |
|-------|---------|
| start | a block received text |
| end   | no more updates |

```mermaid
graph LR
    Chunker --> Converter --> Sink
```

**The End**"#;

#[derive(Parser, Debug)]
#[command(name = "stream-demo", version, about = "Stream markdown through mdblocks")]
struct Cli {
    /// Markdown file to stream (defaults to a built-in sample)
    file: Option<PathBuf>,

    /// Smallest fragment, in characters
    #[arg(long, default_value_t = 5)]
    min_chunk: usize,

    /// Largest fragment, in characters
    #[arg(long, default_value_t = 20)]
    max_chunk: usize,

    /// Delay between fragments
    #[arg(long, default_value_t = 50)]
    delay_ms: u64,

    /// Pause the pipeline after this many fragments
    #[arg(long)]
    pause_after: Option<usize>,

    /// How long to stay paused
    #[arg(long, default_value_t = 500)]
    pause_ms: u64,

    /// Send everything after this many fragments in a single write
    #[arg(long)]
    fast_forward_after: Option<usize>,

    /// Seed for fragment sizes
    #[arg(long)]
    seed: Option<u64>,

    /// Hide links until their destination is closed
    #[arg(long)]
    withhold_links: bool,

    /// Block id prefix
    #[arg(long, default_value = "block-")]
    prefix: String,
}

#[derive(Error, Debug)]
enum DemoError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fragment sizes need 0 < min <= max, got {min}..={max}")]
    ChunkRange { min: usize, max: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> Result<(), DemoError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.min_chunk == 0 || cli.min_chunk > cli.max_chunk {
        return Err(DemoError::ChunkRange {
            min: cli.min_chunk,
            max: cli.max_chunk,
        });
    }

    let text = match &cli.file {
        Some(path) => std::fs::read_to_string(path).map_err(|source| DemoError::Read {
            path: path.clone(),
            source,
        })?,
        None => SAMPLE.to_owned(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let html = LocalSet::new().block_on(&runtime, run(cli, text))?;
    println!("{html}");
    Ok(())
}

/// Split on character boundaries into sizes drawn from `min..=max`.
fn fragments(text: &str, rng: &mut StdRng, min: usize, max: usize) -> Vec<String> {
    let mut chars = text.chars().peekable();
    let mut out = Vec::new();
    while chars.peek().is_some() {
        let size = rng.random_range(min..=max);
        out.push(chars.by_ref().take(size).collect());
    }
    out
}

async fn run(cli: Cli, text: String) -> Result<String, DemoError> {
    let sink = HtmlSink::new().shared();
    let converter = DialectConverter::new(MarkdownConverter::new(), "mermaid", |body: &str| {
        Ok::<_, ConvertError>(format!("<div class=\"mermaid\">{}</div>", escape_html(body)))
    });
    let config = ChunkerConfig::new()
        .with_block_id_prefix(cli.prefix.clone())
        .with_withhold_incomplete_links(cli.withhold_links);

    let pipeline = Rc::new(
        Orchestrator::builder(converter)
            .sink(Rc::clone(&sink))
            .chunker_config(config)
            .build()?,
    );
    pipeline.on(PipelineEventKind::BlockFinalized, |event| {
        if let PipelineEvent::BlockFinalized {
            block_id,
            is_complete,
        } = event
        {
            info!(block = %block_id, is_complete, "block finalized");
        }
    });
    pipeline.on(PipelineEventKind::Complete, |_| info!("stream complete"));

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let fragments = fragments(&text, &mut rng, cli.min_chunk, cli.max_chunk);
    info!(fragments = fragments.len(), bytes = text.len(), "streaming");

    let delay = Duration::from_millis(cli.delay_ms);
    let pause = Duration::from_millis(cli.pause_ms);
    let pause_after = cli.pause_after;
    let fast_forward_after = cli.fast_forward_after;

    // A one-slot channel keeps the producer in step with the pipeline, so
    // nothing is queued when it pauses.
    let (tx, rx) = mpsc::channel(1);
    let control = Rc::clone(&pipeline);
    let producer = tokio::task::spawn_local(async move {
        let mut fragments = fragments.into_iter().enumerate();
        while let Some((index, fragment)) = fragments.next() {
            if Some(index) == fast_forward_after {
                let rest: String = std::iter::once(fragment)
                    .chain(fragments.by_ref().map(|(_, fragment)| fragment))
                    .collect();
                info!(bytes = rest.len(), "fast-forwarding");
                let _ = tx.send(rest).await;
                break;
            }
            if Some(index) == pause_after {
                control.pause();
                info!(state = ?control.state(), "paused");
                tokio::time::sleep(pause).await;
                control.resume();
                info!("resumed");
            }
            if tx.send(fragment).await.is_err() {
                break;
            }
            tokio::time::sleep(delay).await;
        }
    });

    pipeline.drive(rx).await;
    if let Err(err) = producer.await {
        debug!(error = %err, "producer stopped");
    }
    pipeline.finished().await?;

    let html = sink.borrow().render();
    Ok(html)
}
