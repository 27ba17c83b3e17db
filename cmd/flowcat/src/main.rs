//! flowcat — cat(1) through the byteflow publisher
//!
//! Streams a file (or stdin) through `ChannelPublisher` on an epoll
//! `EventLoop` and writes every chunk to stdout. Demand is requested in
//! batches, so the read side only runs as fast as stdout drains.
//!
//! Usage:
//!     cargo build --release -p flowcat
//!     ./target/release/flowcat [path|-] [batch]
//!
//!     batch  chunks requested at a time (default 4, 0 = unbounded)
//!
//! Environment:
//!     FLOW_BUFFER_CAPACITY  bytes per chunk (default 8192)
//!     FLOW_LOG_LEVEL        off|error|warn|info|debug|trace
//!
//! Try:
//!     seq 1 1000000 | FLOW_LOG_LEVEL=debug ./target/release/flowcat - 2 | tail -1

use byteflow_core::kinfo;
use byteflow_core::{Chunk, FlowError, Publisher, Subscriber, Subscription, UNBOUNDED};
use byteflow_module::{EventLoop, EventLoopConfig, FdChannelSource, HeapBufferPool, PoolConfig};
use byteflow_publisher::ChannelPublisher;

use std::fs::File;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Instant;

const DEFAULT_BATCH: i64 = 4;

/// Writes chunks to stdout; asks for `batch` more after every `batch`.
struct StdoutSink {
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    batch: i64,
    chunks: AtomicU64,
    bytes: AtomicU64,
    done: Mutex<Option<mpsc::Sender<Result<(), String>>>>,
}

impl StdoutSink {
    fn new(batch: i64, done: mpsc::Sender<Result<(), String>>) -> Arc<Self> {
        Arc::new(Self {
            subscription: Mutex::new(None),
            batch,
            chunks: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            done: Mutex::new(Some(done)),
        })
    }

    fn subscription(&self) -> Option<Arc<dyn Subscription>> {
        self.subscription.lock().ok().and_then(|s| s.clone())
    }

    fn finish(&self, result: Result<(), String>) {
        if let Some(tx) = self.done.lock().ok().and_then(|mut d| d.take()) {
            let _ = tx.send(result);
        }
    }
}

impl Subscriber for StdoutSink {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if let Ok(mut slot) = self.subscription.lock() {
            *slot = Some(Arc::clone(&subscription));
        }
        subscription.request(self.batch);
    }

    fn on_next(&self, chunk: Chunk<'_>) {
        if let Err(e) = io::stdout().lock().write_all(&chunk) {
            if let Some(s) = self.subscription() {
                s.cancel();
            }
            self.finish(Err(format!("stdout: {}", e)));
            return;
        }
        self.bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        let seen = self.chunks.fetch_add(1, Ordering::Relaxed) + 1;
        if self.batch != UNBOUNDED && seen % self.batch as u64 == 0 {
            if let Some(s) = self.subscription() {
                s.request(self.batch);
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        self.finish(Err(error.to_string()));
    }

    fn on_complete(&self) {
        let _ = io::stdout().flush();
        self.finish(Ok(()));
    }
}

fn parse_args() -> Result<(Option<String>, i64), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let path = match args.first().map(String::as_str) {
        None | Some("-") => None,
        Some(p) => Some(p.to_string()),
    };
    let batch = match args.get(1) {
        None => DEFAULT_BATCH,
        Some(s) => s
            .parse::<i64>()
            .map_err(|_| format!("invalid batch '{}'", s))?,
    };
    if batch < 0 {
        return Err(format!("batch must be >= 0, got {}", batch));
    }
    Ok((path, if batch == 0 { UNBOUNDED } else { batch }))
}

fn run() -> Result<(), String> {
    let (path, batch) = parse_args()?;

    let event_loop = EventLoop::start(EventLoopConfig::from_env()).map_err(|e| e.to_string())?;
    let io = event_loop.handle();

    let source = match &path {
        Some(p) => {
            let file = File::open(p).map_err(|e| format!("{}: {}", p, e))?;
            FdChannelSource::from_file(file, io.clone())
        }
        None => FdChannelSource::stdin(io.clone()).map_err(|e| format!("stdin: {}", e))?,
    };
    let pool = Arc::new(HeapBufferPool::new(&PoolConfig::from_env()));

    let publisher = ChannelPublisher::new(Arc::new(source), pool, io);
    let (tx, rx) = mpsc::channel();
    let sink = StdoutSink::new(batch, tx);

    let start = Instant::now();
    publisher.subscribe(sink.clone());
    let result = rx
        .recv()
        .map_err(|_| "stream ended without a terminal signal".to_string())?;

    kinfo!(
        "flowcat: {} bytes in {} chunks, {:.1?}",
        sink.bytes.load(Ordering::Relaxed),
        sink.chunks.load(Ordering::Relaxed),
        start.elapsed()
    );
    result
}

fn main() -> ExitCode {
    // Report EPIPE as an error instead of dying on SIGPIPE.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("flowcat: {}", e);
            ExitCode::FAILURE
        }
    }
}
