//! Bounded audio relay between the client socket and the transcription stream.
//!
//! Microphone audio cannot be rate-limited at the source, so the relay keeps a fixed-size
//! queue and evicts the oldest chunk when full. A drain task forwards one chunk per tick to
//! the current [`AudioSink`]. Forwarding failures are logged and the loop keeps going.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of chunks held before eviction starts
pub const DEFAULT_RELAY_CAPACITY: usize = 50;

/// Default cadence of the drain loop
pub const DEFAULT_RELAY_TICK: Duration = Duration::from_millis(100);

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Destination of relayed audio
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn send_chunk(&self, chunk: Bytes) -> Result<(), SinkError>;
}

/// Counters describing relay activity
#[derive(Debug, Default)]
pub struct RelayStats {
    forwarded: AtomicU64,
    evicted: AtomicU64,
    failed: AtomicU64,
}

impl RelayStats {
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

struct DrainTask {
    token: CancellationToken,
}

pub struct AudioRelay {
    queue: Arc<Mutex<VecDeque<Bytes>>>,
    capacity: usize,
    tick: Duration,
    sink: Option<Arc<dyn AudioSink>>,
    drain: Option<DrainTask>,
    /// Serializes forwarding so a drain loop being paused cannot interleave with its successor
    forward_lock: Arc<tokio::sync::Mutex<()>>,
    stats: Arc<RelayStats>,
}

impl AudioRelay {
    pub fn new(capacity: usize, tick: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            tick,
            sink: None,
            drain: None,
            forward_lock: Arc::new(tokio::sync::Mutex::new(())),
            stats: Arc::new(RelayStats::default()),
        }
    }

    /// Queue a chunk, evicting the oldest one when the queue is full. Never blocks.
    pub fn add_chunk(&self, chunk: Bytes) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.stats.evicted.fetch_add(1, Ordering::Relaxed);
            debug!(capacity = self.capacity, "Audio relay full, evicted oldest chunk");
        }
        queue.push_back(chunk);
    }

    /// Start draining into `sink`. Has no effect while a drain loop is already running.
    pub fn start_processing(&mut self, sink: Arc<dyn AudioSink>) {
        if self.is_processing() {
            return;
        }
        self.sink = Some(sink);
        self.spawn_drain();
    }

    /// Halt the drain loop, keeping buffered chunks
    pub fn pause(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.token.cancel();
            debug!(buffered = self.len(), "Audio relay paused");
        }
    }

    /// Restart the drain loop with the last sink, if any
    pub fn resume(&mut self) {
        if self.is_processing() || self.sink.is_none() {
            return;
        }
        self.spawn_drain();
    }

    /// Drop every buffered chunk and pause
    pub fn clear(&mut self) {
        self.queue.lock().clear();
        self.pause();
    }

    pub fn is_processing(&self) -> bool {
        self.drain.is_some()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the buffered chunks, oldest first
    pub fn buffered(&self) -> Vec<Bytes> {
        self.queue.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    fn spawn_drain(&mut self) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let token = CancellationToken::new();

        tokio::spawn(drain_loop(
            self.queue.clone(),
            sink,
            self.tick,
            token.clone(),
            self.forward_lock.clone(),
            self.stats.clone(),
        ));

        self.drain = Some(DrainTask { token });
    }
}

impl Drop for AudioRelay {
    fn drop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.token.cancel();
        }
    }
}

async fn drain_loop(
    queue: Arc<Mutex<VecDeque<Bytes>>>,
    sink: Arc<dyn AudioSink>,
    tick: Duration,
    token: CancellationToken,
    forward_lock: Arc<tokio::sync::Mutex<()>>,
    stats: Arc<RelayStats>,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let _forwarding = forward_lock.lock().await;
        if token.is_cancelled() {
            break;
        }

        let next = { queue.lock().pop_front() };
        let Some(chunk) = next else {
            continue;
        };

        match sink.send_chunk(chunk).await {
            Ok(()) => {
                stats.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to forward audio chunk");
            }
        }
    }
}
