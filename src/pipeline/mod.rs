//! Bounded frame pipeline
//!
//! Single producer (a capture source callback) to single consumer (a thread
//! running a [`FrameConsumer`]). The producer never blocks: when the queue is
//! full the oldest queued frame is evicted so the newest one always gets in.
//! Capture surfaces must keep draining, and a live stream prefers recent
//! frames over complete ones.

pub mod sink;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::frame::Frame;

pub use sink::{FanoutConsumer, SnapshotCounter, SnapshotSink, UploadConsumer};

/// Processing step on the consumer side of a pipeline
pub trait FrameConsumer: Send {
    /// Handle one frame. An error drops this frame only.
    fn consume(&mut self, frame: &Frame) -> Result<()>;

    /// Called once on the consumer thread after the last frame
    fn finish(&mut self) {}
}

#[derive(Default)]
struct PipelineCounters {
    produced: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Frame accounting for one pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames accepted from the producer
    pub produced: u64,
    /// Frames handed to the consumer
    pub delivered: u64,
    /// Frames evicted because the queue was full
    pub dropped: u64,
    /// Frames still queued at close
    pub discarded: u64,
    /// Delivered frames the consumer failed on
    pub failed: u64,
    /// Frames submitted after close
    pub rejected: u64,
}

impl PipelineCounters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            produced: self.produced.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Producer handle given to a capture source
#[derive(Clone)]
pub struct FrameProducer {
    tx: Sender<Frame>,
    evict: Receiver<Frame>,
    open: Arc<AtomicBool>,
    counters: Arc<PipelineCounters>,
}

impl FrameProducer {
    /// Queue a frame without blocking.
    ///
    /// Returns false if the pipeline is closed. A full queue evicts its
    /// oldest frame to make room.
    pub fn submit(&self, frame: Frame) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.counters.produced.fetch_add(1, Ordering::Relaxed);
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => {
                    if self.open.load(Ordering::SeqCst) {
                        return true;
                    }
                    // Closed while sending, so close() may already have drained
                    self.discard_queued();
                    return false;
                }
                Err(TrySendError::Full(returned)) => {
                    frame = returned;
                    if let Ok(oldest) = self.evict.try_recv() {
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(sequence = oldest.sequence, "Pipeline full, evicted oldest frame");
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn discard_queued(&self) {
        let mut discarded = 0u64;
        while let Ok(frame) = self.evict.try_recv() {
            drop(frame);
            discarded += 1;
        }
        if discarded > 0 {
            self.counters.discarded.fetch_add(discarded, Ordering::Relaxed);
        }
    }
}

/// Bounded conduit between a capture source and a consumer thread
pub struct FramePipeline {
    producer: FrameProducer,
    rx: Receiver<Frame>,
    shutdown_tx: Option<Sender<()>>,
    consumer: Option<JoinHandle<()>>,
    counters: Arc<PipelineCounters>,
    depth: usize,
}

impl FramePipeline {
    /// Open a pipeline and start its consumer thread
    pub fn open(config: &PipelineConfig, mut consumer: Box<dyn FrameConsumer>) -> Result<Self> {
        let depth = config.depth.max(1);
        let (tx, rx) = bounded::<Frame>(depth);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let counters = Arc::new(PipelineCounters::default());
        let open = Arc::new(AtomicBool::new(true));

        let frames = rx.clone();
        let consumer_counters = counters.clone();
        let handle = thread::Builder::new()
            .name("frame-consumer".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(frames) -> msg => match msg {
                            Ok(frame) => {
                                consumer_counters.delivered.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) = consumer.consume(&frame) {
                                    consumer_counters.failed.fetch_add(1, Ordering::Relaxed);
                                    tracing::warn!(sequence = frame.sequence, error = %e, "Frame processing failed");
                                }
                            }
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                consumer.finish();
            })?;

        tracing::debug!(depth, "Frame pipeline opened");

        Ok(Self {
            producer: FrameProducer {
                tx,
                evict: rx.clone(),
                open,
                counters: counters.clone(),
            },
            rx,
            shutdown_tx: Some(shutdown_tx),
            consumer: Some(handle),
            counters,
            depth,
        })
    }

    /// Handle for the capture side
    pub fn producer(&self) -> FrameProducer {
        self.producer.clone()
    }

    /// Stop accepting frames, discard the queue and join the consumer.
    ///
    /// Safe to call more than once.
    pub fn close(&mut self) -> PipelineStats {
        self.producer.open.store(false, Ordering::SeqCst);

        if let Some(shutdown) = self.shutdown_tx.take() {
            drop(shutdown);
        }
        if let Some(handle) = self.consumer.take() {
            if handle.join().is_err() {
                tracing::error!("Frame consumer thread panicked");
            }
        }

        let queued = self.rx.len();
        self.producer.discard_queued();
        if queued > 0 {
            tracing::debug!(discarded = queued, "Discarded queued frames on close");
        }

        self.stats()
    }

    pub fn is_open(&self) -> bool {
        self.producer.is_open()
    }

    /// Frames currently queued
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.close();
    }
}
