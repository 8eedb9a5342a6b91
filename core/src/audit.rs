//! Audit sink seam and the fire-and-forget queue in front of it.
//!
//! RULE: The decision path never waits on the audit log.
//! `AuditQueue::append` is a `try_send` into a bounded channel; a full or
//! dead queue drops the record with a log line and the decision goes out
//! regardless. One worker thread drains the channel into the real sink.

use crate::{
    error::{GuardError, GuardResult},
    event::AuditRecord,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Durable, append-only destination for audit records.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> GuardResult<()>;

    /// Block until everything appended so far is durable.
    fn flush(&self) -> GuardResult<()> {
        Ok(())
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn append(&self, record: &AuditRecord) -> GuardResult<()> {
        (**self).append(record)
    }

    fn flush(&self) -> GuardResult<()> {
        (**self).flush()
    }
}

/// Keeps records in memory. For tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: &AuditRecord) -> GuardResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn append(&self, _record: &AuditRecord) -> GuardResult<()> {
        Ok(())
    }
}

// ── Queue ────────────────────────────────────────────────────────────────────

enum QueueMessage {
    Record(Box<AuditRecord>),
    Flush(mpsc::Sender<()>),
}

pub struct AuditQueue {
    sender: Mutex<Option<SyncSender<QueueMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl AuditQueue {
    /// Start the worker thread draining into `sink`.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> GuardResult<Self> {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        let failed = Arc::new(AtomicU64::new(0));
        let worker_failed = Arc::clone(&failed);

        let worker = thread::Builder::new()
            .name("audit-writer".into())
            .spawn(move || drain(receiver, sink, worker_failed))
            .map_err(|e| GuardError::AuditQueue(format!("cannot start writer thread: {e}")))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            dropped: Arc::new(AtomicU64::new(0)),
            failed,
        })
    }

    /// Records dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Records the sink refused.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Stop accepting records, drain what is queued, and join the worker.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("audit writer thread panicked");
            }
        }
    }
}

impl AuditSink for AuditQueue {
    fn append(&self, record: &AuditRecord) -> GuardResult<()> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(GuardError::AuditQueue("queue is shut down".into()));
        };
        match sender.try_send(QueueMessage::Record(Box::new(record.clone()))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(GuardError::AuditQueue("queue is full".into()))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(GuardError::AuditQueue("writer thread is gone".into()))
            }
        }
    }

    fn flush(&self) -> GuardResult<()> {
        let sender = match self.sender.lock().as_ref() {
            Some(sender) => sender.clone(),
            None => return Ok(()),
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        sender
            .send(QueueMessage::Flush(ack_tx))
            .map_err(|_| GuardError::AuditQueue("writer thread is gone".into()))?;
        ack_rx
            .recv()
            .map_err(|_| GuardError::AuditQueue("writer thread exited before flushing".into()))
    }
}

impl Drop for AuditQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drain(receiver: Receiver<QueueMessage>, sink: Arc<dyn AuditSink>, failed: Arc<AtomicU64>) {
    for message in receiver {
        match message {
            QueueMessage::Record(record) => {
                if let Err(e) = sink.append(&record) {
                    failed.fetch_add(1, Ordering::Relaxed);
                    log::error!(
                        "audit write failed for {} {}: {e}",
                        record.record_type(),
                        record.audit_id()
                    );
                }
            }
            QueueMessage::Flush(ack) => {
                if let Err(e) = sink.flush() {
                    log::error!("audit flush failed: {e}");
                }
                let _ = ack.send(());
            }
        }
    }
    log::debug!("audit writer drained and stopped");
}
