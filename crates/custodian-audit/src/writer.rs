//! The batch writer: sole owner of the chain tail.
//!
//! ```text
//! Recorder ─┐
//! Recorder ─┼─ WriterHandle::enqueue ─► unbounded mpsc ─► BatchWriter::run
//! Recorder ─┘                                               │
//!                                     lock chain ◄──────────┤
//!                                     last_record() ◄───────┤ refresh tail
//!                                     stamp × n ◄───────────┤ in memory, FIFO
//!                                     append_batch() ◄──────┘ retry until ok
//! ```
//!
//! Producers never wait: `enqueue` is an O(1) channel send.  The single
//! consumer loop turns arrival order into sequence order.  A batch that
//! fails to persist is retried as-is (same sequence numbers, same hashes)
//! and nothing queued behind it is processed until it lands.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use custodian_contracts::{
    error::{CustodianError, CustodianResult},
    record::{AuditEntry, AuditRecord},
    taxonomy::{AuditAction, Severity},
};
use custodian_core::{
    chain::{stamp, ChainTail},
    traits::AuditStore,
};
use custodian_policy::WriterSettings;

/// Serializes every path that reads the tail and then writes the chain.
///
/// The writer holds it from tail refresh until its batch is persisted; the
/// rebuild path holds it for the whole rewrite.
pub type ChainLock = Arc<Mutex<()>>;

pub fn new_chain_lock() -> ChainLock {
    Arc::new(Mutex::new(()))
}

enum WriterMessage {
    Entry(Box<AuditEntry>),
    /// Resolved once every entry queued before it has been persisted.
    Flush(oneshot::Sender<()>),
}

// ── Counters ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct WriterCounters {
    persisted: AtomicU64,
    batches: AtomicU64,
    retries: AtomicU64,
    lost: AtomicU64,
}

/// A point-in-time copy of the writer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub persisted: u64,
    pub batches: u64,
    /// Failed persistence attempts that were retried.
    pub retries: u64,
    /// Entries abandoned during a shutdown drain.
    pub lost: u64,
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// The producer side of the writer queue.  Cheap to clone.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<WriterMessage>,
    shutdown: CancellationToken,
    counters: Arc<WriterCounters>,
}

impl WriterHandle {
    /// Queue `entry` for sequencing.  Never blocks.
    ///
    /// Returns `CustodianError::WriterClosed` once shutdown has begun; the
    /// caller must not assume delivery in that case.
    pub fn enqueue(&self, entry: AuditEntry) -> CustodianResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(CustodianError::WriterClosed);
        }
        self.tx
            .send(WriterMessage::Entry(Box::new(entry)))
            .map_err(|_| CustodianError::WriterClosed)
    }

    /// Wait until everything queued before this call has been persisted.
    ///
    /// Returns `WriterClosed` if the writer stopped before it could persist
    /// those entries.
    pub async fn flush(&self) -> CustodianResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriterMessage::Flush(done_tx))
            .map_err(|_| CustodianError::WriterClosed)?;
        done_rx.await.map_err(|_| CustodianError::WriterClosed)
    }

    /// Whether new entries are being rejected.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
        }
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// How hard to try before giving up on a batch.
#[derive(Debug, Clone, Copy)]
enum RetryMode {
    /// Normal operation: retry forever, but yield to shutdown.
    UntilShutdown,
    /// Final drain: at most this many attempts.
    Bounded(u32),
}

/// A batch the writer could not persist, handed back for the final drain.
struct Unpersisted {
    entries: Vec<AuditEntry>,
    waiters: Vec<oneshot::Sender<()>>,
}

/// The single consumer that stamps and persists audit entries.
pub struct BatchWriter {
    store: Arc<dyn AuditStore>,
    settings: WriterSettings,
    rx: mpsc::UnboundedReceiver<WriterMessage>,
    shutdown: CancellationToken,
    chain_lock: ChainLock,
    counters: Arc<WriterCounters>,
}

impl BatchWriter {
    /// Build the writer and its producer handle.  Nothing runs until
    /// `run()` is awaited or `spawn()` is called.
    pub fn new(
        store: Arc<dyn AuditStore>,
        settings: WriterSettings,
        shutdown: CancellationToken,
        chain_lock: ChainLock,
    ) -> (Self, WriterHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(WriterCounters::default());
        let handle = WriterHandle {
            tx,
            shutdown: shutdown.clone(),
            counters: counters.clone(),
        };
        let writer = Self {
            store,
            settings,
            rx,
            shutdown,
            chain_lock,
            counters,
        };
        (writer, handle)
    }

    /// Build the writer and run it on the current tokio runtime.
    pub fn spawn(
        store: Arc<dyn AuditStore>,
        settings: WriterSettings,
        shutdown: CancellationToken,
        chain_lock: ChainLock,
    ) -> (WriterHandle, JoinHandle<()>) {
        let (writer, handle) = Self::new(store, settings, shutdown, chain_lock);
        (handle, tokio::spawn(writer.run()))
    }

    /// Run the consumer loop until shutdown is requested or every handle is
    /// dropped, then drain what is left.
    pub async fn run(mut self) {
        let batch_size = self.settings.batch_size.max(1);
        info!(
            batch_size,
            flush_interval_ms = self.settings.flush_interval_ms,
            retry_delay_ms = self.settings.retry_delay_ms,
            "audit batch writer started"
        );

        let mut ticker = tokio::time::interval(self.settings.flush_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut carry: Option<Unpersisted> = None;
        let mut pending: Vec<WriterMessage> = Vec::with_capacity(batch_size);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("audit batch writer shutting down");
                    break;
                }

                received = self.rx.recv_many(&mut pending, batch_size) => {
                    if received == 0 {
                        info!("all audit writer handles dropped");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    while pending.len() < batch_size {
                        match self.rx.try_recv() {
                            Ok(message) => pending.push(message),
                            Err(_) => break,
                        }
                    }
                }
            }

            if pending.is_empty() {
                continue;
            }

            let messages = std::mem::replace(&mut pending, Vec::with_capacity(batch_size));
            if let Err(unpersisted) = self.process(messages, RetryMode::UntilShutdown).await {
                carry = Some(unpersisted);
                break;
            }
        }

        self.drain(carry, batch_size).await;

        let stats = self.stats();
        info!(
            persisted = stats.persisted,
            batches = stats.batches,
            retries = stats.retries,
            lost = stats.lost,
            "audit batch writer stopped"
        );
    }

    fn stats(&self) -> WriterStats {
        WriterStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
        }
    }

    /// Final drain: reject new entries, then persist everything still queued
    /// with a bounded number of attempts per batch.
    async fn drain(&mut self, carry: Option<Unpersisted>, batch_size: usize) {
        self.rx.close();
        let attempts = self.settings.shutdown_flush_attempts.max(1);

        let mut next: Vec<WriterMessage> = Vec::new();
        if let Some(unpersisted) = carry {
            next.extend(
                unpersisted
                    .entries
                    .into_iter()
                    .map(|e| WriterMessage::Entry(Box::new(e))),
            );
            next.extend(unpersisted.waiters.into_iter().map(WriterMessage::Flush));
        }

        loop {
            let mut batch = std::mem::take(&mut next);
            while batch.len() < batch_size {
                match self.rx.try_recv() {
                    Ok(message) => batch.push(message),
                    Err(_) => break,
                }
            }
            if batch.is_empty() {
                return;
            }

            if let Err(unpersisted) = self.process(batch, RetryMode::Bounded(attempts)).await {
                let mut lost = unpersisted.entries.len() as u64;
                while let Ok(message) = self.rx.try_recv() {
                    if let WriterMessage::Entry(_) = message {
                        lost += 1;
                    }
                }
                self.counters.lost.fetch_add(lost, Ordering::Relaxed);
                error!(
                    lost,
                    attempts, "audit entries could not be persisted before shutdown"
                );
                // Dropping the waiters tells flushers their entries were not persisted.
                return;
            }
        }
    }

    /// Stamp and persist one batch of messages.
    async fn process(
        &mut self,
        messages: Vec<WriterMessage>,
        mode: RetryMode,
    ) -> Result<(), Unpersisted> {
        let mut entries = Vec::with_capacity(messages.len());
        let mut waiters = Vec::new();
        for message in messages {
            match message {
                WriterMessage::Entry(entry) => entries.push(*entry),
                WriterMessage::Flush(done) => waiters.push(done),
            }
        }

        if entries.is_empty() {
            release(waiters);
            return Ok(());
        }

        let chain_lock = self.chain_lock.clone();
        let _guard = chain_lock.lock().await;

        let tail = match self.load_tail(mode).await {
            Some(tail) => tail,
            None => return Err(Unpersisted { entries, waiters }),
        };

        let records = stamp_batch(tail, entries);
        let first = records.first().map_or(0, |r| r.sequence_number);
        let last = records.last().map_or(0, |r| r.sequence_number);

        if !self.persist(&records, mode).await {
            let entries = records.into_iter().map(|r| r.entry).collect();
            return Err(Unpersisted { entries, waiters });
        }

        self.counters
            .persisted
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        debug!(
            count = records.len(),
            first_sequence = first,
            last_sequence = last,
            "audit batch persisted"
        );

        release(waiters);
        Ok(())
    }

    /// Read the current tail from the store, retrying per `mode`.
    ///
    /// The outer `Option` is `None` when the writer gave up; the inner one is
    /// `None` for an empty chain.
    async fn load_tail(&self, mode: RetryMode) -> Option<Option<ChainTail>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.store.last_record().await {
                Ok(last) => return Some(last.as_ref().map(ChainTail::of)),
                Err(e) => {
                    warn!(error = %e, attempt, "failed to read audit chain tail");
                    if !self.back_off(mode, attempt).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Append `records`, retrying the identical batch per `mode`.
    async fn persist(&self, records: &[AuditRecord], mode: RetryMode) -> bool {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.store.append_batch(records).await {
                Ok(()) => return true,
                Err(e) => {
                    error!(
                        error = %e,
                        attempt,
                        count = records.len(),
                        first_sequence = records.first().map_or(0, |r| r.sequence_number),
                        "failed to persist audit batch"
                    );
                    if !self.back_off(mode, attempt).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Sleep before the next attempt.  Returns `false` when the writer should
    /// stop retrying.
    async fn back_off(&self, mode: RetryMode, attempt: u32) -> bool {
        match mode {
            RetryMode::UntilShutdown => {
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
                tokio::select! {
                    _ = self.shutdown.cancelled() => false,
                    _ = tokio::time::sleep(self.settings.retry_delay()) => true,
                }
            }
            RetryMode::Bounded(max) => {
                if attempt >= max {
                    return false;
                }
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(self.settings.retry_delay()).await;
                true
            }
        }
    }
}

/// Stamp `entries` in arrival order after `tail`, advancing the tail in
/// memory.  An entry whose canonical encoding fails is replaced by a minimal
/// SYSTEM_ERROR record so the chain still shows that something happened.
fn stamp_batch(mut tail: Option<ChainTail>, entries: Vec<AuditEntry>) -> Vec<AuditRecord> {
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let action = entry.action;
        let created_at = entry.created_at;
        let record = match stamp(tail.as_ref(), entry) {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, %action, "audit entry could not be encoded, recording fallback");
                let fallback = AuditEntry::new(AuditAction::SystemError)
                    .severity(Severity::Error)
                    .description(format!("{} audit entry could not be encoded", action))
                    .failed(e.to_string())
                    .created_at(created_at);
                match stamp(tail.as_ref(), fallback) {
                    Ok(record) => record,
                    Err(e) => {
                        error!(error = %e, "fallback audit entry could not be encoded");
                        continue;
                    }
                }
            }
        };
        tail = Some(ChainTail::of(&record));
        records.push(record);
    }
    records
}

fn release(waiters: Vec<oneshot::Sender<()>>) {
    for done in waiters {
        let _ = done.send(());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
