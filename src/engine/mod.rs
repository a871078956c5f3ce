mod availability;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{check_capacity, open_slots};
pub use error::{EngineError, ErrorKind, PolicyViolation};

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::lifecycle::Ctx;
use crate::limits::MAX_ACTOR_LEN;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::journal::{Frame, Journal};

pub type SharedLedger = Arc<RwLock<DayLedger>>;

// ── Journal writer ───────────────────────────────────────

pub(super) enum JournalCommand {
    Append {
        frame: Frame,
        done: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        frames: Vec<Frame>,
        done: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        reply: oneshot::Sender<u64>,
    },
}

fn share(result: &io::Result<()>) -> io::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
    }
}

/// Owns the journal file. Appends that queue up while a commit is running
/// are staged together and share the next fsync.
async fn journal_writer(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    let mut held = None;
    loop {
        let cmd = match held.take() {
            Some(cmd) => cmd,
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            JournalCommand::Append { frame, done } => {
                journal.stage(&frame);
                let mut waiting = vec![done];
                while let Ok(next) = rx.try_recv() {
                    if let JournalCommand::Append { frame, done } = next {
                        journal.stage(&frame);
                        waiting.push(done);
                    } else {
                        held = Some(next);
                        break;
                    }
                }

                metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(waiting.len() as f64);
                let started = std::time::Instant::now();
                let result = journal.commit();
                metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    tracing::error!(batch = waiting.len(), "journal commit failed: {e}");
                }
                for done in waiting {
                    let _ = done.send(share(&result));
                }
            }
            JournalCommand::Rewrite { frames, done } => {
                let _ = done.send(journal.rewrite(&frames));
            }
            JournalCommand::AppendsSinceCompact { reply } => {
                let _ = reply.send(journal.appends_since_compact());
            }
        }
    }
}

/// Last snapshot per booking wins. Returns the day ledgers and the highest
/// booking-number sequence seen.
fn rebuild(events: Vec<Event>) -> (HashMap<LedgerKey, DayLedger>, u64) {
    let mut latest: HashMap<Ulid, Booking> = HashMap::new();
    for event in events {
        let booking = match event {
            Event::Created(b) | Event::Compacted(b) => b,
            Event::Transitioned { booking, .. } => booking,
        };
        latest.insert(booking.id, *booking);
    }

    let mut ledgers: HashMap<LedgerKey, DayLedger> = HashMap::new();
    let mut sequence = 0;
    for booking in latest.into_values() {
        sequence = sequence.max(booking.sequence().unwrap_or(0));
        let key = booking.ledger_key();
        ledgers.entry(key).or_insert_with(|| DayLedger::new(key)).upsert(booking);
    }
    (ledgers, sequence)
}

pub struct Engine {
    pub config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    pub(super) ledgers: DashMap<LedgerKey, SharedLedger>,
    /// Reverse lookup: booking id → the ledger currently holding it.
    pub(super) index: DashMap<Ulid, LedgerKey>,
    pub(super) numbers: DashMap<String, Ulid>,
    sequence: AtomicU64,
    /// `None` runs purely in memory.
    journal_tx: Option<mpsc::Sender<JournalCommand>>,
    /// Mutations hold this shared; compaction takes it exclusively so its
    /// snapshot cannot miss an append.
    pub(super) compaction: RwLock<()>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    /// In-memory engine without a journal.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>, notify: Arc<NotifyHub>) -> Self {
        Self::assemble(config, clock, notify, HashMap::new(), 0, None)
    }

    /// Journaled engine: recover `journal_path`, then spawn the writer.
    /// Must be called from within a tokio runtime.
    pub fn open(
        journal_path: &Path,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let (journal, recovered) = Journal::open(journal_path)?;
        let replayed = recovered.events.len();
        let (ledgers, sequence) = rebuild(recovered.events);
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer(journal, journal_rx));

        let engine = Self::assemble(config, clock, notify, ledgers, sequence, Some(journal_tx));
        tracing::info!(
            events = replayed,
            bookings = engine.index.len(),
            discarded_bytes = recovered.discarded_bytes,
            "journal replayed from {}",
            journal_path.display()
        );
        Ok(engine)
    }

    fn assemble(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
        ledgers: HashMap<LedgerKey, DayLedger>,
        sequence: u64,
        journal_tx: Option<mpsc::Sender<JournalCommand>>,
    ) -> Self {
        let engine = Self {
            config: Arc::new(config),
            clock,
            ledgers: DashMap::new(),
            index: DashMap::new(),
            numbers: DashMap::new(),
            sequence: AtomicU64::new(sequence),
            journal_tx,
            compaction: RwLock::new(()),
            notify,
        };
        for (key, ledger) in ledgers {
            for b in &ledger.bookings {
                engine.index.insert(b.id, key);
                engine.numbers.insert(b.booking_number.clone(), b.id);
            }
            engine.ledgers.insert(key, Arc::new(RwLock::new(ledger)));
        }
        metrics::gauge!(crate::observability::BOOKINGS_TRACKED).set(engine.index.len() as f64);
        engine
    }

    pub(super) fn ctx<'a>(&'a self, actor: &'a str) -> Ctx<'a> {
        Ctx {
            config: &self.config,
            now: self.clock.now(),
            actor,
        }
    }

    pub fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }

    pub(super) fn validate_actor(actor: &str) -> Result<(), EngineError> {
        if actor.is_empty() || actor.len() > MAX_ACTOR_LEN {
            return Err(EngineError::LimitExceeded("actor must be 1..=128 bytes"));
        }
        Ok(())
    }

    /// `BK-YYYYMMDD-NNNNNN`, sequence shared across all dates.
    pub(super) fn next_booking_number(&self, date: NaiveDate) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("BK-{}-{n:06}", date.format("%Y%m%d"))
    }

    /// Ledger for `key`, created empty on first use.
    pub(super) fn ledger(&self, key: LedgerKey) -> SharedLedger {
        self.ledgers
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DayLedger::new(key))))
            .clone()
    }

    pub(super) fn existing_ledger(&self, key: &LedgerKey) -> Option<SharedLedger> {
        self.ledgers.get(key).map(|e| e.value().clone())
    }

    /// Write-lock the ledger holding `id`. Retries when a concurrent update
    /// moved the booking between the index lookup and the lock.
    pub(super) async fn lock_booking(&self, id: Ulid) -> Result<OwnedRwLockWriteGuard<DayLedger>, EngineError> {
        for _ in 0..3 {
            let key = self.index.get(&id).map(|e| *e.value()).ok_or(EngineError::NotFound(id))?;
            let guard = self.ledger(key).write_owned().await;
            if guard.get(id).is_some() {
                return Ok(guard);
            }
        }
        Err(EngineError::NotFound(id))
    }

    /// Hand a command to the writer task and wait for its answer.
    async fn journal_request<T>(
        tx: &mpsc::Sender<JournalCommand>,
        cmd: JournalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        tx.send(cmd)
            .await
            .map_err(|_| EngineError::JournalUnavailable("journal writer stopped".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalUnavailable("journal writer dropped the request".into()))
    }

    /// Frame the snapshot and wait until it is durable. Oversized snapshots
    /// are refused here, before the writer sees them.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let Some(tx) = &self.journal_tx else {
            return Ok(());
        };
        let frame = Frame::encode(event)?;
        let (done, rx) = oneshot::channel();
        Self::journal_request(tx, JournalCommand::Append { frame, done }, rx)
            .await?
            .map_err(|e| EngineError::JournalUnavailable(e.to_string()))
    }

    /// Journal, then apply and notify. A failed append leaves every ledger untouched.
    /// `previous` is the ledger a rescheduled booking is leaving.
    pub(super) async fn commit(
        &self,
        event: Event,
        ledger: &mut DayLedger,
        previous: Option<&mut DayLedger>,
    ) -> Result<Booking, EngineError> {
        self.journal_append(&event).await?;
        let booking = event.booking().clone();
        if let Some(prev) = previous {
            prev.remove(booking.id);
        }
        self.index.insert(booking.id, booking.ledger_key());
        self.numbers.insert(booking.booking_number.clone(), booking.id);
        ledger.upsert(booking.clone());
        metrics::gauge!(crate::observability::BOOKINGS_TRACKED).set(self.index.len() as f64);
        self.notify.send(booking.space_type, &event);
        Ok(booking)
    }

    /// Rewrite the journal as one snapshot per booking.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let Some(tx) = &self.journal_tx else {
            return Ok(());
        };
        let _exclusive = self.compaction.write().await;

        let ledgers: Vec<SharedLedger> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut frames = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            for b in &guard.bookings {
                frames.push(Frame::encode(&Event::Compacted(Box::new(b.clone())))?);
            }
        }
        let count = frames.len();

        let (done, rx) = oneshot::channel();
        Self::journal_request(tx, JournalCommand::Rewrite { frames, done }, rx)
            .await?
            .map_err(|e| EngineError::JournalUnavailable(e.to_string()))?;
        tracing::info!(snapshots = count, "journal compacted");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let Some(tx) = &self.journal_tx else {
            return 0;
        };
        let (reply, rx) = oneshot::channel();
        Self::journal_request(tx, JournalCommand::AppendsSinceCompact { reply }, rx)
            .await
            .unwrap_or(0)
    }
}
