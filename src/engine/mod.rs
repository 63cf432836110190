mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::{conflicts, first_conflict};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;
use ulid::{Generator, Ulid};

use crate::model::*;
use crate::observability;
use crate::time::Date;
use crate::wal::Wal;

pub type SharedDayState = Arc<RwLock<DayState>>;

/// How `create` guards the check-then-insert sequence on one date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictMode {
    /// The conflict query and the insert are separate steps. Two concurrent
    /// creates for overlapping ranges on the same date can both succeed.
    #[default]
    Optimistic,
    /// Single writer per date: the day's write lock is held from the conflict
    /// query through the insert, so overlapping creates cannot both persist.
    Serialized,
}

impl FromStr for ConflictMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "optimistic" => Ok(ConflictMode::Optimistic),
            "serialized" | "serialised" => Ok(ConflictMode::Serialized),
            other => Err(format!("unknown conflict mode: {other}")),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL. Appends that are already queued when
/// the first one arrives are written as one batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
    info!(path = %wal.path().display(), "WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    let failure = match append_err {
        Some(e) => Some(e),
        None => wal.flush_sync().err(),
    };
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    if let Some(e) = &failure {
        tracing::error!(error = %e, batch = batch.len(), "WAL batch commit failed");
        // Every caller in the batch is told it failed, so none of its frames
        // may survive into the file.
        if let Err(rollback_err) = wal.rollback() {
            tracing::error!(error = %rollback_err, "WAL rollback failed, refusing further appends");
        }
    }
    for (_, tx) in batch.drain(..) {
        let r = match &failure {
            None => Ok(()),
            Some(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        // Appends are batched by the caller loop.
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The booking store: the canonical collection of reservations and users,
/// kept in memory and made durable through the WAL.
pub struct Engine {
    pub(super) reservations: DashMap<Ulid, Reservation>,
    /// Date → slots booked on that date, searched by the overlap check.
    pub(super) days: DashMap<Date, SharedDayState>,
    /// Username → account.
    pub(super) users: DashMap<String, User>,
    /// Serializes registrations so a username is claimed once.
    pub(super) users_gate: tokio::sync::Mutex<()>,
    /// Mutations hold it shared from WAL append to in-memory apply;
    /// compaction holds it exclusively while it snapshots.
    pub(super) compaction_gate: RwLock<()>,
    ids: Mutex<Generator>,
    pub(super) mode: ConflictMode,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the background writer.
    /// Must be called from within a tokio runtime.
    pub fn new(wal_path: PathBuf, mode: ConflictMode) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            reservations: DashMap::new(),
            days: DashMap::new(),
            users: DashMap::new(),
            users_gate: tokio::sync::Mutex::new(()),
            compaction_gate: RwLock::new(()),
            ids: Mutex::new(Generator::new()),
            mode,
            wal_tx,
        };

        for event in &events {
            engine.replay_event(event);
        }
        metrics::gauge!(observability::RESERVATIONS_ACTIVE).set(engine.reservations.len() as f64);
        info!(
            path = %wal_path.display(),
            events = events.len(),
            reservations = engine.reservations.len(),
            users = engine.users.len(),
            ?mode,
            "booking store opened"
        );
        Ok(engine)
    }

    /// Apply a replayed event. We are the sole owner of every day lock here,
    /// so `try_write` always succeeds; blocking locks are avoided because this
    /// runs inside the runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::ReservationCreated(r) | Event::ReservationUpdated(r) => {
                if let Some(old) = self.reservations.get(&r.id).map(|e| e.value().clone()) {
                    self.with_day_replay(old.date, |day| {
                        day.remove_slot(old.id);
                    });
                }
                self.with_day_replay(r.date, |day| day.insert_slot(r.id, r.range()));
                self.reservations.insert(r.id, r.clone());
            }
            Event::ReservationDeleted { id } => {
                if let Some((_, old)) = self.reservations.remove(id) {
                    self.with_day_replay(old.date, |day| {
                        day.remove_slot(old.id);
                    });
                }
            }
            Event::UserRegistered {
                id,
                username,
                password_hash,
            } => {
                self.users.insert(
                    username.clone(),
                    User {
                        id: *id,
                        username: username.clone(),
                        password_hash: password_hash.clone(),
                    },
                );
            }
        }
    }

    fn with_day_replay(&self, date: Date, f: impl FnOnce(&mut DayState)) {
        let day = self.day(date);
        if let Ok(mut guard) = day.try_write() {
            f(&mut guard);
        }
    }

    /// The index for `date`, created on first use. Days are never removed, so
    /// a handle obtained here stays the canonical one.
    pub(super) fn day(&self, date: Date) -> SharedDayState {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .value()
            .clone()
    }

    pub(super) fn next_id(&self) -> Result<Ulid, EngineError> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| EngineError::StoreUnavailable("id generator poisoned".into()))?;
        ids.generate()
            .map_err(|_| EngineError::LimitExceeded("id space exhausted for this millisecond"))
    }

    /// Send an event to the background writer and wait for its fsync.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))
    }

    pub fn conflict_mode(&self) -> ConflictMode {
        self.mode
    }
}
