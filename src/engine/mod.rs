mod booking;
mod conflict;
mod error;
mod intervals;
mod mutations;
mod queries;
mod search;
mod slots;
mod store;
#[cfg(test)]
mod tests;

pub use error::{EngineError, ErrorKind};
pub use intervals::{fits_within_any, merge_overlapping, normalize, overlaps_any, subtract_intervals};
pub use search::{SearchQuery, SearchTarget, TimePreference};
pub use slots::{generate_slots, SlotRequest};
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::tz::TimeZoneConverter;
use crate::wal::Wal;

pub type SharedVetState = Arc<RwLock<VetState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued (the batch window).
/// 3. One flush_sync for the whole batch, then answer every sender.
/// A non-append command ends the batch early; it runs after the flush.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
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

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        // Appends never reach here; the writer loop batches them.
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed outside batch")));
        }
    }
}

/// One tenant's scheduling engine: registry, per-vet calendars, WAL writer.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes registry writes with each other and with compaction.
    pub(super) registry_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InMemoryStore::new(),
            wal_tx,
            registry_lock: Mutex::new(()),
            clock,
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never use blocking_write here: this may run inside an async context
        // (lazy tenant creation).
        for event in &events {
            match store::event_vet_id(event) {
                None => engine.store.apply_registry(event),
                Some(vet_id) => {
                    let Some(vs) = engine.store.vet(&vet_id) else {
                        continue;
                    };
                    let Ok(mut guard) = vs.try_write() else {
                        return Err(io::Error::other("replay: vet state unexpectedly locked"));
                    };
                    engine.store.apply_to_vet(&mut guard, event);
                }
            }
        }

        info!(
            events = events.len(),
            practices = engine.store.practice_count(),
            vets = engine.store.vet_count(),
            path = %wal_path.display(),
            "engine replayed"
        );
        Ok(engine)
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Registry write: WAL first, then the in-memory index.
    pub(super) async fn persist_registry(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_registry(event);
        Ok(())
    }

    /// Vet-level write: WAL first, then apply under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VetState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_to_vet(vs, event);
        Ok(())
    }

    pub(super) fn shared_vet(&self, vet_id: &Ulid) -> Result<SharedVetState, EngineError> {
        self.store.vet(vet_id).ok_or(EngineError::NotFound(*vet_id))
    }

    pub(super) fn practice_state(&self, practice_id: &Ulid) -> Result<PracticeState, EngineError> {
        self.store
            .practice(practice_id)
            .ok_or(EngineError::NotFound(*practice_id))
    }

    /// Lookup entity → vet, acquire that vet's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VetState>, EngineError> {
        let vet_id = self
            .store
            .vet_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let vs = self.shared_vet(&vet_id)?;
        Ok(vs.write_owned().await)
    }

    /// Converter for a request: explicit override, else the practice's zone.
    pub(super) fn converter_for(
        &self,
        settings: &PracticeSettings,
        timezone: Option<&str>,
    ) -> Result<TimeZoneConverter, EngineError> {
        TimeZoneConverter::new(timezone.unwrap_or(&settings.timezone))
    }
}
