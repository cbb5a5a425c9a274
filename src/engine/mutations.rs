use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::tz::{next_day, Disambiguation};

use super::conflict::{validate_name, validate_settings, validate_span};
use super::{Engine, EngineError, WalCommand};

/// Rows per `BlocksAdded` frame when a compaction rewrites a vet's calendar.
const COMPACT_BLOCKS_PER_EVENT: usize = 1024;

/// One stored row of an availability request after the overnight split.
type CivilRow = (NaiveDate, ClockTime, ClockTime);

/// Split `start..end` on `date` into rows that never wrap past midnight.
/// `end <= start` means the range runs overnight into `date + 1`.
pub(crate) fn split_overnight(
    date: NaiveDate,
    start: ClockTime,
    end: ClockTime,
) -> Result<Vec<CivilRow>, EngineError> {
    if start.is_end_of_day() {
        return Err(EngineError::InvalidRange("a block cannot start at 24:00".into()));
    }
    if start == end {
        return Err(EngineError::InvalidRange(format!("zero-length block at {start}")));
    }
    if end > start {
        return Ok(vec![(date, start, end)]);
    }
    if end == ClockTime::MIDNIGHT {
        return Ok(vec![(date, start, ClockTime::END_OF_DAY)]);
    }
    Ok(vec![
        (date, start, ClockTime::END_OF_DAY),
        (next_day(date), ClockTime::MIDNIGHT, end),
    ])
}

impl Engine {
    pub async fn register_practice(
        &self,
        id: Ulid,
        name: Option<String>,
        settings: PracticeSettings,
    ) -> Result<(), EngineError> {
        validate_name(name.as_deref())?;
        validate_settings(&settings)?;
        let _registry = self.registry_lock.lock().await;
        if self.store.practice_count() >= MAX_PRACTICES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many practices"));
        }
        if self.store.contains_practice(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let tz = settings.timezone.clone();
        self.persist_registry(&Event::PracticeRegistered { id, name, settings })
            .await?;
        info!(practice = %id, timezone = %tz, "practice registered");
        Ok(())
    }

    /// Replace a practice's settings. Blocks already written keep the
    /// instants they were resolved to.
    pub async fn update_practice(
        &self,
        id: Ulid,
        name: Option<String>,
        settings: PracticeSettings,
    ) -> Result<(), EngineError> {
        validate_name(name.as_deref())?;
        validate_settings(&settings)?;
        let _registry = self.registry_lock.lock().await;
        if !self.store.contains_practice(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_registry(&Event::PracticeUpdated { id, name, settings })
            .await
    }

    pub async fn register_vet(
        &self,
        id: Ulid,
        practice_id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        validate_name(name.as_deref())?;
        let _registry = self.registry_lock.lock().await;
        if self.store.vet_count() >= MAX_VETS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many vets"));
        }
        if self.store.contains_vet(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.store.contains_practice(&practice_id) {
            return Err(EngineError::NotFound(practice_id));
        }
        self.persist_registry(&Event::VetRegistered { id, practice_id, name })
            .await?;
        info!(vet = %id, practice = %practice_id, "vet registered");
        Ok(())
    }

    /// Stop offering a vet. Existing appointments are left alone.
    pub async fn deactivate_vet(&self, id: Ulid) -> Result<(), EngineError> {
        let vs = self.shared_vet(&id)?;
        let mut guard = vs.write().await;
        if !guard.active {
            return Ok(());
        }
        self.persist_and_apply(&mut guard, &Event::VetDeactivated { id })
            .await
    }

    /// Add working hours (AVAILABLE) or time off (BLOCKED) for a vet in the
    /// practice's timezone. Overnight ranges come back as two rows.
    pub async fn add_availability(
        &self,
        vet_id: Ulid,
        date: NaiveDate,
        start: ClockTime,
        end: ClockTime,
        block_type: BlockType,
    ) -> Result<Vec<AvailabilityBlock>, EngineError> {
        let rows = split_overnight(date, start, end)?;

        let vs = self.shared_vet(&vet_id)?;
        let mut guard = vs.write().await;
        if !guard.active {
            return Err(EngineError::Inactive(vet_id));
        }
        if guard.blocks.len() + rows.len() > MAX_BLOCKS_PER_VET {
            return Err(EngineError::LimitExceeded("too many availability blocks on vet"));
        }
        let practice = self.practice_state(&guard.practice_id)?;
        let converter = self.converter_for(&practice.settings, None)?;

        // Resolve every row before writing, so a DST failure on the second
        // half of an overnight range leaves nothing behind. The rows are
        // then written as a single event.
        let mut blocks = Vec::with_capacity(rows.len());
        for (row_date, row_start, row_end) in rows {
            let s = converter.clock_to_absolute(row_date, row_start, Disambiguation::Earliest)?;
            let e = converter.clock_to_absolute(row_date, row_end, Disambiguation::Latest)?;
            if e <= s {
                return Err(EngineError::InvalidRange(format!(
                    "{row_date} {row_start}-{row_end} is empty in {}",
                    converter.name()
                )));
            }
            let span = Span::new(s, e);
            validate_span(&span)?;
            blocks.push(AvailabilityBlock {
                id: Ulid::new(),
                vet_id,
                practice_id: guard.practice_id,
                date: row_date,
                start: row_start,
                end: row_end,
                block_type,
                active: true,
                span,
            });
        }

        for block in &blocks {
            flag_mixed_overlap(&guard, block);
        }
        let event = Event::BlocksAdded {
            vet_id,
            blocks: blocks.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(blocks)
    }

    /// Soft-delete an availability row. Deactivating twice is a no-op.
    pub async fn deactivate_availability(
        &self,
        block_id: Ulid,
    ) -> Result<AvailabilityBlock, EngineError> {
        let mut guard = self.resolve_entity_write(&block_id).await?;
        let block = guard
            .blocks
            .iter()
            .find(|b| b.id == block_id)
            .cloned()
            .ok_or(EngineError::NotFound(block_id))?;
        if !block.active {
            return Ok(block);
        }
        let vet_id = guard.id;
        self.persist_and_apply(&mut guard, &Event::BlockDeactivated { id: block_id, vet_id })
            .await?;
        Ok(AvailabilityBlock {
            active: false,
            ..block
        })
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// Registry and vet locks are held until the new file is in place, so no
    /// write can land in the old file after its state was snapshotted.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry_lock.lock().await;
        let mut events = Vec::new();
        let mut held = Vec::new();

        let mut practice_ids = self.store.practice_ids();
        practice_ids.sort();
        for pid in &practice_ids {
            if let Some(p) = self.store.practice(pid) {
                events.push(Event::PracticeRegistered {
                    id: p.id,
                    name: p.name,
                    settings: p.settings,
                });
            }
        }

        let mut vet_ids = self.store.vet_ids();
        vet_ids.sort();
        for vid in vet_ids {
            let Some(vs) = self.store.vet(&vid) else { continue };
            let guard = vs.read_owned().await;
            events.push(Event::VetRegistered {
                id: guard.id,
                practice_id: guard.practice_id,
                name: guard.name.clone(),
            });
            // Blocks and appointments carry their current flags and status.
            for chunk in guard.blocks.chunks(COMPACT_BLOCKS_PER_EVENT) {
                events.push(Event::BlocksAdded {
                    vet_id: guard.id,
                    blocks: chunk.to_vec(),
                });
            }
            for appointment in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    appointment: appointment.clone(),
                });
            }
            if !guard.active {
                events.push(Event::VetDeactivated { id: guard.id });
            }
            held.push(guard);
        }

        let event_count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(held);
        if result.is_ok() {
            info!(events = event_count, "WAL compacted");
        }
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// AVAILABLE over BLOCKED (or the reverse) is a data-entry anomaly. BLOCKED
/// wins at slot generation; here we only report it.
fn flag_mixed_overlap(vs: &VetState, block: &AvailabilityBlock) {
    let clash = vs
        .blocks_overlapping(&block.span)
        .find(|b| b.active && b.block_type != block.block_type);
    if let Some(other) = clash {
        warn!(
            vet = %vs.id,
            new_block = %block.id,
            existing_block = %other.id,
            date = %block.date,
            "AVAILABLE and BLOCKED rows overlap; BLOCKED takes precedence"
        );
        metrics::counter!(crate::observability::AVAILABILITY_ANOMALIES_TOTAL).increment(1);
    }
}
