//! Slot generation: one vet, one local date, one duration.
//!
//! Candidates are stepped in instant space from each AVAILABLE block's
//! resolved start. That keeps DST days honest without special cases: a
//! spring-forward day has no candidates inside the skipped hour because no
//! instant maps there, and a fall-back day lists the repeated hour twice
//! with distinct instants.

use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::tz::TimeZoneConverter;

use super::conflict::validate_duration;
use super::intervals::{fits_within_any, normalize, overlaps_any, subtract_intervals};
use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy)]
pub struct SlotRequest<'a> {
    pub vet_id: Ulid,
    pub date: NaiveDate,
    pub converter: &'a TimeZoneConverter,
    pub duration_min: u32,
    pub granularity_min: u32,
}

/// Every bookable start on `req.date`, ascending, deduplicated by start.
///
/// `blocks` and `appointments` are whatever overlaps the local day; this
/// function does its own filtering, so passing extra rows is harmless.
pub fn generate_slots(
    req: &SlotRequest<'_>,
    blocks: &[AvailabilityBlock],
    appointments: &[Appointment],
) -> Vec<Slot> {
    let conv = req.converter;
    let day = conv.day_span(req.date);
    if day.duration_ms() == 0 || req.duration_min == 0 || req.granularity_min == 0 {
        return Vec::new();
    }
    let duration_ms = req.duration_min as Ms * MINUTE_MS;
    let step_ms = req.granularity_min as Ms * MINUTE_MS;

    let blocked = normalize(
        blocks
            .iter()
            .filter(|b| b.is_blocked())
            .map(|b| b.span)
            .collect(),
    );
    let busy = normalize(
        appointments
            .iter()
            .filter(|a| a.status.occupies_interval())
            .map(|a| a.span())
            .collect(),
    );

    let mut slots = Vec::new();
    for block in blocks.iter().filter(|b| b.is_available()) {
        // Phantom-availability guard: the row must belong to the requested
        // date both as stored and as seen from the request's zone.
        if block.date != req.date || conv.local_date(block.span.start) != req.date {
            debug!(block = %block.id, date = %req.date, "skipping block from another local date");
            continue;
        }

        let windows = subtract_intervals(&[block.span], &blocked);
        let mut start = block.span.start;
        while start + duration_ms <= block.span.end {
            let candidate = Span::new(start, start + duration_ms);
            if fits_within_any(&windows, &candidate)
                && !overlaps_any(&busy, &candidate)
                && conv.local_date(start) == req.date
            {
                slots.push(to_slot(req, candidate));
            }
            start += step_ms;
        }
    }

    slots.sort_by_key(|s| s.start);
    slots.dedup_by_key(|s| s.start);
    slots
}

fn to_slot(req: &SlotRequest<'_>, span: Span) -> Slot {
    let conv = req.converter;
    let local_end = if conv.local_date(span.end) != req.date
        && conv.local_clock(span.end) == ClockTime::MIDNIGHT
    {
        ClockTime::END_OF_DAY
    } else {
        conv.local_clock(span.end)
    };
    Slot {
        vet_id: req.vet_id,
        start: span.start,
        end: span.end,
        duration_min: req.duration_min,
        local_date: req.date,
        local_start: conv.local_clock(span.start),
        local_end,
    }
}

impl Engine {
    /// Bookable slots for one vet on one local date.
    ///
    /// `duration_min` defaults to the practice's default appointment length;
    /// `timezone` overrides the practice zone for interpreting `date`.
    pub async fn available_slots(
        &self,
        vet_id: Ulid,
        date: NaiveDate,
        duration_min: Option<u32>,
        timezone: Option<&str>,
    ) -> Result<Vec<Slot>, EngineError> {
        let vs = self.shared_vet(&vet_id)?;
        let guard = vs.read().await;
        if !guard.active {
            return Err(EngineError::Inactive(vet_id));
        }
        let practice = self.practice_state(&guard.practice_id)?;
        let converter = self.converter_for(&practice.settings, timezone)?;
        let duration = duration_min.unwrap_or(practice.settings.default_duration_min);
        validate_duration(duration)?;

        let slots = slots_for_vet(&guard, &practice.settings, &converter, date, duration);
        metrics::counter!(crate::observability::SLOTS_GENERATED_TOTAL).increment(slots.len() as u64);
        Ok(slots)
    }

    /// REST shape of [`available_slots`](Self::available_slots).
    pub async fn available_slot_rows(
        &self,
        vet_id: Ulid,
        date: NaiveDate,
        duration_min: Option<u32>,
    ) -> Result<Vec<SlotRow>, EngineError> {
        let slots = self.available_slots(vet_id, date, duration_min, None).await?;
        Ok(slots.iter().map(Slot::to_row).collect())
    }
}

/// Slots for a vet whose read lock the caller already holds.
pub(super) fn slots_for_vet(
    vs: &VetState,
    settings: &PracticeSettings,
    converter: &TimeZoneConverter,
    date: NaiveDate,
    duration_min: u32,
) -> Vec<Slot> {
    let day = converter.day_span(date);
    if day.duration_ms() == 0 {
        return Vec::new();
    }
    // Under a zone override an AVAILABLE row can run past the local day, and
    // so can its candidates. Anything that could overlap them is in scope.
    let window = vs
        .blocks_overlapping(&day)
        .filter(|b| b.is_available())
        .fold(day, |w, b| Span::new(w.start.min(b.span.start), w.end.max(b.span.end)));
    let blocks: Vec<AvailabilityBlock> = vs
        .blocks_overlapping(&window)
        .filter(|b| b.active)
        .cloned()
        .collect();
    let appointments: Vec<Appointment> = vs.appointments_overlapping(&window).cloned().collect();
    let req = SlotRequest {
        vet_id: vs.id,
        date,
        converter,
        duration_min,
        granularity_min: settings.granularity_min,
    };
    generate_slots(&req, &blocks, &appointments)
}
