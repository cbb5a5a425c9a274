use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_no_conflict, check_within_availability, validate_duration, validate_metadata, validate_span,
};
use super::{Engine, EngineError, ErrorKind};

impl Engine {
    /// Reserve `[start, start + duration)` on a vet.
    ///
    /// Holds the vet's write lock across re-validation, WAL append and
    /// apply, so concurrent attempts on one vet serialize and the loser sees
    /// the winner's appointment. A conflict is returned as-is; the engine
    /// never picks a different slot.
    pub async fn book(
        &self,
        id: Ulid,
        vet_id: Ulid,
        start: Ms,
        duration_min: u32,
        metadata: AppointmentMetadata,
    ) -> Result<Appointment, EngineError> {
        let result = self.book_inner(id, vet_id, start, duration_min, metadata).await;
        let outcome = match &result {
            Ok(_) => "booked",
            Err(e) => match e.kind() {
                ErrorKind::Conflict => "conflict",
                ErrorKind::Validation => "invalid",
                ErrorKind::DstTransition => "dst_transition",
                ErrorKind::Storage => "error",
            },
        };
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn book_inner(
        &self,
        id: Ulid,
        vet_id: Ulid,
        start: Ms,
        duration_min: u32,
        metadata: AppointmentMetadata,
    ) -> Result<Appointment, EngineError> {
        validate_duration(duration_min)?;
        let span = Span::from_minutes(start, duration_min);
        validate_span(&span)?;
        validate_metadata(&metadata)?;

        let vs = self.shared_vet(&vet_id)?;
        let mut guard = vs.write().await;
        if !guard.active {
            return Err(EngineError::Inactive(vet_id));
        }
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_VET {
            return Err(EngineError::LimitExceeded("too many appointments on vet"));
        }
        // The id is claimed across all vets before anything is written.
        if !self.store.reserve_entity(id, vet_id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let result = self
            .commit_booking(&mut guard, id, start, duration_min, span, metadata)
            .await;
        if result.is_err() {
            self.store.release_entity(&id);
        }
        result
    }

    async fn commit_booking(
        &self,
        guard: &mut VetState,
        id: Ulid,
        start: Ms,
        duration_min: u32,
        span: Span,
        metadata: AppointmentMetadata,
    ) -> Result<Appointment, EngineError> {
        let vet_id = guard.id;
        let practice = self.practice_state(&guard.practice_id)?;

        if practice.settings.enforce_availability {
            check_within_availability(guard, &span)?;
        }
        if let Err(e) = check_no_conflict(guard, &span) {
            debug!(%vet_id, start, duration_min, "booking conflict: {e}");
            return Err(e);
        }

        let appointment = Appointment {
            id,
            vet_id,
            practice_id: guard.practice_id,
            start,
            duration_min,
            status: AppointmentStatus::Scheduled,
            metadata,
        };
        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(guard, &event).await?;
        info!(appointment = %id, %vet_id, start, duration_min, channel = appointment.metadata.channel.as_str(), "appointment booked");
        Ok(appointment)
    }

    /// Move an appointment along its status state machine.
    pub async fn update_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let current = guard.appointment(id).ok_or(EngineError::NotFound(id))?;
        if !current.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }
        let vet_id = guard.id;
        let event = Event::AppointmentStatusChanged { id, vet_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(appointment = %id, %vet_id, status = status.as_str(), "appointment status changed");
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn cancel(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.update_status(id, AppointmentStatus::Cancelled).await
    }

    /// Appointments whose practice policy calls for an automatic status
    /// change at `now`. Vets locked by a writer are skipped this round.
    pub fn due_auto_transitions(&self, now: Ms) -> Vec<(Ulid, AppointmentStatus)> {
        let mut due = Vec::new();
        for vet_id in self.store.vet_ids() {
            let Some(vs) = self.store.vet(&vet_id) else { continue };
            let Ok(guard) = vs.try_read() else { continue };
            let Some(practice) = self.store.practice(&guard.practice_id) else {
                continue;
            };
            let policy = practice.settings.auto_transition;
            if !policy.is_enabled() {
                continue;
            }
            for appt in &guard.appointments {
                if let Some(next) = policy.due(appt, now) {
                    due.push((appt.id, next));
                }
            }
        }
        due
    }
}
