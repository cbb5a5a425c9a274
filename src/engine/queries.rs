use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Active blocks whose resolved span overlaps `[from, to)`.
    pub async fn blocks_for_vet_and_range(
        &self,
        vet_id: Ulid,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<AvailabilityBlock>, EngineError> {
        let query = instant_range(from, to)?;
        let vs = self.shared_vet(&vet_id)?;
        let guard = vs.read().await;
        Ok(guard
            .blocks_overlapping(&query)
            .filter(|b| b.active)
            .cloned()
            .collect())
    }

    /// Appointments of any status whose span overlaps `[from, to)`.
    pub async fn appointments_for_vet_and_range(
        &self,
        vet_id: Ulid,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<Appointment>, EngineError> {
        let query = instant_range(from, to)?;
        let vs = self.shared_vet(&vet_id)?;
        let guard = vs.read().await;
        Ok(guard.appointments_overlapping(&query).cloned().collect())
    }

    /// Stored civil rows for one date, as entered. No timezone conversion.
    pub async fn availability_for_vet_and_date(
        &self,
        vet_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityRow>, EngineError> {
        let vs = self.shared_vet(&vet_id)?;
        let guard = vs.read().await;
        let mut rows: Vec<&AvailabilityBlock> = guard
            .blocks
            .iter()
            .filter(|b| b.active && b.date == date)
            .collect();
        rows.sort_by_key(|b| (b.start, b.end));
        Ok(rows.into_iter().map(AvailabilityRow::from).collect())
    }

    pub async fn appointments_for_vet(&self, vet_id: Ulid) -> Result<Vec<Appointment>, EngineError> {
        let vs = self.shared_vet(&vet_id)?;
        let guard = vs.read().await;
        Ok(guard.appointments.clone())
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let vet_id = self
            .store
            .vet_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let vs = self.shared_vet(&vet_id)?;
        let guard = vs.read().await;
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub fn get_practice(&self, id: Ulid) -> Result<PracticeState, EngineError> {
        self.practice_state(&id)
    }

    pub async fn get_vet(&self, id: Ulid) -> Result<VetInfo, EngineError> {
        let vs = self.shared_vet(&id)?;
        let guard = vs.read().await;
        Ok(vet_info(&guard))
    }

    /// Vets of a practice in id order, inactive ones included.
    pub async fn vets_for_practice(&self, practice_id: Ulid) -> Result<Vec<VetInfo>, EngineError> {
        if !self.store.contains_practice(&practice_id) {
            return Err(EngineError::NotFound(practice_id));
        }
        let mut out = Vec::new();
        for vet_id in self.store.vets_for_practice(&practice_id) {
            if let Some(vs) = self.store.vet(&vet_id) {
                out.push(vet_info(&*vs.read().await));
            }
        }
        Ok(out)
    }
}

fn vet_info(vs: &VetState) -> VetInfo {
    VetInfo {
        id: vs.id,
        practice_id: vs.practice_id,
        name: vs.name.clone(),
        active: vs.active,
    }
}

fn instant_range(from: Ms, to: Ms) -> Result<Span, EngineError> {
    if to <= from {
        return Err(EngineError::InvalidRange(format!("[{from}, {to}) is empty")));
    }
    Ok(Span::new(from, to))
}
