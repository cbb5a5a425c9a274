use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedVetState;

/// Registry of practices and vets plus the per-vet calendars.
///
/// Practices are small and read-mostly, so they live by value in the map.
/// Each vet's blocks and appointments sit behind their own `RwLock`; that
/// lock is what serializes bookings for one vet.
pub struct InMemoryStore {
    practices: DashMap<Ulid, PracticeState>,
    vets: DashMap<Ulid, SharedVetState>,
    practice_vets: DashMap<Ulid, Vec<Ulid>>,
    /// Reverse lookup: block/appointment id → vet id
    entity_to_vet: DashMap<Ulid, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            practices: DashMap::new(),
            vets: DashMap::new(),
            practice_vets: DashMap::new(),
            entity_to_vet: DashMap::new(),
        }
    }

    // ── Practices ────────────────────────────────────────────

    pub fn practice_count(&self) -> usize {
        self.practices.len()
    }

    pub fn contains_practice(&self, id: &Ulid) -> bool {
        self.practices.contains_key(id)
    }

    pub fn practice(&self, id: &Ulid) -> Option<PracticeState> {
        self.practices.get(id).map(|e| e.value().clone())
    }

    pub fn practice_ids(&self) -> Vec<Ulid> {
        self.practices.iter().map(|e| *e.key()).collect()
    }

    // ── Vets ─────────────────────────────────────────────────

    pub fn vet_count(&self) -> usize {
        self.vets.len()
    }

    pub fn contains_vet(&self, id: &Ulid) -> bool {
        self.vets.contains_key(id)
    }

    pub fn vet(&self, id: &Ulid) -> Option<SharedVetState> {
        self.vets.get(id).map(|e| e.value().clone())
    }

    pub fn vet_ids(&self) -> Vec<Ulid> {
        self.vets.iter().map(|e| *e.key()).collect()
    }

    /// Vets registered under a practice, in id (= creation) order.
    pub fn vets_for_practice(&self, practice_id: &Ulid) -> Vec<Ulid> {
        let mut ids = self
            .practice_vets
            .get(practice_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn vet_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_vet.get(entity_id).map(|e| *e.value())
    }

    pub fn contains_entity(&self, entity_id: &Ulid) -> bool {
        self.entity_to_vet.contains_key(entity_id)
    }

    /// Claim `entity_id` for `vet_id`. False if any vet already holds it.
    pub fn reserve_entity(&self, entity_id: Ulid, vet_id: Ulid) -> bool {
        match self.entity_to_vet.entry(entity_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(vet_id);
                true
            }
        }
    }

    /// Undo a [`reserve_entity`](Self::reserve_entity) whose write never happened.
    pub fn release_entity(&self, entity_id: &Ulid) {
        self.entity_to_vet.remove(entity_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a registry event (practices, vet creation). Vet-level events are
    /// ignored here; they go through [`apply_to_vet`](Self::apply_to_vet)
    /// under the vet's write lock.
    pub fn apply_registry(&self, event: &Event) {
        match event {
            Event::PracticeRegistered { id, name, settings }
            | Event::PracticeUpdated { id, name, settings } => {
                self.practices.insert(
                    *id,
                    PracticeState {
                        id: *id,
                        name: name.clone(),
                        settings: settings.clone(),
                    },
                );
            }
            Event::VetRegistered { id, practice_id, name } => {
                let vs = VetState::new(*id, *practice_id, name.clone());
                self.vets.insert(*id, Arc::new(RwLock::new(vs)));
                let mut kids = self.practice_vets.entry(*practice_id).or_default();
                if !kids.contains(id) {
                    kids.push(*id);
                }
            }
            _ => {}
        }
    }

    /// Apply a vet-level event. Caller holds the vet's write lock.
    pub fn apply_to_vet(&self, vs: &mut VetState, event: &Event) {
        match event {
            Event::VetDeactivated { .. } => {
                vs.active = false;
            }
            Event::BlocksAdded { blocks, .. } => {
                for block in blocks {
                    vs.insert_block(block.clone());
                    self.entity_to_vet.insert(block.id, block.vet_id);
                }
            }
            Event::BlockDeactivated { id, .. } => {
                if let Some(block) = vs.block_mut(*id) {
                    block.active = false;
                }
            }
            Event::AppointmentBooked { appointment } => {
                vs.insert_appointment(appointment.clone());
                self.entity_to_vet.insert(appointment.id, appointment.vet_id);
            }
            Event::AppointmentStatusChanged { id, status, .. } => {
                if let Some(appt) = vs.appointment_mut(*id) {
                    appt.status = *status;
                }
            }
            Event::PracticeRegistered { .. }
            | Event::PracticeUpdated { .. }
            | Event::VetRegistered { .. } => {}
        }
    }
}

/// The vet a vet-level event belongs to; `None` for registry events.
pub fn event_vet_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::VetDeactivated { id } => Some(*id),
        Event::BlocksAdded { vet_id, .. }
        | Event::BlockDeactivated { vet_id, .. }
        | Event::AppointmentStatusChanged { vet_id, .. } => Some(*vet_id),
        Event::AppointmentBooked { appointment } => Some(appointment.vet_id),
        Event::PracticeRegistered { .. }
        | Event::PracticeUpdated { .. }
        | Event::VetRegistered { .. } => None,
    }
}
