//! Slot Aggregate - 车位聚合
//!
//! In-memory view of every known slot backed by the `slots` table. Each
//! slot's read-modify-write runs under its dashmap entry lock, and the
//! persisted record is written before the in-memory value changes, so the
//! map never shows a state the store does not have.
//!
//! Repeated reports of the same value are dropped (no history entry, no
//! change event). Reports are compared by value only: a late report with an
//! older timestamp still applies if it differs from the current state.

use super::storage::{ParkingStorage, StorageError, StorageResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::message::AvailabilitySummaryPayload;
use shared::models::{OccupancyHistoryEntry, ParkingSlot};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("Slot is occupied: {0}")]
    Occupied(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Facility-wide availability, derived from the slot map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvailabilitySummary {
    pub free_slots: u32,
    pub total_slots: u32,
    pub any_available: bool,
}

impl AvailabilitySummary {
    pub fn occupied_slots(&self) -> u32 {
        self.total_slots - self.free_slots
    }

    pub fn to_payload(self, timestamp: i64) -> AvailabilitySummaryPayload {
        AvailabilitySummaryPayload {
            any_available: self.any_available,
            free_slots: self.free_slots,
            total_slots: self.total_slots,
            timestamp,
        }
    }
}

/// Result of applying one occupancy report
#[derive(Debug, Clone, PartialEq)]
pub struct SlotTransition {
    pub slot: ParkingSlot,
    /// False when the report repeated the stored value
    pub changed: bool,
    pub summary: AvailabilitySummary,
}

#[derive(Debug)]
pub struct SlotAggregate {
    storage: ParkingStorage,
    slots: DashMap<String, ParkingSlot>,
}

impl SlotAggregate {
    pub fn new(storage: ParkingStorage) -> Self {
        Self {
            storage,
            slots: DashMap::new(),
        }
    }

    /// Load persisted slots into memory, returns how many were loaded
    pub fn warmup(&self) -> StorageResult<usize> {
        let slots = self.storage.list_slots()?;
        let count = slots.len();
        for slot in slots {
            self.slots.insert(slot.slot_id.clone(), slot);
        }
        tracing::info!(slots = count, "Slot aggregate warmed up");
        Ok(count)
    }

    /// Apply a sensor report
    ///
    /// `at` is node time, the same clock claims and releases use. The first
    /// report for an unknown slot registers it.
    pub fn apply_occupancy(
        &self,
        slot_id: &str,
        camera_id: &str,
        occupied: bool,
        at: i64,
    ) -> StorageResult<SlotTransition> {
        let (slot, changed) = match self.slots.entry(slot_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_occupied == occupied {
                    (entry.get().clone(), false)
                } else {
                    let mut next = entry.get().clone();
                    next.camera_id = camera_id.to_string();
                    mark(&mut next, occupied, at);
                    self.persist(&next, None)?;
                    entry.insert(next.clone());
                    (next, true)
                }
            }
            Entry::Vacant(entry) => {
                let slot = ParkingSlot::discovered(slot_id, camera_id, occupied, at);
                self.persist(&slot, None)?;
                entry.insert(slot.clone());
                tracing::info!(slot_id, camera_id, occupied, "New slot registered");
                (slot, true)
            }
        };

        if changed {
            tracing::debug!(slot_id, camera_id, occupied, "Slot state changed");
        }

        Ok(SlotTransition {
            slot,
            changed,
            summary: self.summary(),
        })
    }

    /// Bind a slot to a session at entry
    ///
    /// Fails if the slot is already occupied. An unknown slot is registered
    /// as occupied.
    pub fn try_claim(
        &self,
        slot_id: &str,
        camera_id: &str,
        session_id: &str,
        at: i64,
    ) -> Result<ParkingSlot, SlotError> {
        match self.slots.entry(slot_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_occupied {
                    return Err(SlotError::Occupied(slot_id.to_string()));
                }
                let mut next = entry.get().clone();
                mark(&mut next, true, at);
                self.persist(&next, Some(session_id))?;
                entry.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(entry) => {
                let slot = ParkingSlot::discovered(slot_id, camera_id, true, at);
                self.persist(&slot, Some(session_id))?;
                entry.insert(slot.clone());
                Ok(slot)
            }
        }
    }

    /// Free a slot bound to a session (exit, cancel, failed entry)
    ///
    /// Returns false when the slot was unknown or already free.
    pub fn release(&self, slot_id: &str, session_id: &str, at: i64) -> StorageResult<bool> {
        let Some(mut entry) = self.slots.get_mut(slot_id) else {
            return Ok(false);
        };
        if !entry.is_occupied {
            return Ok(false);
        }
        let mut next = entry.value().clone();
        mark(&mut next, false, at);
        self.persist(&next, Some(session_id))?;
        *entry = next;
        Ok(true)
    }

    fn persist(&self, slot: &ParkingSlot, session_id: Option<&str>) -> StorageResult<()> {
        let txn = self.storage.begin_write()?;
        self.storage.put_slot(&txn, slot)?;
        self.storage.append_slot_history(
            &txn,
            &OccupancyHistoryEntry {
                slot_id: slot.slot_id.clone(),
                occupied: slot.is_occupied,
                timestamp: slot.last_transition,
                session_id: session_id.map(str::to_string),
            },
        )?;
        txn.commit()?;
        Ok(())
    }

    /// Recompute availability over active slots
    pub fn summary(&self) -> AvailabilitySummary {
        let mut total = 0u32;
        let mut free = 0u32;
        for slot in self.slots.iter().filter(|s| s.is_active) {
            total += 1;
            if !slot.is_occupied {
                free += 1;
            }
        }
        AvailabilitySummary {
            free_slots: free,
            total_slots: total,
            any_available: free > 0,
        }
    }

    pub fn get(&self, slot_id: &str) -> Option<ParkingSlot> {
        self.slots.get(slot_id).map(|s| s.value().clone())
    }

    /// All slots sorted by id
    pub fn slots(&self) -> Vec<ParkingSlot> {
        let mut slots: Vec<_> = self.slots.iter().map(|s| s.value().clone()).collect();
        slots.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));
        slots
    }

    /// Distinct camera ids, sorted
    pub fn cameras(&self) -> Vec<String> {
        let mut cameras: Vec<_> = self.slots.iter().map(|s| s.camera_id.clone()).collect();
        cameras.sort();
        cameras.dedup();
        cameras
    }

    pub fn history(&self, slot_id: &str) -> StorageResult<Vec<OccupancyHistoryEntry>> {
        self.storage.slot_history(slot_id)
    }
}

fn mark(slot: &mut ParkingSlot, occupied: bool, at: i64) {
    slot.is_occupied = occupied;
    slot.last_transition = at;
    if occupied {
        slot.last_occupied_time = Some(at);
    } else {
        slot.last_freed_time = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    fn aggregate() -> SlotAggregate {
        SlotAggregate::new(ParkingStorage::open_in_memory().unwrap())
    }

    #[test]
    fn test_first_report_registers_slot() {
        let slots = aggregate();
        let t = slots.apply_occupancy("A1", "CAM_01", false, 1).unwrap();
        assert!(t.changed);
        assert_eq!(
            t.summary,
            AvailabilitySummary {
                free_slots: 1,
                total_slots: 1,
                any_available: true
            }
        );
        assert_eq!(slots.history("A1").unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_report_is_dropped() {
        let slots = aggregate();
        slots.apply_occupancy("A1", "CAM_01", true, 1).unwrap();
        let t = slots.apply_occupancy("A1", "CAM_01", true, 2).unwrap();
        assert!(!t.changed);
        assert_eq!(t.slot.last_transition, 1);
        assert_eq!(slots.history("A1").unwrap().len(), 1);

        let t = slots.apply_occupancy("A1", "CAM_01", false, 3).unwrap();
        assert!(t.changed);
        assert_eq!(t.slot.last_freed_time, Some(3));
        assert_eq!(slots.history("A1").unwrap().len(), 2);
    }

    #[test]
    fn test_all_occupied() {
        let slots = aggregate();
        slots.apply_occupancy("A1", "CAM_01", true, 1).unwrap();
        let t = slots.apply_occupancy("A2", "CAM_02", true, 1).unwrap();
        assert_eq!(t.summary.free_slots, 0);
        assert!(!t.summary.any_available);
        assert_eq!(t.summary.occupied_slots(), 2);
        assert_eq!(slots.cameras(), vec!["CAM_01", "CAM_02"]);
    }

    #[test]
    fn test_claim_and_release() {
        let slots = aggregate();
        slots.apply_occupancy("A1", "CAM_01", false, 1).unwrap();

        slots.try_claim("A1", "GATE", "S1", 2).unwrap();
        assert!(matches!(
            slots.try_claim("A1", "GATE", "S2", 3),
            Err(SlotError::Occupied(_))
        ));

        assert!(slots.release("A1", "S1", 4).unwrap());
        assert!(!slots.release("A1", "S1", 5).unwrap());
        assert!(!slots.release("Z9", "S1", 5).unwrap());

        let history = slots.history("A1").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].session_id.as_deref(), Some("S1"));
    }

    #[test]
    fn test_claim_unknown_slot_registers_it_occupied() {
        let slots = aggregate();
        let slot = slots.try_claim("B1", "GATE", "S1", 1).unwrap();
        assert!(slot.is_occupied);
        assert_eq!(slots.summary().total_slots, 1);
        assert_eq!(slots.summary().free_slots, 0);
    }

    #[test]
    fn test_warmup_restores_state() {
        let storage = ParkingStorage::open_in_memory().unwrap();
        {
            let slots = SlotAggregate::new(storage.clone());
            slots.apply_occupancy("A1", "CAM_01", true, 1).unwrap();
            slots.apply_occupancy("A2", "CAM_01", false, 1).unwrap();
        }

        let slots = SlotAggregate::new(storage);
        assert_eq!(slots.warmup().unwrap(), 2);
        assert_eq!(slots.summary().free_slots, 1);

        // restored value still dedups
        let t = slots.apply_occupancy("A1", "CAM_01", true, 2).unwrap();
        assert!(!t.changed);
    }

    #[test]
    fn test_summary_matches_random_sequences() {
        let mut rng = StdRng::seed_from_u64(7);
        let slots = aggregate();
        let mut model: HashMap<String, bool> = HashMap::new();

        for ts in 0..500 {
            let slot_id = format!("S{}", rng.gen_range(0..8));
            let occupied = rng.gen_bool(0.5);
            let t = slots.apply_occupancy(&slot_id, "CAM", occupied, ts).unwrap();

            let previous = model.insert(slot_id, occupied);
            assert_eq!(t.changed, previous != Some(occupied));

            let free = model.values().filter(|o| !**o).count() as u32;
            assert_eq!(t.summary.free_slots, free);
            assert_eq!(t.summary.total_slots, model.len() as u32);
            assert_eq!(t.summary.any_available, free > 0);
        }
    }

    #[test]
    fn test_concurrent_reports_for_one_slot() {
        let slots = aggregate();
        slots.apply_occupancy("A1", "CAM_01", false, 0).unwrap();

        let changes: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let slots = &slots;
                    s.spawn(move || slots.apply_occupancy("A1", "CAM_01", true, i).unwrap().changed)
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });

        assert_eq!(changes, 1);
        assert_eq!(slots.history("A1").unwrap().len(), 2);
    }
}
