//! Parking Slot Model

use serde::{Deserialize, Serialize};

fn default_slot_type() -> String {
    "standard".to_string()
}

/// Parking slot as last reported by its camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSlot {
    pub slot_id: String,
    pub camera_id: String,
    pub slot_name: String,
    #[serde(default = "default_slot_type")]
    pub slot_type: String,
    pub is_occupied: bool,
    /// Last occupancy transition
    pub last_transition: i64,
    pub last_occupied_time: Option<i64>,
    pub last_freed_time: Option<i64>,
    pub is_active: bool,
}

impl ParkingSlot {
    /// Slot first seen through an occupancy report
    pub fn discovered(slot_id: &str, camera_id: &str, occupied: bool, at: i64) -> Self {
        Self {
            slot_id: slot_id.to_string(),
            camera_id: camera_id.to_string(),
            slot_name: slot_id.to_string(),
            slot_type: default_slot_type(),
            is_occupied: occupied,
            last_transition: at,
            last_occupied_time: occupied.then_some(at),
            last_freed_time: (!occupied).then_some(at),
            is_active: true,
        }
    }
}

/// Append-only occupancy history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyHistoryEntry {
    pub slot_id: String,
    pub occupied: bool,
    pub timestamp: i64,
    pub session_id: Option<String>,
}
