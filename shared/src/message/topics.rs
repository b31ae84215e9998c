//! Topic names and matching
//!
//! Topics are `/`-separated strings. Subscription filters follow the usual
//! pub/sub conventions: `+` matches exactly one level, a trailing `#`
//! matches the remaining levels (including none).

/// Occupancy reports, one topic per slot: `occupancy/{cameraId}/slot/{slotId}`
pub const OCCUPANCY_FILTER: &str = "occupancy/+/slot/+";
/// Tag (RFID) scans from entry/exit readers
pub const TAG_SCAN: &str = "tagscan";
/// Open/deny commands for the gate actuator
pub const GATE_COMMAND: &str = "gateCommand";
/// Facility-wide availability, republished after every occupancy report
pub const AVAILABILITY_SUMMARY: &str = "availabilitySummary";
/// Per-slot change events: `slotChange/{slotId}`
pub const SLOT_CHANGE_FILTER: &str = "slotChange/+";
/// Status reports from the gate controller (informational)
pub const GATE_STATUS: &str = "gateStatus";

const OCCUPANCY_ROOT: &str = "occupancy";
const SLOT_CHANGE_ROOT: &str = "slotChange";

/// Build an occupancy topic
pub fn occupancy(camera_id: &str, slot_id: &str) -> String {
    format!("{}/{}/slot/{}", OCCUPANCY_ROOT, camera_id, slot_id)
}

/// Build a slot change topic
pub fn slot_change(slot_id: &str) -> String {
    format!("{}/{}", SLOT_CHANGE_ROOT, slot_id)
}

/// Check a topic against a subscription filter
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Classified topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Occupancy { camera_id: String, slot_id: String },
    TagScan,
    GateCommand,
    GateStatus,
    AvailabilitySummary,
    SlotChange { slot_id: String },
    Unknown,
}

impl Topic {
    pub fn parse(topic: &str) -> Self {
        match topic {
            TAG_SCAN => return Topic::TagScan,
            GATE_COMMAND => return Topic::GateCommand,
            GATE_STATUS => return Topic::GateStatus,
            AVAILABILITY_SUMMARY => return Topic::AvailabilitySummary,
            _ => {}
        }

        let levels: Vec<&str> = topic.split('/').collect();
        match levels.as_slice() {
            [OCCUPANCY_ROOT, camera, "slot", slot] if !camera.is_empty() && !slot.is_empty() => {
                Topic::Occupancy {
                    camera_id: (*camera).to_string(),
                    slot_id: (*slot).to_string(),
                }
            }
            [SLOT_CHANGE_ROOT, slot] if !slot.is_empty() => Topic::SlotChange {
                slot_id: (*slot).to_string(),
            },
            _ => Topic::Unknown,
        }
    }
}
