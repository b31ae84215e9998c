use serde::{Deserialize, Serialize};
use std::fmt;

// ==================== Inbound ====================

/// 车位占用上报 (`occupancy/{cameraId}/slot/{slotId}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyPayload {
    pub slot_id: String,
    pub camera_id: String,
    pub occupied: bool,
    /// Detector confidence, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Sensor timestamp (millis)
    pub timestamp: i64,
}

/// 读卡位置
///
/// Readers are not under our control, so anything unrecognised is kept
/// verbatim in [`ScanLocation::Other`] instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScanLocation {
    Entry,
    Exit,
    /// Legacy single-reader installations report `gate` for the entry lane
    Gate,
    Other(String),
}

impl ScanLocation {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
            Self::Gate => "gate",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for ScanLocation {
    fn from(value: String) -> Self {
        match value.as_str() {
            "entry" => Self::Entry,
            "exit" => Self::Exit,
            "gate" => Self::Gate,
            _ => Self::Other(value),
        }
    }
}

impl From<ScanLocation> for String {
    fn from(value: ScanLocation) -> Self {
        match value {
            ScanLocation::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ScanLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 刷卡事件 (`tagscan`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagScanPayload {
    pub tag_id: String,
    pub location: ScanLocation,
    /// Reader timestamp (millis)
    pub timestamp: i64,
}

/// 闸机状态上报 (`gateStatus`)，仅记录，不参与决策
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStatusPayload {
    pub gate_status: String,
    pub timestamp: i64,
}

// ==================== Outbound ====================

/// 闸机动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Open,
    Deny,
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// 闸机指令 (`gateCommand`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateCommandPayload {
    pub action: GateAction,
    pub reason: String,
    pub timestamp: i64,
}

impl GateCommandPayload {
    pub fn open(reason: impl Into<String>, timestamp: i64) -> Self {
        Self {
            action: GateAction::Open,
            reason: reason.into(),
            timestamp,
        }
    }

    pub fn deny(reason: impl Into<String>, timestamp: i64) -> Self {
        Self {
            action: GateAction::Deny,
            reason: reason.into(),
            timestamp,
        }
    }

    pub fn is_open(&self) -> bool {
        self.action == GateAction::Open
    }
}

/// 全局可用性 (`availabilitySummary`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySummaryPayload {
    pub any_available: bool,
    pub free_slots: u32,
    pub total_slots: u32,
    pub timestamp: i64,
}

/// 单车位变化 (`slotChange/{slotId}`)，仅在状态真正变化时发布
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotChangePayload {
    pub slot_id: String,
    pub camera_id: String,
    pub occupied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: i64,
}
