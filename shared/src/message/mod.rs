//! 消息总线消息类型定义
//!
//! 这些类型在 gate-server 和传感器/闸机客户端之间共享，用于
//! 进程内（内存）和网络（TCP）通信。
//!
//! Every message is addressed by a topic string (`occupancy/CAM_01/slot/A1`,
//! `tagscan`, ...). Delivery is at-least-once: consumers must tolerate
//! duplicates and reordering.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod payload;
pub mod topics;

pub use payload::*;
pub use topics::Topic;

/// 消息总线消息体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// 用于消息追踪
    pub request_id: Uuid,
    /// Topic the message was published on
    pub topic: String,
    /// Publisher identity (client id for TCP peers, `None` for in-process)
    pub source: Option<String>,
    /// JSON-encoded payload
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            topic: topic.into(),
            source: None,
            payload,
        }
    }

    /// 序列化载荷并创建消息
    pub fn json<T: Serialize>(topic: impl Into<String>, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(topic, serde_json::to_vec(data)?))
    }

    /// 设置来源
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// 解析载荷为指定类型
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Classify the topic string
    pub fn kind(&self) -> Topic {
        Topic::parse(&self.topic)
    }

    /// 创建闸机指令消息
    pub fn gate_command(payload: &GateCommandPayload) -> Result<Self, serde_json::Error> {
        Self::json(topics::GATE_COMMAND, payload)
    }

    /// 创建全局车位可用性消息
    pub fn availability(payload: &AvailabilitySummaryPayload) -> Result<Self, serde_json::Error> {
        Self::json(topics::AVAILABILITY_SUMMARY, payload)
    }

    /// 创建车位变化消息
    pub fn slot_change(payload: &SlotChangePayload) -> Result<Self, serde_json::Error> {
        Self::json(topics::slot_change(&payload.slot_id), payload)
    }

    /// 创建车位占用上报消息 (传感器侧)
    pub fn occupancy(payload: &OccupancyPayload) -> Result<Self, serde_json::Error> {
        Self::json(topics::occupancy(&payload.camera_id, &payload.slot_id), payload)
    }

    /// 创建刷卡消息 (读卡器侧)
    pub fn tag_scan(payload: &TagScanPayload) -> Result<Self, serde_json::Error> {
        Self::json(topics::TAG_SCAN, payload)
    }
}
