//! 消息总线核心实现
//!
//! # 消息流
//!
//! ```text
//! Sensor/Reader ──▶ send_to_server() ──┬──▶ inbox (mpsc) ──▶ EventRouter
//!                                      └──▶ client_tx (observers)   │
//!                                                                   │
//! EventRouter ───▶ publish() ─────────▶ server_tx ◀────────────────┘
//!                                          │
//!                               ┌──────────┴──────────┐
//!                               ▼                     ▼
//!                      TCP clients (gate)    in-process subscribers
//! ```
//!
//! The router's inbox is a bounded `mpsc`: a full inbox pushes back on the
//! sender instead of dropping events, and arrival order is kept across
//! topics. `client_tx` and `server_tx` are `tokio::sync::broadcast`: every
//! subscriber sees every message, slow subscribers lose the oldest messages
//! (logged as lag).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use shared::message::{BusMessage, topics};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::transport::TcpTransport;

/// 消息总线错误
#[derive(Debug, Error)]
pub enum BusError {
    #[error("No subscribers for topic {0}")]
    NoSubscribers(String),

    #[error("Bus closed")]
    Closed,

    #[error("Server inbox full")]
    InboxFull,

    #[error("Invalid frame: {0}")]
    Frame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Configuration for transport layer
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tcp_listen_addr: String,
    /// Capacity of each broadcast channel and of the router inbox
    pub channel_capacity: usize,
    /// Upper bound for one frame write to a TCP client
    pub write_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tcp_listen_addr: "0.0.0.0:1883".to_string(),
            channel_capacity: 1024,
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// 已连接的 TCP 客户端
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub id: String,
    pub addr: Option<String>,
}

/// 消息总线 - 负责消息路由和转发
#[derive(Debug, Clone)]
pub struct MessageBus {
    /// 客户端（传感器、读卡器）到服务器的无损通道，由事件路由独占消费
    inbox_tx: mpsc::Sender<BusMessage>,
    inbox_rx: Arc<Mutex<Option<mpsc::Receiver<BusMessage>>>>,
    /// 客户端消息的旁路广播（监控/调试用，可丢失）
    client_tx: broadcast::Sender<BusMessage>,
    /// 服务器到客户端（闸机、看板）的广播通道
    server_tx: broadcast::Sender<BusMessage>,
    pub(crate) config: TransportConfig,
    shutdown_token: CancellationToken,
    /// 已连接的客户端 (Client ID -> Transport)
    pub(crate) clients: Arc<DashMap<String, Arc<TcpTransport>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::from_config(TransportConfig::default())
    }

    pub fn from_config(config: TransportConfig) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (inbox_tx, inbox_rx) = mpsc::channel(capacity);
        let (client_tx, _) = broadcast::channel(capacity);
        let (server_tx, _) = broadcast::channel(capacity);
        Self {
            inbox_tx,
            inbox_rx: Arc::new(Mutex::new(Some(inbox_rx))),
            client_tx,
            server_tx,
            config,
            shutdown_token: CancellationToken::new(),
            clients: Arc::new(DashMap::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_config(TransportConfig {
            channel_capacity: capacity,
            ..Default::default()
        })
    }

    /// 发布消息 (服务器 -> 所有订阅者)
    ///
    /// Fails only when nobody is subscribed, which for `gateCommand` means
    /// no actuator is listening.
    pub fn publish(&self, msg: BusMessage) -> Result<usize, BusError> {
        let topic = msg.topic.clone();
        self.server_tx
            .send(msg)
            .map_err(|_| BusError::NoSubscribers(topic))
    }

    /// 发送消息到服务器 (客户端 -> 服务器)，不等待
    ///
    /// Fails with [`BusError::InboxFull`] when the router is behind; the
    /// message is not enqueued and the caller decides whether to retry.
    pub fn send_to_server(&self, msg: BusMessage) -> Result<(), BusError> {
        self.inbox_tx.try_send(msg.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BusError::InboxFull,
            mpsc::error::TrySendError::Closed(_) => BusError::Closed,
        })?;
        self.mirror(msg);
        Ok(())
    }

    /// 发送消息到服务器，收件箱满时等待
    pub async fn forward_to_server(&self, msg: BusMessage) -> Result<(), BusError> {
        self.inbox_tx
            .send(msg.clone())
            .await
            .map_err(|_| BusError::Closed)?;
        self.mirror(msg);
        Ok(())
    }

    fn mirror(&self, msg: BusMessage) {
        // 没有观察者是正常情况
        let _ = self.client_tx.send(msg);
    }

    /// 取走服务器收件箱 (事件路由专用)，只能取一次
    pub fn take_inbox(&self) -> Option<mpsc::Receiver<BusMessage>> {
        self.inbox_rx.lock().take()
    }

    /// 旁路订阅客户端消息，落后时丢弃旧消息
    pub fn subscribe_to_clients(&self) -> broadcast::Receiver<BusMessage> {
        self.client_tx.subscribe()
    }

    /// 订阅服务器广播
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.server_tx.subscribe()
    }

    /// 按 topic 过滤订阅服务器广播 (`+` / `#` 通配)
    pub fn subscribe_filtered(&self, filter: impl Into<String>) -> TopicSubscription {
        TopicSubscription {
            filter: filter.into(),
            rx: self.server_tx.subscribe(),
        }
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    pub fn get_connected_clients(&self) -> Vec<ConnectedClient> {
        self.clients
            .iter()
            .map(|entry| ConnectedClient {
                id: entry.key().clone(),
                addr: entry.value().peer_addr(),
            })
            .collect()
    }

    /// 优雅关闭消息总线（包括 TCP 服务器）
    pub fn shutdown(&self) {
        tracing::info!("Shutting down message bus");
        self.shutdown_token.cancel();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Server broadcast receiver that only yields matching topics
#[derive(Debug)]
pub struct TopicSubscription {
    filter: String,
    rx: broadcast::Receiver<BusMessage>,
}

impl TopicSubscription {
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Next matching message; lag is logged and skipped
    pub async fn recv(&mut self) -> Result<BusMessage, BusError> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if topics::matches(&self.filter, &msg.topic) => return Ok(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(filter = %self.filter, skipped = n, "Subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::message::{GateCommandPayload, SlotChangePayload};

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let bus = MessageBus::new();
        let msg = BusMessage::gate_command(&GateCommandPayload::deny("System error", 1)).unwrap();
        assert!(matches!(bus.publish(msg), Err(BusError::NoSubscribers(_))));
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe_filtered(topics::SLOT_CHANGE_FILTER);

        bus.publish(BusMessage::gate_command(&GateCommandPayload::open("ok", 1)).unwrap())
            .unwrap();
        bus.publish(
            BusMessage::slot_change(&SlotChangePayload {
                slot_id: "A1".into(),
                camera_id: "CAM_01".into(),
                occupied: true,
                session_id: None,
                timestamp: 2,
            })
            .unwrap(),
        )
        .unwrap();

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.topic, "slotChange/A1");
    }

    #[tokio::test]
    async fn test_client_and_server_channels_are_separate() {
        let bus = MessageBus::new();
        let mut server_rx = bus.subscribe();
        let mut client_rx = bus.subscribe_to_clients();
        let mut inbox = bus.take_inbox().unwrap();

        bus.send_to_server(BusMessage::new(topics::TAG_SCAN, b"{}".to_vec()))
            .unwrap();
        assert_eq!(inbox.recv().await.unwrap().topic, "tagscan");
        assert_eq!(client_rx.recv().await.unwrap().topic, "tagscan");
        assert!(server_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inbox_is_taken_once() {
        let bus = MessageBus::new();
        assert!(bus.take_inbox().is_some());
        assert!(bus.clone().take_inbox().is_none());
    }

    #[tokio::test]
    async fn test_full_inbox_pushes_back_instead_of_dropping() {
        let bus = MessageBus::with_capacity(2);
        let mut inbox = bus.take_inbox().unwrap();
        let scan = |n: u8| BusMessage::new(topics::TAG_SCAN, vec![n]);

        bus.send_to_server(scan(1)).unwrap();
        bus.send_to_server(scan(2)).unwrap();
        assert!(matches!(bus.send_to_server(scan(3)), Err(BusError::InboxFull)));

        // The async path waits for room
        let sender = bus.clone();
        let pending = tokio::spawn(async move { sender.forward_to_server(scan(4)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(inbox.recv().await.unwrap().payload[0]);
        }
        pending.await.unwrap().unwrap();
        assert_eq!(seen, vec![1, 2, 4]);
    }
}
