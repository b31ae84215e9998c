//! 消息总线模块
//!
//! - **bus**: 进程内广播总线 ([`MessageBus`])
//! - **transport**: TCP 帧编解码 ([`TcpTransport`])
//! - **tcp_server**: 网络客户端（传感器、读卡器、闸机）接入
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          MessageBus          │
//! │  inbox     ──▶ EventRouter   │
//! │  server_tx ◀── EventRouter   │
//! └──────────────┬───────────────┘
//!                │ tcp_server
//!        ┌───────┴────────┐
//!        ▼                ▼
//!   camera / reader     gate
//! ```

pub mod bus;
pub mod tcp_server;
pub mod transport;

pub use bus::{BusError, ConnectedClient, MessageBus, TopicSubscription, TransportConfig};
pub use shared::message::{BusMessage, Topic, topics};
pub use transport::{MAX_PAYLOAD_LEN, TcpTransport};
