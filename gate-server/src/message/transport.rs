//! TCP 传输层实现
//!
//! # 帧格式
//!
//! ```text
//! ┌──────────────┬─────────┬────────────────┬─────────┐
//! │ topic_len u16│ topic   │ payload_len u32│ payload │
//! │ (LE)         │ (UTF-8) │ (LE)           │ (JSON)  │
//! └──────────────┴─────────┴────────────────┴─────────┘
//! ```

use std::sync::Arc;

use shared::message::BusMessage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use super::bus::BusError;

/// 单帧载荷上限 (1 MiB)
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<BusMessage, BusError> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf).await?;
    let topic_len = u16::from_le_bytes(len_buf) as usize;
    if topic_len == 0 {
        return Err(BusError::Frame("empty topic".into()));
    }

    let mut topic = vec![0u8; topic_len];
    reader.read_exact(&mut topic).await?;
    let topic = String::from_utf8(topic).map_err(|_| BusError::Frame("topic is not UTF-8".into()))?;

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let payload_len = u32::from_le_bytes(len_buf) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(BusError::Frame(format!(
            "payload of {} bytes exceeds {}",
            payload_len, MAX_PAYLOAD_LEN
        )));
    }

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    Ok(BusMessage::new(topic, payload))
}

pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &BusMessage,
) -> Result<(), BusError> {
    let topic = msg.topic.as_bytes();
    let topic_len = u16::try_from(topic.len())
        .map_err(|_| BusError::Frame(format!("topic of {} bytes is too long", topic.len())))?;
    if msg.payload.len() > MAX_PAYLOAD_LEN {
        return Err(BusError::Frame(format!(
            "payload of {} bytes exceeds {}",
            msg.payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }

    let mut data = Vec::with_capacity(2 + topic.len() + 4 + msg.payload.len());
    data.extend_from_slice(&topic_len.to_le_bytes());
    data.extend_from_slice(topic);
    data.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&msg.payload);

    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// TCP 传输实现
#[derive(Debug, Clone)]
pub struct TcpTransport {
    reader: Arc<Mutex<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    addr: Option<String>,
}

impl TcpTransport {
    /// 连接到指定地址
    pub async fn connect(addr: &str) -> Result<Self, BusError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    /// 从已有的 TcpStream 创建
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (reader, writer) = stream.into_split();
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            addr: peer_addr,
        }
    }

    pub async fn read_message(&self) -> Result<BusMessage, BusError> {
        let mut reader = self.reader.lock().await;
        read_frame(&mut *reader).await
    }

    pub async fn write_message(&self, msg: &BusMessage) -> Result<(), BusError> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, msg).await
    }

    pub async fn close(&self) -> Result<(), BusError> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    pub fn peer_addr(&self) -> Option<String> {
        self.addr.clone()
    }
}
