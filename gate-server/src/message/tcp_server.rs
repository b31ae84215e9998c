//! TCP 服务器实现
//!
//! 负责处理 TCP 客户端连接，包括：
//! - 监听连接
//! - 读取客户端帧并投递到服务器收件箱 (满时等待)
//! - 将服务器广播转发给客户端

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use shared::message::{BusMessage, Topic};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::bus::{BusError, MessageBus};
use super::transport::TcpTransport;

impl MessageBus {
    /// Bind the configured address and serve until shutdown
    pub async fn start_tcp_server(&self) -> Result<(), BusError> {
        let listener = TcpListener::bind(&self.config.tcp_listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    ///
    /// 1. Accepts connections
    /// 2. Reads frames from clients and queues them on the server inbox
    /// 3. Forwards server broadcast messages to every connected client
    /// 4. Stops on the shutdown token
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BusError> {
        tracing::info!(
            addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "Message bus TCP server listening"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_token().cancelled() => {
                    tracing::info!("Message bus TCP server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!(%addr, "Client connected");
                            self.spawn_client_handler(stream, addr);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_client_handler(&self, stream: TcpStream, addr: SocketAddr) {
        let ctx = ClientContext {
            server_rx: self.subscribe(),
            bus: self.clone(),
            write_timeout: self.config.write_timeout,
            clients: self.clients.clone(),
        };

        tokio::spawn(async move {
            handle_client_connection(stream, addr, ctx).await;
        });
    }
}

struct ClientContext {
    server_rx: broadcast::Receiver<BusMessage>,
    bus: MessageBus,
    write_timeout: Duration,
    clients: Arc<DashMap<String, Arc<TcpTransport>>>,
}

async fn handle_client_connection(stream: TcpStream, addr: SocketAddr, ctx: ClientContext) {
    let _ = stream.set_nodelay(true);
    let transport = Arc::new(TcpTransport::from_stream(stream));
    let client_id = addr.to_string();

    ctx.clients.insert(client_id.clone(), transport.clone());
    tracing::debug!(client_id = %client_id, "Client registered");

    // 共享的断开检测 token
    let disconnect_token = CancellationToken::new();
    let shutdown_token = ctx.bus.shutdown_token().clone();

    let forward_handle = spawn_server_to_client_forwarder(
        transport.clone(),
        ctx.server_rx,
        shutdown_token.clone(),
        disconnect_token.clone(),
        client_id.clone(),
        ctx.write_timeout,
    );

    read_client_messages(
        &transport,
        &ctx.bus,
        &shutdown_token,
        &disconnect_token,
        &client_id,
    )
    .await;

    disconnect_token.cancel();
    let _ = forward_handle.await;
    let _ = transport.close().await;
    ctx.clients.remove(&client_id);
    tracing::debug!(client_id = %client_id, "Client removed from registry");
}

/// Spawn task to forward messages from server to client
fn spawn_server_to_client_forwarder(
    transport: Arc<TcpTransport>,
    mut rx: broadcast::Receiver<BusMessage>,
    shutdown_token: CancellationToken,
    disconnect_token: CancellationToken,
    client_id: String,
    write_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => break,
                _ = disconnect_token.cancelled() => {
                    tracing::debug!(client_id = %client_id, "Client disconnected, forwarder stopping");
                    break;
                }
                msg_result = rx.recv() => {
                    match msg_result {
                        Ok(msg) => {
                            match tokio::time::timeout(write_timeout, transport.write_message(&msg)).await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    tracing::debug!(client_id = %client_id, error = %e, "Client write failed");
                                    break;
                                }
                                Err(_) => {
                                    tracing::warn!(
                                        client_id = %client_id,
                                        topic = %msg.topic,
                                        "Client write timed out, dropping connection"
                                    );
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(client_id = %client_id, dropped_messages = n, "Client lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        // A dead writer must also stop the reader
        disconnect_token.cancel();
        tracing::debug!(client_id = %client_id, "Client forwarder stopped");
    })
}

/// Read messages from client and forward to server
async fn read_client_messages(
    transport: &Arc<TcpTransport>,
    bus: &MessageBus,
    shutdown_token: &CancellationToken,
    disconnect_token: &CancellationToken,
    client_id: &str,
) {
    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => break,
            _ = disconnect_token.cancelled() => break,

            read_result = transport.read_message() => {
                match read_result {
                    Ok(msg) => {
                        // Clients may not speak for the server
                        if matches!(
                            msg.kind(),
                            Topic::GateCommand | Topic::AvailabilitySummary | Topic::SlotChange { .. }
                        ) {
                            tracing::warn!(client_id = %client_id, topic = %msg.topic, "Blocked server topic from client");
                            continue;
                        }

                        // Waiting here stops reading from this client while the router is behind
                        let msg = msg.with_source(client_id);
                        tokio::select! {
                            _ = shutdown_token.cancelled() => break,
                            sent = bus.forward_to_server(msg) => {
                                if let Err(e) = sent {
                                    tracing::warn!(client_id = %client_id, error = %e, "Server inbox closed");
                                    break;
                                }
                            }
                        }
                    }
                    Err(BusError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        tracing::debug!(client_id = %client_id, "Client closed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(client_id = %client_id, error = %e, "Client read failed");
                        break;
                    }
                }
            }
        }
    }
}
