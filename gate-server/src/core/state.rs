use std::path::PathBuf;
use std::sync::Arc;

use crate::core::event_router::EventRouter;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::core::{Config, Result};
use crate::message::{MessageBus, TransportConfig};
use crate::parking::{LocalParkingService, ParkingResult, ParkingStorage, SessionManager, SlotAggregate};
use crate::utils::{Clock, SystemClock};
use shared::response::SystemStatus;

/// 网关节点状态
///
/// 持有所有长期存活的组件，可廉价克隆 (Arc 共享)。
///
/// | 字段 | 说明 |
/// |------|------|
/// | storage | redb 记录存储 |
/// | manager | 会话状态机 + 钱包 |
/// | service | 路由使用的请求/响应接口 |
/// | bus | 消息总线 |
/// | router | 事件路由 |
#[derive(Debug, Clone)]
pub struct ServerState {
    pub config: Config,
    pub storage: ParkingStorage,
    pub manager: Arc<SessionManager>,
    pub service: LocalParkingService,
    pub bus: MessageBus,
    pub router: Arc<EventRouter>,
}

impl ServerState {
    /// 初始化服务器状态
    ///
    /// 按顺序初始化：
    /// 1. 工作目录
    /// 2. 数据库 (work_dir/parking.redb)
    /// 3. 车位聚合预热
    /// 4. 会话管理、服务、消息总线、事件路由
    pub fn initialize(config: &Config) -> Result<Self> {
        Self::initialize_with_clock(config, Arc::new(SystemClock))
    }

    pub fn initialize_with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(&config.work_dir)?;

        let storage = ParkingStorage::open(config.database_path())?;

        let slots = Arc::new(SlotAggregate::new(storage.clone()));
        slots.warmup()?;

        let manager = Arc::new(SessionManager::new(
            storage.clone(),
            slots,
            config.tariff.clone(),
            clock.clone(),
        ));
        let service = LocalParkingService::new(manager.clone(), config.request_timeout());

        let bus = MessageBus::from_config(TransportConfig {
            tcp_listen_addr: config.message_tcp_addr.clone(),
            channel_capacity: config.bus_channel_capacity,
            write_timeout: config.request_timeout(),
        });

        let router = Arc::new(EventRouter::new(
            Arc::new(service.clone()),
            bus.clone(),
            clock,
            config.gate_camera_id.clone(),
            config.dedup_window,
        ));

        Ok(Self {
            config: config.clone(),
            storage,
            manager,
            service,
            bus,
            router,
        })
    }

    /// 启动后台任务
    ///
    /// - 事件路由 (Listener)
    /// - TCP 桥接 (Worker)，`with_tcp` 为 false 时不启动
    /// - 可用性定时发布 (Periodic)
    /// - 日志清理 (Periodic，仅在配置了 LOG_DIR 时)
    ///
    /// 任务共享消息总线的 shutdown token。
    pub fn start_background_tasks(&self, with_tcp: bool) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::with_token(self.bus.shutdown_token().clone());

        match self.bus.take_inbox() {
            Some(inbox) => {
                let router = self.router.clone();
                let token = tasks.shutdown_token();
                tasks.spawn("event_router", TaskKind::Listener, async move {
                    router.run(inbox, token).await;
                });
            }
            None => tracing::error!("Server inbox already taken, event router not started"),
        }

        if with_tcp {
            let bus = self.bus.clone();
            tasks.spawn("tcp_bridge", TaskKind::Worker, async move {
                if let Err(e) = bus.start_tcp_server().await {
                    tracing::error!(error = %e, "TCP bridge failed");
                }
            });
        }

        if let Some(period) = self.config.availability_refresh() {
            let router = self.router.clone();
            let token = tasks.shutdown_token();
            tasks.spawn("availability_refresh", TaskKind::Periodic, async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            if let Err(e) = router.publish_availability() {
                                tracing::warn!(error = %e, "Availability refresh failed");
                            }
                        }
                    }
                }
            });
        }

        if let Some(dir) = &self.config.log_dir {
            let dir = PathBuf::from(dir);
            let token = tasks.shutdown_token();
            tasks.spawn("log_cleanup", TaskKind::Periodic, async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = crate::utils::logger::periodic_cleanup(dir) => {}
                }
            });
        }

        tasks.log_summary();
        tasks
    }

    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.work_dir)
    }

    pub fn message_bus(&self) -> &MessageBus {
        &self.bus
    }

    pub async fn system_status(&self) -> ParkingResult<SystemStatus> {
        self.service.system_status(self.router.gate_status()).await
    }
}
