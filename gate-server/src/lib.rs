//! Parking gate node - 停车场闸机协调节点
//!
//! # 架构概述
//!
//! - **消息总线** (`message`): 进程内广播 + TCP 桥接
//! - **停车核心** (`parking`): 车位聚合、计费、钱包、会话状态机
//! - **事件路由** (`core::event_router`): 将占用/刷卡事件转换为闸机指令
//! - **存储** (`parking::storage`): 嵌入式 redb
//!
//! # 模块结构
//!
//! ```text
//! gate-server/src/
//! ├── core/          # 配置、状态、事件路由、后台任务
//! ├── message/       # 消息总线与 TCP 传输
//! ├── parking/       # 车位、计费、钱包、会话、存储
//! └── utils/         # 日志、时钟
//! ```

pub mod core;
pub mod message;
pub mod parking;
pub mod utils;

// Re-export 公共类型
pub use core::{AppError, BackgroundTasks, Config, EventRouter, ServerState};
pub use message::{BusMessage, MessageBus};
pub use parking::{ParkingError, ParkingService, SessionManager};

// Re-export logger functions
pub use utils::logger::{cleanup_old_logs, init_logger, init_logger_with_file};

/// 加载 .env 并初始化日志
pub fn setup_environment() -> anyhow::Result<Config> {
    // .env 可选
    let _ = dotenv::dotenv();

    let config = Config::from_env();
    init_logger_with_file(&config.log_level, config.log_json, config.log_dir.as_deref())?;
    config.log_warnings();

    Ok(config)
}

pub fn print_banner() {
    println!(
        r#"
   ______      __
  / ____/___ _/ /____
 / / __/ __ `/ __/ _ \
/ /_/ / /_/ / /_/  __/
\____/\__,_/\__/\___/
    "#
    );
}
