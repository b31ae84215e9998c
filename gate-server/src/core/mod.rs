//! 核心模块 - 配置、状态、事件路由和后台任务
//!
//! # 模块结构
//!
//! - [`Config`] - 节点配置
//! - [`ServerState`] - 节点状态
//! - [`EventRouter`] - 事件路由（闸机决策）
//! - [`BackgroundTasks`] - 后台任务管理
//! - [`AppError`] - 启动期错误

pub mod config;
pub mod error;
pub mod event_router;
pub mod state;
pub mod tasks;

pub use config::Config;
pub use error::{AppError, Result};
pub use event_router::EventRouter;
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskKind};
