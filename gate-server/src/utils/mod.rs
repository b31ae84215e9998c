//! 工具模块 - 日志与时钟

pub mod clock;
pub mod logger;

pub use clock::{Clock, ManualClock, SystemClock};
