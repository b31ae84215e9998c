use crate::message::BusError;
use crate::parking::StorageError;
use thiserror::Error;

/// 启动与运行期的系统错误
#[derive(Error, Debug)]
pub enum AppError {
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("消息总线错误: {0}")]
    Bus(#[from] BusError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
