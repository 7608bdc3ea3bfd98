//! 桥接层错误类型定义

use jaw_driver::DriverError;
use jaw_io::PlcError;
use thiserror::Error;

/// 控制器链路错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// 单次读写失败，下一周期重试
    #[error("Transient link error: {0}")]
    Transient(String),

    /// 连接已不可用，需要断开重连
    #[error("Link disconnected: {0}")]
    Disconnected(String),
}

impl LinkError {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, LinkError::Disconnected(_))
    }
}

impl From<PlcError> for LinkError {
    fn from(err: PlcError) -> Self {
        if err.is_connection_lost() {
            LinkError::Disconnected(err.to_string())
        } else {
            LinkError::Transient(err.to_string())
        }
    }
}

/// 桥接层错误
#[derive(Error, Debug)]
pub enum BridgeError {
    /// 配置无效或无法读取
    #[error("Configuration error: {0}")]
    Config(String),

    /// 舵机错误（启动时为致命错误）
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// 收到终止信号
    #[error("Cancelled")]
    Cancelled,

    /// 重试次数耗尽
    #[error("{what}: gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        what: String,
        attempts: u32,
        last_error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_plc_error_classification() {
        let lost: LinkError = PlcError::Io(io::Error::from(io::ErrorKind::ConnectionReset)).into();
        assert!(lost.is_disconnected());

        let transient: LinkError = PlcError::Timeout.into();
        assert!(!transient.is_disconnected());
    }

    #[test]
    fn test_exhausted_display() {
        let err = BridgeError::Exhausted {
            what: "PLC connect".into(),
            attempts: 3,
            last_error: "refused".into(),
        };
        assert_eq!(err.to_string(), "PLC connect: gave up after 3 attempts: refused");
    }
}
