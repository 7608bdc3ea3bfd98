//! 驱动层错误类型定义

use jaw_io::BusError;
use jaw_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串口总线错误（超时、IO、帧错误）
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// 请求无法编码（例如值超出寄存器宽度）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 舵机在状态包中报告错误
    #[error("Servo reported error 0x{code:02X} on {context}")]
    Hardware { code: u8, context: &'static str },

    /// 舵机无法配置（启动时为致命错误）
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DriverError {
    /// 舵机返回的错误字节（状态包 error 字段）
    pub fn hardware_code(&self) -> Option<u8> {
        match self {
            DriverError::Hardware { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 串口句柄是否已不可用
    pub fn is_connection_lost(&self) -> bool {
        match self {
            DriverError::Bus(e) => e.is_connection_lost(),
            _ => false,
        }
    }
}
