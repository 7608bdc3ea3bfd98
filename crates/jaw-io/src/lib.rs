//! # Jaw IO Layer
//!
//! 阻塞式 I/O 适配层。所有调用都受超时约束，不做内部重试。
//!
//! - `serial`: Dynamixel 串口总线（`ServoBus`）
//! - `s7`: S7 ISO-on-TCP 数据块客户端（`DataBlockClient`）
//! - `udp`: 单字节 UDP 指令接收

use jaw_protocol::ProtocolError;
use jaw_protocol::dxl::StatusPacket;
use std::io;
use thiserror::Error;

pub mod s7;
pub mod serial;
pub mod udp;

pub use s7::S7Client;
pub use serial::SerialServoBus;
pub use udp::UdpByteSocket;

/// 判断 IO 错误是否意味着连接/句柄已不可用
///
/// 超时与 `WouldBlock` 属于瞬时错误；复位、断开、EOF 以及
/// USB 串口拔出时内核返回的 EIO/ENXIO/ENODEV 属于连接丢失。
pub fn io_error_is_lost(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => false,
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied => true,
        _ => matches!(err.raw_os_error(), Some(5) | Some(6) | Some(19)),
    }
}

// ============================================================================
// 串口总线
// ============================================================================

/// 串口总线错误
#[derive(Error, Debug)]
pub enum BusError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("Transaction timeout")]
    Timeout,
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Serial port disconnected")]
    Disconnected,
    #[error("Serial port not open")]
    NotOpen,
}

impl BusError {
    /// 是否为连接丢失（需要重新打开串口）
    pub fn is_connection_lost(&self) -> bool {
        match self {
            BusError::Io(e) => io_error_is_lost(e),
            BusError::Serial(e) => match e.kind() {
                serialport::ErrorKind::NoDevice => true,
                serialport::ErrorKind::Io(kind) => io_error_is_lost(&io::Error::from(kind)),
                _ => false,
            },
            BusError::Disconnected | BusError::NotOpen => true,
            BusError::Timeout | BusError::Protocol(_) => false,
        }
    }
}

/// Dynamixel 总线抽象
///
/// 一次事务 = 发送一个指令包 + 在超时内读取一个状态包。
pub trait ServoBus {
    /// 执行一次事务，返回 ID 为 `expected_id` 的状态包
    fn transact(&mut self, request: &[u8], expected_id: u8) -> Result<StatusPacket, BusError>;

    /// 串口句柄是否可用
    fn is_open(&self) -> bool;

    /// 重新打开串口（连接丢失后由监督器调用）
    fn reopen(&mut self) -> Result<(), BusError>;

    /// 释放串口句柄
    fn close(&mut self);
}

impl<B: ServoBus + ?Sized> ServoBus for Box<B> {
    fn transact(&mut self, request: &[u8], expected_id: u8) -> Result<StatusPacket, BusError> {
        (**self).transact(request, expected_id)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn reopen(&mut self) -> Result<(), BusError> {
        (**self).reopen()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

// ============================================================================
// PLC 数据块
// ============================================================================

/// PLC 客户端错误
#[derive(Error, Debug)]
pub enum PlcError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("Request timeout")]
    Timeout,
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Not connected")]
    NotConnected,
    #[error("Cannot resolve address {0}")]
    Resolve(String),
    #[error("Request of {requested} bytes exceeds PDU payload {limit}")]
    PduTooSmall { requested: usize, limit: usize },
}

impl PlcError {
    /// 是否为连接丢失（需要断开并重连）
    pub fn is_connection_lost(&self) -> bool {
        match self {
            PlcError::Io(e) => io_error_is_lost(e),
            PlcError::NotConnected | PlcError::Resolve(_) => true,
            PlcError::Timeout | PlcError::Protocol(_) | PlcError::PduTooSmall { .. } => false,
        }
    }
}

/// 数据块读写抽象（S7 DB 区）
pub trait DataBlockClient {
    fn connect(&mut self) -> Result<(), PlcError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn db_read(&mut self, db: u16, start: u32, len: usize) -> Result<Vec<u8>, PlcError>;

    fn db_write(&mut self, db: u16, start: u32, data: &[u8]) -> Result<(), PlcError>;

    /// 连接目标描述（用于日志）
    fn describe(&self) -> String;
}
