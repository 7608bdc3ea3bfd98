//! # Jaw Protocol
//!
//! 桥接器的线路协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `dxl`: Dynamixel Protocol 2.0 控制表、指令包编码、状态包解析
//! - `block`: PLC 数据块布局（Command / Status 缓冲区）
//! - `s7`: S7 ISO-on-TCP 报文构建与解析
//! - `udp`: 单字节 UDP 位置指令
//!
//! ## 字节序
//!
//! - PLC 数据块使用大端字节序（S7 惯例）
//! - Dynamixel 寄存器使用小端字节序

pub mod block;
pub mod dxl;
pub mod s7;
pub mod udp;

pub use block::{Command, CommandLayout, Status, StatusLayout};
pub use dxl::{OperatingMode, Register, StatusError, StatusPacket};

use thiserror::Error;

/// 每圈编码器刻度数（X 系列 12 位绝对编码器）
pub const TICKS_PER_REV: u32 = 4096;

/// PLC 侧归一化量程：0..=1000
pub const SETPOINT_SCALE: i16 = 1000;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid packet header")]
    InvalidHeader,

    #[error("CRC mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    CrcMismatch { computed: u16, received: u16 },

    #[error("Unexpected servo id: expected {expected}, got {actual}")]
    IdMismatch { expected: u8, actual: u8 },

    #[error("Unexpected instruction 0x{0:02X}")]
    UnexpectedInstruction(u8),

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u32 },

    #[error("Invalid block layout: {0}")]
    InvalidLayout(String),

    #[error("S7 error: class 0x{class:02X}, code 0x{code:02X}")]
    S7Header { class: u8, code: u8 },

    #[error("S7 item return code 0x{0:02X}")]
    S7Item(u8),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// 角度 → 编码器刻度
///
/// 角度先对 360° 取模，再按 `TICKS_PER_REV` 缩放并四舍五入。
/// 恰好落在 4096 的结果回绕到 0（同一物理位置）。
pub fn deg_to_tick(deg: f64) -> u32 {
    let scaled = (deg.rem_euclid(360.0) * TICKS_PER_REV as f64 / 360.0).round();
    (scaled as u32) % TICKS_PER_REV
}

/// 编码器刻度 → 角度（0..360）
pub fn tick_to_deg(ticks: u32) -> f64 {
    (ticks % TICKS_PER_REV) as f64 * 360.0 / TICKS_PER_REV as f64
}

/// 大端字节序读取 i16
pub fn read_i16_be(buf: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// 大端字节序读取 u16
pub fn read_u16_be(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// 大端字节序写入 i16
pub fn write_i16_be(buf: &mut [u8], offset: usize, value: i16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// 大端字节序写入 u16
pub fn write_u16_be(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// 大端字节序写入 u32
pub fn write_u32_be(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}
