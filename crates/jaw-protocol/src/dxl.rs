//! Dynamixel Protocol 2.0（X 系列）
//!
//! 控制表地址、指令包构建、状态包解析、CRC-16 与字节填充。
//!
//! # 包格式
//!
//! ```text
//! 指令包: FF FF FD 00 | ID | LEN_L LEN_H | INST | PARAM... | CRC_L CRC_H
//! 状态包: FF FF FD 00 | ID | LEN_L LEN_H | 0x55 | ERR | PARAM... | CRC_L CRC_H
//! ```
//!
//! `LEN` = 指令字节 + 参数 + 2 字节 CRC（填充之后的长度）。
//! 寄存器值为小端字节序。

use crate::ProtocolError;
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 包头（含保留字节）
pub const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// 广播 ID
pub const BROADCAST_ID: u8 = 0xFE;

/// 状态包的指令字节
pub const STATUS_INSTRUCTION: u8 = 0x55;

/// 包头 + ID + LEN 的字节数（状态包长度字段之前的部分）
pub const PREAMBLE_LEN: usize = 7;

/// 接收缓冲区上限（本桥接器只读写 1/4 字节寄存器，远小于此值）
pub const MAX_PACKET_LEN: usize = 256;

pub const TORQUE_ON: u8 = 1;
pub const TORQUE_OFF: u8 = 0;

// ============================================================================
// 指令与控制表
// ============================================================================

/// 指令码
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    Reboot = 0x08,
}

/// 控制表寄存器（X 系列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// 运行模式（EEPROM，1 字节）
    OperatingMode,
    /// 加速度上限（EEPROM，4 字节）
    AccelLimit,
    /// 速度上限（EEPROM，4 字节）
    VelocityLimit,
    /// 位置上限（EEPROM，4 字节）
    MaxPositionLimit,
    /// 位置下限（EEPROM，4 字节）
    MinPositionLimit,
    /// 力矩使能（1 字节）
    TorqueEnable,
    /// 硬件错误状态（1 字节，只读）
    HardwareErrorStatus,
    /// 总线看门狗（1 字节，单位 20ms，0 = 关闭）
    BusWatchdog,
    /// 轮廓加速度（4 字节）
    ProfileAccel,
    /// 轮廓速度（4 字节）
    ProfileVelocity,
    /// 目标位置（4 字节）
    GoalPosition,
    /// 当前速度（4 字节，有符号）
    PresentVelocity,
    /// 当前位置（4 字节）
    PresentPosition,
}

impl Register {
    /// 控制表地址
    pub const fn address(self) -> u16 {
        match self {
            Register::OperatingMode => 11,
            Register::AccelLimit => 40,
            Register::VelocityLimit => 44,
            Register::MaxPositionLimit => 48,
            Register::MinPositionLimit => 52,
            Register::TorqueEnable => 64,
            Register::HardwareErrorStatus => 70,
            Register::BusWatchdog => 98,
            Register::ProfileAccel => 108,
            Register::ProfileVelocity => 112,
            Register::GoalPosition => 116,
            Register::PresentVelocity => 128,
            Register::PresentPosition => 132,
        }
    }

    /// 寄存器宽度（字节）
    pub const fn width(self) -> usize {
        match self {
            Register::OperatingMode
            | Register::TorqueEnable
            | Register::HardwareErrorStatus
            | Register::BusWatchdog => 1,
            _ => 4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Register::OperatingMode => "operating_mode",
            Register::AccelLimit => "accel_limit",
            Register::VelocityLimit => "velocity_limit",
            Register::MaxPositionLimit => "max_position_limit",
            Register::MinPositionLimit => "min_position_limit",
            Register::TorqueEnable => "torque_enable",
            Register::HardwareErrorStatus => "hardware_error_status",
            Register::BusWatchdog => "bus_watchdog",
            Register::ProfileAccel => "profile_accel",
            Register::ProfileVelocity => "profile_velocity",
            Register::GoalPosition => "goal_position",
            Register::PresentVelocity => "present_velocity",
            Register::PresentPosition => "present_position",
        }
    }
}

/// 运行模式（Operating Mode 寄存器取值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OperatingMode {
    Current = 0,
    Velocity = 1,
    /// 位置控制（0..4095，单圈）
    #[default]
    Position = 3,
    ExtendedPosition = 4,
    CurrentBasedPosition = 5,
    Pwm = 16,
}

// ============================================================================
// 状态包错误字节
// ============================================================================

/// 状态包错误字节（位域）
///
/// - Bit 0-6: 处理结果（0 = 成功）
/// - Bit 7: 硬件告警（详情见 Hardware Error Status 寄存器）
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct StatusError {
    pub result: u7, // Bit 0-6: 处理结果
    pub alert: bool, // Bit 7: 硬件告警
}

/// 状态包处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ResultCode {
    ResultFail = 1,
    InstructionError = 2,
    CrcError = 3,
    DataRangeError = 4,
    DataLengthError = 5,
    DataLimitError = 6,
    AccessError = 7,
}

impl StatusError {
    pub fn from_raw(raw: u8) -> Self {
        Self::from(u8::new(raw))
    }

    /// 原始字节
    pub fn raw(self) -> u8 {
        u8::from(self)
    }

    /// 错误字节为 0
    pub fn is_clear(self) -> bool {
        self.raw() == 0
    }

    /// 处理结果非零（告警位不计）
    pub fn is_failed(self) -> bool {
        self.result().value() != 0
    }

    /// 处理结果（0 时返回 None）
    pub fn result_code(self) -> Option<ResultCode> {
        ResultCode::try_from(self.result().value()).ok()
    }
}

/// 硬件错误状态寄存器（地址 70）
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct HardwareErrorStatus {
    pub input_voltage: bool,    // Bit 0: 输入电压异常
    pub reserved_1: bool,       // Bit 1: 保留
    pub overheating: bool,      // Bit 2: 过温
    pub motor_encoder: bool,    // Bit 3: 编码器异常
    pub electrical_shock: bool, // Bit 4: 电气冲击
    pub overload: bool,         // Bit 5: 过载
    pub reserved_2: u2,         // Bit 6-7: 保留
}

impl HardwareErrorStatus {
    pub fn from_raw(raw: u8) -> Self {
        Self::from(u8::new(raw))
    }

    /// 已置位的故障名称
    pub fn active_faults(self) -> Vec<&'static str> {
        let mut faults = Vec::new();
        if self.input_voltage() {
            faults.push("input_voltage");
        }
        if self.overheating() {
            faults.push("overheating");
        }
        if self.motor_encoder() {
            faults.push("motor_encoder");
        }
        if self.electrical_shock() {
            faults.push("electrical_shock");
        }
        if self.overload() {
            faults.push("overload");
        }
        faults
    }
}

// ============================================================================
// CRC 与字节填充
// ============================================================================

/// CRC-16（多项式 0x8005，初值 0，高位在前）
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn ends_with_header_pattern(buf: &[u8]) -> bool {
    buf.len() >= 3 && buf[buf.len() - 3..] == [0xFF, 0xFF, 0xFD]
}

/// 字节填充：指令区内出现 `FF FF FD` 时追加一个 `FD`
pub fn stuff(region: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(region.len() + 2);
    for &byte in region {
        out.push(byte);
        if ends_with_header_pattern(&out) {
            out.push(0xFD);
        }
    }
    out
}

/// 去除字节填充
pub fn unstuff(region: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(region.len());
    let mut i = 0;
    while i < region.len() {
        out.push(region[i]);
        if ends_with_header_pattern(&out) && region.get(i + 1) == Some(&0xFD) {
            i += 1;
        }
        i += 1;
    }
    out
}

// ============================================================================
// 指令包
// ============================================================================

/// 构建指令包
pub fn encode_instruction(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let mut region = Vec::with_capacity(params.len() + 1);
    region.push(instruction.into());
    region.extend_from_slice(params);
    let region = stuff(&region);

    let length = (region.len() + 2) as u16;
    let mut packet = Vec::with_capacity(PREAMBLE_LEN + length as usize);
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.extend_from_slice(&length.to_le_bytes());
    packet.extend_from_slice(&region);

    let crc = crc16(&packet);
    packet.extend_from_slice(&crc.to_le_bytes());
    packet
}

/// Ping 指令
pub fn ping_request(id: u8) -> Vec<u8> {
    encode_instruction(id, Instruction::Ping, &[])
}

/// 读寄存器指令
pub fn read_request(id: u8, register: Register) -> Vec<u8> {
    let mut params = [0u8; 4];
    params[..2].copy_from_slice(&register.address().to_le_bytes());
    params[2..].copy_from_slice(&(register.width() as u16).to_le_bytes());
    encode_instruction(id, Instruction::Read, &params)
}

/// 写寄存器指令
///
/// 值超出寄存器宽度时返回 `InvalidValue`。
pub fn write_request(id: u8, register: Register, value: u32) -> Result<Vec<u8>, ProtocolError> {
    let width = register.width();
    if width == 1 && value > u8::MAX as u32 {
        return Err(ProtocolError::InvalidValue {
            field: register.name().to_string(),
            value,
        });
    }

    let mut params = Vec::with_capacity(2 + width);
    params.extend_from_slice(&register.address().to_le_bytes());
    params.extend_from_slice(&value.to_le_bytes()[..width]);
    Ok(encode_instruction(id, Instruction::Write, &params))
}

// ============================================================================
// 状态包
// ============================================================================

/// 已解析的状态包
#[derive(Debug, Clone)]
pub struct StatusPacket {
    pub id: u8,
    pub error: StatusError,
    pub params: Vec<u8>,
}

impl StatusPacket {
    /// 按小端读取无符号寄存器值
    pub fn value_u32(&self, width: usize) -> Result<u32, ProtocolError> {
        if self.params.len() < width || width == 0 || width > 4 {
            return Err(ProtocolError::InvalidLength {
                expected: width,
                actual: self.params.len(),
            });
        }
        let mut bytes = [0u8; 4];
        bytes[..width].copy_from_slice(&self.params[..width]);
        Ok(u32::from_le_bytes(bytes))
    }

    /// 按小端读取 4 字节有符号值（Present Velocity）
    pub fn value_i32(&self) -> Result<i32, ProtocolError> {
        self.value_u32(4).map(|v| v as i32)
    }
}

/// 从包头后 7 字节推算整包长度
///
/// 调用方先读满 `PREAMBLE_LEN` 字节，再按此长度读取剩余部分。
pub fn total_len_from_preamble(preamble: &[u8]) -> Result<usize, ProtocolError> {
    if preamble.len() < PREAMBLE_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: PREAMBLE_LEN,
            actual: preamble.len(),
        });
    }
    if preamble[..4] != HEADER {
        return Err(ProtocolError::InvalidHeader);
    }
    let length = u16::from_le_bytes([preamble[5], preamble[6]]) as usize;
    // 至少包含 INST + ERR + CRC
    if length < 4 {
        return Err(ProtocolError::InvalidLength {
            expected: 4,
            actual: length,
        });
    }
    let total = PREAMBLE_LEN + length;
    if total > MAX_PACKET_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: MAX_PACKET_LEN,
            actual: total,
        });
    }
    Ok(total)
}

/// 解析状态包
pub fn decode_status(packet: &[u8]) -> Result<StatusPacket, ProtocolError> {
    let total = total_len_from_preamble(packet)?;
    if packet.len() != total {
        return Err(ProtocolError::InvalidLength {
            expected: total,
            actual: packet.len(),
        });
    }

    let body_end = total - 2;
    let computed = crc16(&packet[..body_end]);
    let received = u16::from_le_bytes([packet[body_end], packet[body_end + 1]]);
    if computed != received {
        return Err(ProtocolError::CrcMismatch { computed, received });
    }

    let region = unstuff(&packet[PREAMBLE_LEN..body_end]);
    if region.len() < 2 {
        return Err(ProtocolError::InvalidLength {
            expected: 2,
            actual: region.len(),
        });
    }
    if region[0] != STATUS_INSTRUCTION {
        return Err(ProtocolError::UnexpectedInstruction(region[0]));
    }

    Ok(StatusPacket {
        id: packet[4],
        error: StatusError::from_raw(region[1]),
        params: region[2..].to_vec(),
    })
}

/// 已解析的指令包（模拟舵机使用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPacket {
    pub id: u8,
    pub instruction: Instruction,
    pub params: Vec<u8>,
}

/// 解析指令包
pub fn decode_instruction(packet: &[u8]) -> Result<InstructionPacket, ProtocolError> {
    if packet.len() < PREAMBLE_LEN + 3 {
        return Err(ProtocolError::InvalidLength {
            expected: PREAMBLE_LEN + 3,
            actual: packet.len(),
        });
    }
    if packet[..4] != HEADER {
        return Err(ProtocolError::InvalidHeader);
    }
    let length = u16::from_le_bytes([packet[5], packet[6]]) as usize;
    if packet.len() != PREAMBLE_LEN + length {
        return Err(ProtocolError::InvalidLength {
            expected: PREAMBLE_LEN + length,
            actual: packet.len(),
        });
    }

    let body_end = packet.len() - 2;
    let computed = crc16(&packet[..body_end]);
    let received = u16::from_le_bytes([packet[body_end], packet[body_end + 1]]);
    if computed != received {
        return Err(ProtocolError::CrcMismatch { computed, received });
    }

    let region = unstuff(&packet[PREAMBLE_LEN..body_end]);
    let instruction = Instruction::try_from(region[0])
        .map_err(|_| ProtocolError::UnexpectedInstruction(region[0]))?;
    Ok(InstructionPacket {
        id: packet[4],
        instruction,
        params: region[1..].to_vec(),
    })
}

/// 构建状态包（用于模拟舵机与测试）
pub fn encode_status(id: u8, error: u8, params: &[u8]) -> Vec<u8> {
    let mut region = Vec::with_capacity(params.len() + 2);
    region.push(STATUS_INSTRUCTION);
    region.push(error);
    region.extend_from_slice(params);
    let region = stuff(&region);

    let length = (region.len() + 2) as u16;
    let mut packet = Vec::with_capacity(PREAMBLE_LEN + length as usize);
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.extend_from_slice(&length.to_le_bytes());
    packet.extend_from_slice(&region);
    let crc = crc16(&packet);
    packet.extend_from_slice(&crc.to_le_bytes());
    packet
}
