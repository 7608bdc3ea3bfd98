//! Mock 舵机（无硬件测试）
//!
//! - [`MockServoBus`]: 模拟 Dynamixel 控制表的总线，走完整的包编解码
//! - [`MockServo`]: 记录调用序列的 `ServoTransport`，用于桥接循环测试

use crate::{DriverError, Feedback, ServoTransport};
use jaw_io::{BusError, ServoBus};
use jaw_protocol::dxl::{
    self, Instruction, InstructionPacket, OperatingMode, Register, StatusPacket,
};
use std::collections::HashMap;

// ============================================================================
// MockServoBus
// ============================================================================

/// Access error：力矩开启时写 EEPROM
const ERR_ACCESS: u8 = 0x07;
/// Data range error
const ERR_DATA_RANGE: u8 = 0x04;

/// 控制表大小（覆盖到 Present Position 之后）
const TABLE_SIZE: usize = 256;

/// EEPROM 区上界（地址 < 64）
const EEPROM_END: u16 = 64;

/// 模拟单个 X 系列舵机的总线
#[derive(Debug, Clone)]
pub struct MockServoBus {
    id: u8,
    table: Vec<u8>,
    open: bool,
    error_byte: u8,
    timeouts: usize,
    reopen_failures: usize,
    echo_goal: bool,
    requests: Vec<InstructionPacket>,
}

impl MockServoBus {
    /// 默认控制表：位置模式、全行程、速度上限 265、加速度上限 32767
    pub fn new(id: u8) -> Self {
        let mut bus = Self {
            id,
            table: vec![0; TABLE_SIZE],
            open: true,
            error_byte: 0,
            timeouts: 0,
            reopen_failures: 0,
            echo_goal: true,
            requests: Vec::new(),
        };
        bus.set_register(Register::OperatingMode, u8::from(OperatingMode::Position) as u32);
        bus.set_register(Register::MinPositionLimit, 0);
        bus.set_register(Register::MaxPositionLimit, 4095);
        bus.set_register(Register::VelocityLimit, 265);
        bus.set_register(Register::AccelLimit, 32767);
        bus
    }

    pub fn register(&self, register: Register) -> u32 {
        let addr = register.address() as usize;
        let mut bytes = [0u8; 4];
        bytes[..register.width()].copy_from_slice(&self.table[addr..addr + register.width()]);
        u32::from_le_bytes(bytes)
    }

    pub fn set_register(&mut self, register: Register, value: u32) {
        let addr = register.address() as usize;
        self.table[addr..addr + register.width()]
            .copy_from_slice(&value.to_le_bytes()[..register.width()]);
    }

    /// 写 Goal Position 时是否立即同步 Present Position
    pub fn set_echo_goal(&mut self, echo: bool) {
        self.echo_goal = echo;
    }

    /// 之后的每个状态包都带此错误字节
    pub fn set_error_byte(&mut self, error: u8) {
        self.error_byte = error;
    }

    /// 接下来 `n` 个事务无应答
    pub fn timeout_next(&mut self, n: usize) {
        self.timeouts = n;
    }

    /// 模拟 USB 串口拔出
    pub fn unplug(&mut self) {
        self.open = false;
    }

    /// 接下来 `n` 次 `reopen` 失败
    pub fn fail_reopen(&mut self, n: usize) {
        self.reopen_failures = n;
    }

    pub fn requests(&self) -> &[InstructionPacket] {
        &self.requests
    }

    /// 写入某寄存器的所有值（按顺序）
    pub fn writes_to(&self, register: Register) -> Vec<u32> {
        self.requests
            .iter()
            .filter(|r| r.instruction == Instruction::Write)
            .filter(|r| r.params.len() >= 2)
            .filter(|r| u16::from_le_bytes([r.params[0], r.params[1]]) == register.address())
            .map(|r| {
                let mut bytes = [0u8; 4];
                let data = &r.params[2..];
                let n = data.len().min(4);
                bytes[..n].copy_from_slice(&data[..n]);
                u32::from_le_bytes(bytes)
            })
            .collect()
    }

    fn torque_enabled(&self) -> bool {
        self.table[Register::TorqueEnable.address() as usize] != 0
    }

    /// 处理指令，返回 (错误字节, 参数)
    fn execute(&mut self, packet: &InstructionPacket) -> (u8, Vec<u8>) {
        match packet.instruction {
            // 型号 XM430-W350 (1020)，固件 v45
            Instruction::Ping => (0, vec![0xFC, 0x03, 45]),
            Instruction::Read => {
                if packet.params.len() != 4 {
                    return (ERR_DATA_RANGE, Vec::new());
                }
                let addr = u16::from_le_bytes([packet.params[0], packet.params[1]]) as usize;
                let len = u16::from_le_bytes([packet.params[2], packet.params[3]]) as usize;
                if addr + len > TABLE_SIZE {
                    return (ERR_DATA_RANGE, Vec::new());
                }
                (0, self.table[addr..addr + len].to_vec())
            },
            Instruction::Write => {
                if packet.params.len() < 3 {
                    return (ERR_DATA_RANGE, Vec::new());
                }
                let addr = u16::from_le_bytes([packet.params[0], packet.params[1]]);
                let data = &packet.params[2..];
                if addr as usize + data.len() > TABLE_SIZE {
                    return (ERR_DATA_RANGE, Vec::new());
                }
                if addr < EEPROM_END && self.torque_enabled() {
                    return (ERR_ACCESS, Vec::new());
                }
                let start = addr as usize;
                self.table[start..start + data.len()].copy_from_slice(data);
                if self.echo_goal && addr == Register::GoalPosition.address() {
                    let goal = self.register(Register::GoalPosition);
                    self.set_register(Register::PresentPosition, goal);
                }
                (0, Vec::new())
            },
            Instruction::Reboot => (0, Vec::new()),
        }
    }
}

impl ServoBus for MockServoBus {
    fn transact(&mut self, request: &[u8], expected_id: u8) -> Result<StatusPacket, BusError> {
        if !self.open {
            return Err(BusError::NotOpen);
        }
        let packet = dxl::decode_instruction(request)?;
        self.requests.push(packet.clone());

        if self.timeouts > 0 {
            self.timeouts -= 1;
            return Err(BusError::Timeout);
        }
        if packet.id != self.id {
            return Err(BusError::Timeout);
        }

        let (error, params) = self.execute(&packet);
        let reply = dxl::encode_status(self.id, error | self.error_byte, &params);
        let status = dxl::decode_status(&reply)?;
        if status.id != expected_id {
            return Err(jaw_protocol::ProtocolError::IdMismatch {
                expected: expected_id,
                actual: status.id,
            }
            .into());
        }
        Ok(status)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reopen(&mut self) -> Result<(), BusError> {
        if self.reopen_failures > 0 {
            self.reopen_failures -= 1;
            return Err(BusError::Disconnected);
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

// ============================================================================
// MockServo
// ============================================================================

/// `MockServo` 记录的调用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoCall {
    Torque(bool),
    OperatingMode(OperatingMode),
    Profile { velocity: u32, accel: u32 },
    GoalPosition(u32),
    Watchdog(u8),
    ReadFeedback,
    ReadRegister(Register),
    Reopen,
    Release,
}

/// 记录调用序列的舵机
///
/// 默认行为：所有写入成功，限位寄存器为全行程，`read_feedback`
/// 回显最近一次目标位置（确定性舵机）。
#[derive(Debug, Clone)]
pub struct MockServo {
    calls: Vec<ServoCall>,
    registers: HashMap<Register, u32>,
    position_ticks: u32,
    velocity_raw: i32,
    lost: bool,
    reopen_failures: usize,
    fail_goal: bool,
    fail_feedback: bool,
    fail_mode: bool,
    alert: bool,
}

impl Default for MockServo {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServo {
    pub fn new() -> Self {
        let registers = [
            (Register::MinPositionLimit, 0),
            (Register::MaxPositionLimit, 4095),
            (Register::VelocityLimit, 265),
            (Register::AccelLimit, 32767),
        ]
        .into_iter()
        .collect();
        Self {
            calls: Vec::new(),
            registers,
            position_ticks: 0,
            velocity_raw: 0,
            lost: false,
            reopen_failures: 0,
            fail_goal: false,
            fail_feedback: false,
            fail_mode: false,
            alert: false,
        }
    }

    pub fn calls(&self) -> &[ServoCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn set_register(&mut self, register: Register, value: u32) {
        self.registers.insert(register, value);
    }

    /// 读取该寄存器时返回超时
    pub fn remove_register(&mut self, register: Register) {
        self.registers.remove(&register);
    }

    /// 设置反馈值（下一次目标位置写入前有效）
    pub fn set_feedback(&mut self, position_ticks: u32, velocity_raw: i32) {
        self.position_ticks = position_ticks;
        self.velocity_raw = velocity_raw;
    }

    pub fn set_lost(&mut self, lost: bool) {
        self.lost = lost;
    }

    pub fn fail_reopen(&mut self, n: usize) {
        self.reopen_failures = n;
    }

    pub fn fail_goal_writes(&mut self, fail: bool) {
        self.fail_goal = fail;
    }

    pub fn fail_feedback(&mut self, fail: bool) {
        self.fail_feedback = fail;
    }

    pub fn fail_operating_mode(&mut self, fail: bool) {
        self.fail_mode = fail;
    }

    pub fn set_alert(&mut self, alert: bool) {
        self.alert = alert;
    }

    /// 按顺序返回所有目标位置写入
    pub fn goal_positions(&self) -> Vec<u32> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                ServoCall::GoalPosition(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    /// 按顺序返回所有力矩写入
    pub fn torque_writes(&self) -> Vec<bool> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                ServoCall::Torque(on) => Some(*on),
                _ => None,
            })
            .collect()
    }

    pub fn profiles(&self) -> Vec<(u32, u32)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                ServoCall::Profile { velocity, accel } => Some((*velocity, *accel)),
                _ => None,
            })
            .collect()
    }

    fn check(&self) -> Result<(), DriverError> {
        if self.lost {
            Err(DriverError::Bus(BusError::NotOpen))
        } else {
            Ok(())
        }
    }
}

impl ServoTransport for MockServo {
    fn set_torque(&mut self, enable: bool) -> Result<(), DriverError> {
        self.calls.push(ServoCall::Torque(enable));
        self.check()
    }

    fn set_operating_mode(&mut self, mode: OperatingMode) -> Result<(), DriverError> {
        self.calls.push(ServoCall::OperatingMode(mode));
        self.check()?;
        if self.fail_mode {
            return Err(DriverError::Hardware {
                code: ERR_ACCESS,
                context: Register::OperatingMode.name(),
            });
        }
        Ok(())
    }

    fn set_profile(&mut self, velocity: u32, accel: u32) -> Result<(), DriverError> {
        self.calls.push(ServoCall::Profile { velocity, accel });
        self.check()
    }

    fn set_goal_position(&mut self, ticks: u32) -> Result<(), DriverError> {
        self.calls.push(ServoCall::GoalPosition(ticks));
        self.check()?;
        if self.fail_goal {
            return Err(DriverError::Bus(BusError::Timeout));
        }
        self.position_ticks = ticks;
        Ok(())
    }

    fn set_watchdog(&mut self, ticks_20ms: u8) -> Result<(), DriverError> {
        self.calls.push(ServoCall::Watchdog(ticks_20ms));
        self.check()
    }

    fn read_feedback(&mut self) -> Feedback {
        self.calls.push(ServoCall::ReadFeedback);
        if self.lost || self.fail_feedback {
            return Feedback::failed();
        }
        Feedback {
            position_ticks: self.position_ticks,
            velocity_raw: self.velocity_raw,
            read_ok: true,
            alert: self.alert,
        }
    }

    fn read_register(&mut self, register: Register) -> Result<u32, DriverError> {
        self.calls.push(ServoCall::ReadRegister(register));
        self.check()?;
        self.registers
            .get(&register)
            .copied()
            .ok_or(DriverError::Bus(BusError::Timeout))
    }

    fn is_lost(&self) -> bool {
        self.lost
    }

    fn reopen(&mut self) -> Result<(), DriverError> {
        self.calls.push(ServoCall::Reopen);
        if self.reopen_failures > 0 {
            self.reopen_failures -= 1;
            return Err(DriverError::Bus(BusError::Disconnected));
        }
        self.lost = false;
        Ok(())
    }

    fn release(&mut self) {
        self.calls.push(ServoCall::Release);
    }
}
