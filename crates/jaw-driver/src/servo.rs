//! 舵机传输层
//!
//! `ServoTransport` 是桥接循环看到的舵机接口；`DynamixelServo`
//! 把它映射到 Protocol 2.0 的寄存器读写事务上。

use crate::DriverError;
use jaw_io::ServoBus;
use jaw_protocol::dxl::{
    self, OperatingMode, Register, StatusError, StatusPacket, TORQUE_OFF, TORQUE_ON,
};
use tracing::{debug, trace};

/// 每周期读取的舵机反馈
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Feedback {
    pub position_ticks: u32,
    pub velocity_raw: i32,
    /// 位置与速度都读取成功
    pub read_ok: bool,
    /// 状态包带硬件告警位
    pub alert: bool,
}

impl Feedback {
    /// 读取失败时的反馈（数值无意义）
    pub fn failed() -> Self {
        Self::default()
    }
}

/// 舵机传输接口
///
/// 每个写操作返回 `Ok(())` 或带可选硬件错误码的 `DriverError`
/// （见 [`DriverError::hardware_code`]）。实现不得在内部重试。
pub trait ServoTransport {
    fn set_torque(&mut self, enable: bool) -> Result<(), DriverError>;

    fn set_operating_mode(&mut self, mode: OperatingMode) -> Result<(), DriverError>;

    /// 写入轮廓速度与轮廓加速度
    fn set_profile(&mut self, velocity: u32, accel: u32) -> Result<(), DriverError>;

    fn set_goal_position(&mut self, ticks: u32) -> Result<(), DriverError>;

    /// 总线看门狗（单位 20ms，0 = 关闭）
    fn set_watchdog(&mut self, ticks_20ms: u8) -> Result<(), DriverError>;

    /// 读取当前位置与速度；失败时 `read_ok == false`
    fn read_feedback(&mut self) -> Feedback;

    fn read_register(&mut self, register: Register) -> Result<u32, DriverError>;

    /// 串口句柄是否已丢失（需要 `reopen`）
    fn is_lost(&self) -> bool;

    fn reopen(&mut self) -> Result<(), DriverError>;

    /// 释放句柄
    fn release(&mut self);
}

/// Dynamixel X 系列舵机
#[derive(Debug)]
pub struct DynamixelServo<B: ServoBus> {
    bus: B,
    id: u8,
}

impl<B: ServoBus> DynamixelServo<B> {
    pub fn new(bus: B, id: u8) -> Self {
        Self { bus, id }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Ping（确认舵机在线）
    pub fn ping(&mut self) -> Result<(), DriverError> {
        let status = self.bus.transact(&dxl::ping_request(self.id), self.id)?;
        check_error(status.error, "ping")
    }

    /// 读取硬件错误状态寄存器
    pub fn hardware_error_status(&mut self) -> Result<dxl::HardwareErrorStatus, DriverError> {
        let raw = self.read_register(Register::HardwareErrorStatus)?;
        Ok(dxl::HardwareErrorStatus::from_raw(raw as u8))
    }

    fn write(&mut self, register: Register, value: u32) -> Result<(), DriverError> {
        let request = dxl::write_request(self.id, register, value)?;
        let status = self.bus.transact(&request, self.id)?;
        check_error(status.error, register.name())?;
        trace!(register = register.name(), value, "dxl write ok");
        Ok(())
    }

    /// 读取寄存器的应答包
    ///
    /// 只有告警位（bit 7）时数据仍然有效。
    fn read_status(&mut self, register: Register) -> Result<StatusPacket, DriverError> {
        let status = self
            .bus
            .transact(&dxl::read_request(self.id, register), self.id)?;
        if status.error.is_failed() {
            return Err(DriverError::Hardware {
                code: status.error.raw(),
                context: register.name(),
            });
        }
        Ok(status)
    }

    /// 读取无符号寄存器，返回 (值, 错误字节)
    fn read(&mut self, register: Register) -> Result<(u32, StatusError), DriverError> {
        let status = self.read_status(register)?;
        let value = status.value_u32(register.width())?;
        Ok((value, status.error))
    }

    /// Present Velocity 为有符号值
    fn read_velocity(&mut self) -> Result<(i32, StatusError), DriverError> {
        let status = self.read_status(Register::PresentVelocity)?;
        let value = status.value_i32()?;
        Ok((value, status.error))
    }
}

/// 错误字节非零即视为写失败
fn check_error(error: StatusError, context: &'static str) -> Result<(), DriverError> {
    if error.is_clear() {
        Ok(())
    } else {
        Err(DriverError::Hardware {
            code: error.raw(),
            context,
        })
    }
}

impl<B: ServoBus> ServoTransport for DynamixelServo<B> {
    fn set_torque(&mut self, enable: bool) -> Result<(), DriverError> {
        let value = if enable { TORQUE_ON } else { TORQUE_OFF };
        self.write(Register::TorqueEnable, value as u32)?;
        debug!(id = self.id, enable, "torque set");
        Ok(())
    }

    fn set_operating_mode(&mut self, mode: OperatingMode) -> Result<(), DriverError> {
        self.write(Register::OperatingMode, u8::from(mode) as u32)
    }

    /// 两个寄存器分别写入；第一个失败时仍尝试第二个，返回第一个错误
    fn set_profile(&mut self, velocity: u32, accel: u32) -> Result<(), DriverError> {
        let vel = self.write(Register::ProfileVelocity, velocity);
        let acc = self.write(Register::ProfileAccel, accel);
        vel.and(acc)
    }

    fn set_goal_position(&mut self, ticks: u32) -> Result<(), DriverError> {
        self.write(Register::GoalPosition, ticks)
    }

    fn set_watchdog(&mut self, ticks_20ms: u8) -> Result<(), DriverError> {
        self.write(Register::BusWatchdog, ticks_20ms as u32)
    }

    fn read_feedback(&mut self) -> Feedback {
        let position = self.read(Register::PresentPosition);
        // 串口已丢失时不再发起第二个事务
        if matches!(&position, Err(e) if e.is_connection_lost()) {
            return Feedback::failed();
        }
        let velocity = self.read_velocity();

        match (position, velocity) {
            (Ok((pos, pos_err)), Ok((vel, vel_err))) => Feedback {
                position_ticks: pos,
                velocity_raw: vel,
                read_ok: true,
                alert: pos_err.alert() || vel_err.alert(),
            },
            (position, velocity) => {
                if let Err(e) = &position {
                    trace!(error = %e, "present position read failed");
                }
                if let Err(e) = &velocity {
                    trace!(error = %e, "present velocity read failed");
                }
                Feedback {
                    position_ticks: position.as_ref().map(|(p, _)| *p).unwrap_or(0),
                    velocity_raw: velocity.as_ref().map(|(v, _)| *v).unwrap_or(0),
                    read_ok: false,
                    alert: false,
                }
            },
        }
    }

    fn read_register(&mut self, register: Register) -> Result<u32, DriverError> {
        self.read(register).map(|(value, _)| value)
    }

    fn is_lost(&self) -> bool {
        !self.bus.is_open()
    }

    fn reopen(&mut self) -> Result<(), DriverError> {
        self.bus.reopen()?;
        Ok(())
    }

    fn release(&mut self) {
        self.bus.close();
    }
}
