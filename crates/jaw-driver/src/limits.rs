//! 硬件限位探测
//!
//! 每次（重新）连接后读取舵机 EEPROM 中的位置上下限、速度上限与加速度上限。
//! 单个字段读取失败时只替换该字段，整个探测永不失败。

use crate::ServoTransport;
use jaw_protocol::TICKS_PER_REV;
use jaw_protocol::dxl::Register;
use tracing::{info, warn};

/// 舵机硬件限位（会话内固定）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareLimits {
    pub min_ticks: u32,
    pub max_ticks: u32,
    pub velocity_limit: u32,
    pub accel_limit: u32,
}

impl HardwareLimits {
    /// 全行程保守默认值 `{0, 4095, default_vel, default_acc}`
    pub fn fallback(velocity_default: u32, accel_default: u32) -> Self {
        Self {
            min_ticks: 0,
            max_ticks: TICKS_PER_REV - 1,
            velocity_limit: velocity_default,
            accel_limit: accel_default,
        }
    }

    /// 保证 `min_ticks <= max_ticks`
    fn normalized(mut self) -> Self {
        if self.min_ticks > self.max_ticks {
            warn!(
                min = self.min_ticks,
                max = self.max_ticks,
                "hardware position limits inverted, swapping"
            );
            std::mem::swap(&mut self.min_ticks, &mut self.max_ticks);
        }
        self
    }
}

fn read_or<S: ServoTransport + ?Sized>(servo: &mut S, register: Register, default: u32) -> u32 {
    match servo.read_register(register) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                register = register.name(),
                error = %e,
                default,
                "limit read failed, using default"
            );
            default
        },
    }
}

/// 探测硬件限位
///
/// 每个字段独立回退到 `defaults` 中的对应值；上下限颠倒时交换。
pub fn discover<S: ServoTransport + ?Sized>(servo: &mut S, defaults: &HardwareLimits) -> HardwareLimits {
    let limits = HardwareLimits {
        min_ticks: read_or(servo, Register::MinPositionLimit, defaults.min_ticks),
        max_ticks: read_or(servo, Register::MaxPositionLimit, defaults.max_ticks),
        velocity_limit: read_or(servo, Register::VelocityLimit, defaults.velocity_limit),
        accel_limit: read_or(servo, Register::AccelLimit, defaults.accel_limit),
    }
    .normalized();

    info!(
        min_ticks = limits.min_ticks,
        max_ticks = limits.max_ticks,
        velocity_limit = limits.velocity_limit,
        accel_limit = limits.accel_limit,
        "hardware limits"
    );
    limits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DriverError, Feedback};
    use jaw_io::BusError;
    use jaw_protocol::dxl::OperatingMode;
    use std::collections::HashMap;

    /// 只实现寄存器读取的假舵机
    struct RegisterServo {
        registers: HashMap<Register, u32>,
    }

    impl RegisterServo {
        fn new(values: &[(Register, u32)]) -> Self {
            Self {
                registers: values.iter().copied().collect(),
            }
        }
    }

    impl ServoTransport for RegisterServo {
        fn set_torque(&mut self, _enable: bool) -> Result<(), DriverError> {
            Ok(())
        }
        fn set_operating_mode(&mut self, _mode: OperatingMode) -> Result<(), DriverError> {
            Ok(())
        }
        fn set_profile(&mut self, _velocity: u32, _accel: u32) -> Result<(), DriverError> {
            Ok(())
        }
        fn set_goal_position(&mut self, _ticks: u32) -> Result<(), DriverError> {
            Ok(())
        }
        fn set_watchdog(&mut self, _ticks_20ms: u8) -> Result<(), DriverError> {
            Ok(())
        }
        fn read_feedback(&mut self) -> Feedback {
            Feedback::failed()
        }
        fn read_register(&mut self, register: Register) -> Result<u32, DriverError> {
            self.registers
                .get(&register)
                .copied()
                .ok_or(DriverError::Bus(BusError::Timeout))
        }
        fn is_lost(&self) -> bool {
            false
        }
        fn reopen(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        fn release(&mut self) {}
    }

    fn defaults() -> HardwareLimits {
        HardwareLimits::fallback(50000, 30000)
    }

    #[test]
    fn test_discover_all_fields() {
        let mut servo = RegisterServo::new(&[
            (Register::MinPositionLimit, 1000),
            (Register::MaxPositionLimit, 3000),
            (Register::VelocityLimit, 265),
            (Register::AccelLimit, 32767),
        ]);
        let limits = discover(&mut servo, &defaults());
        assert_eq!(
            limits,
            HardwareLimits {
                min_ticks: 1000,
                max_ticks: 3000,
                velocity_limit: 265,
                accel_limit: 32767
            }
        );
    }

    #[test]
    fn test_discover_partial_fallback() {
        let mut servo = RegisterServo::new(&[
            (Register::MaxPositionLimit, 3000),
            (Register::VelocityLimit, 265),
        ]);
        let limits = discover(&mut servo, &defaults());
        assert_eq!(limits.min_ticks, 0);
        assert_eq!(limits.max_ticks, 3000);
        assert_eq!(limits.velocity_limit, 265);
        assert_eq!(limits.accel_limit, 30000);
    }

    #[test]
    fn test_discover_total_failure_uses_fallback() {
        let mut servo = RegisterServo::new(&[]);
        assert_eq!(discover(&mut servo, &defaults()), defaults());
    }

    #[test]
    fn test_discover_swaps_inverted_limits() {
        let mut servo = RegisterServo::new(&[
            (Register::MinPositionLimit, 3500),
            (Register::MaxPositionLimit, 500),
        ]);
        let limits = discover(&mut servo, &defaults());
        assert_eq!((limits.min_ticks, limits.max_ticks), (500, 3500));
    }
}
