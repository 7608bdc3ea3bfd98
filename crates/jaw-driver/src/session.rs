//! 会话初始化与关闭
//!
//! 初始化顺序：
//! 1. 关闭力矩（EEPROM 寄存器只能在力矩关闭时写入）
//! 2. 关闭总线看门狗（避免初始化期间触发）
//! 3. 设置位置控制模式
//! 4. 探测硬件限位
//! 5. 写入钳位后的初始轮廓
//! 6. 重新启用看门狗
//! 7. 开启力矩

use crate::{DriverError, HardwareLimits, ServoTransport, discover};
use jaw_protocol::dxl::OperatingMode;
use tracing::{info, warn};

/// 初始化参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitProfile {
    pub velocity_floor: u32,
    pub accel_floor: u32,
    pub velocity_default: u32,
    pub accel_default: u32,
    /// 总线看门狗（N × 20ms，0 = 关闭）
    pub watchdog_20ms: u8,
}

impl Default for InitProfile {
    fn default() -> Self {
        Self {
            velocity_floor: 1,
            accel_floor: 1,
            velocity_default: 50000,
            accel_default: 30000,
            watchdog_20ms: 3,
        }
    }
}

impl InitProfile {
    /// 限位探测失败时使用的默认值
    pub fn fallback_limits(&self) -> HardwareLimits {
        HardwareLimits::fallback(self.velocity_default, self.accel_default)
    }

    /// 初始轮廓：默认值钳位到 `[floor, hw_limit]`
    pub fn initial_profile(&self, limits: &HardwareLimits) -> (u32, u32) {
        (
            clamp_to_ceiling(self.velocity_default, self.velocity_floor, limits.velocity_limit),
            clamp_to_ceiling(self.accel_default, self.accel_floor, limits.accel_limit),
        )
    }
}

/// 钳位到 `[floor, max(floor, ceiling)]`（硬件上限低于下限时以下限为准）
pub fn clamp_to_ceiling(value: u32, floor: u32, ceiling: u32) -> u32 {
    value.clamp(floor, ceiling.max(floor))
}

/// 非关键步骤：串口丢失时中止，其余错误只记录
fn best_effort(result: Result<(), DriverError>, step: &str) -> Result<(), DriverError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_connection_lost() => Err(e),
        Err(e) => {
            warn!(step, error = %e, hardware_code = ?e.hardware_code(), "servo init step failed");
            Ok(())
        },
    }
}

/// 执行完整初始化序列，返回本会话的硬件限位
///
/// # 错误
/// - 串口丢失：返回对应的 `DriverError::Bus`
/// - 无法切换到位置模式：`DriverError::Configuration`（启动时为致命错误）
pub fn initialize<S: ServoTransport + ?Sized>(
    servo: &mut S,
    profile: &InitProfile,
) -> Result<HardwareLimits, DriverError> {
    best_effort(servo.set_torque(false), "torque off")?;
    best_effort(servo.set_watchdog(0), "watchdog off")?;

    if let Err(e) = servo.set_operating_mode(OperatingMode::Position) {
        if e.is_connection_lost() {
            return Err(e);
        }
        return Err(DriverError::Configuration(format!(
            "cannot set position control mode: {e}"
        )));
    }

    let limits = discover(servo, &profile.fallback_limits());

    let (velocity, accel) = profile.initial_profile(&limits);
    best_effort(servo.set_profile(velocity, accel), "initial profile")?;

    if profile.watchdog_20ms > 0 {
        best_effort(servo.set_watchdog(profile.watchdog_20ms), "watchdog on")?;
    }

    best_effort(servo.set_torque(true), "torque on")?;

    info!(
        velocity,
        accel,
        watchdog_20ms = profile.watchdog_20ms,
        "servo initialized"
    );
    Ok(limits)
}

/// 关闭：先关力矩，再释放句柄。尽力而为，错误只记录
pub fn shutdown<S: ServoTransport + ?Sized>(servo: &mut S) {
    if let Err(e) = servo.set_torque(false) {
        warn!(error = %e, "torque off on shutdown failed");
    }
    servo.release();
    info!("servo released");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockServo, ServoCall};
    use jaw_protocol::dxl::Register;

    #[test]
    fn test_initialize_order() {
        let mut servo = MockServo::new();
        servo.set_register(Register::VelocityLimit, 265);
        servo.set_register(Register::AccelLimit, 32767);

        let limits = initialize(&mut servo, &InitProfile::default()).unwrap();
        assert_eq!(limits.velocity_limit, 265);

        assert_eq!(
            servo.calls(),
            &[
                ServoCall::Torque(false),
                ServoCall::Watchdog(0),
                ServoCall::OperatingMode(OperatingMode::Position),
                ServoCall::ReadRegister(Register::MinPositionLimit),
                ServoCall::ReadRegister(Register::MaxPositionLimit),
                ServoCall::ReadRegister(Register::VelocityLimit),
                ServoCall::ReadRegister(Register::AccelLimit),
                // 默认值 50000/30000 被钳位到硬件上限
                ServoCall::Profile {
                    velocity: 265,
                    accel: 30000
                },
                ServoCall::Watchdog(3),
                ServoCall::Torque(true),
            ]
        );
    }

    #[test]
    fn test_initialize_without_watchdog() {
        let mut servo = MockServo::new();
        let profile = InitProfile {
            watchdog_20ms: 0,
            ..InitProfile::default()
        };
        initialize(&mut servo, &profile).unwrap();
        let watchdogs: Vec<_> = servo
            .calls()
            .iter()
            .filter(|c| matches!(c, ServoCall::Watchdog(_)))
            .collect();
        assert_eq!(watchdogs, vec![&ServoCall::Watchdog(0)]);
    }

    #[test]
    fn test_initialize_mode_failure_is_configuration_error() {
        let mut servo = MockServo::new();
        servo.fail_operating_mode(true);
        let err = initialize(&mut servo, &InitProfile::default()).unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
        // 未开启力矩
        assert!(!servo.calls().contains(&ServoCall::Torque(true)));
    }

    #[test]
    fn test_initialize_lost_port_aborts() {
        let mut servo = MockServo::new();
        servo.set_lost(true);
        let err = initialize(&mut servo, &InitProfile::default()).unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[test]
    fn test_initial_profile_floor_above_limit() {
        let profile = InitProfile {
            velocity_floor: 500,
            ..InitProfile::default()
        };
        let limits = HardwareLimits::fallback(100, 100);
        // 硬件上限低于下限：取下限，不 panic
        assert_eq!(profile.initial_profile(&limits), (500, 100));
    }

    #[test]
    fn test_shutdown_swallows_errors() {
        let mut servo = MockServo::new();
        servo.set_lost(true);
        shutdown(&mut servo);
        assert_eq!(
            servo.calls(),
            &[ServoCall::Torque(false), ServoCall::Release]
        );
    }
}
