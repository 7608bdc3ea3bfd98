//! 设定值缩放与安全钳位
//!
//! 纯函数，无副作用。所有舵机写入都在传输层完成。

use crate::types::{ActuatorTarget, SoftwareRange};
use jaw_driver::HardwareLimits;
use jaw_protocol::{Command, SETPOINT_SCALE, deg_to_tick};

/// 轮廓速度/加速度下限（Dynamixel 的 0 表示"不限速"，必须避免）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileFloors {
    pub velocity: u32,
    pub accel: u32,
}

impl Default for ProfileFloors {
    fn default() -> Self {
        Self {
            velocity: 1,
            accel: 1,
        }
    }
}

/// 设定值 → [0, 1]（先钳位到 0..=1000，越界输入不会 panic）
pub fn unit(setpoint: i16) -> f64 {
    setpoint.clamp(0, SETPOINT_SCALE) as f64 / SETPOINT_SCALE as f64
}

/// 在下限与硬件上限之间线性插值，结果钳位到 `[floor, max(floor, limit)]`
///
/// 插值结果截断取整。
pub fn profile_value(u: f64, floor: u32, limit: u32) -> u32 {
    let ceiling = limit.max(floor);
    let value = floor as f64 + u * (ceiling - floor) as f64;
    (value as u32).clamp(floor, ceiling)
}

/// 归一化位置 → 软件窗口内的角度
pub fn position_deg(u: f64, invert: bool, range: &SoftwareRange) -> f64 {
    let u = if invert { 1.0 - u } else { u };
    range.min_deg() + u * range.span()
}

/// 指令 → 舵机目标
pub fn scale(
    cmd: &Command,
    limits: &HardwareLimits,
    range: &SoftwareRange,
    floors: &ProfileFloors,
) -> ActuatorTarget {
    let deg = position_deg(unit(cmd.position_sp), cmd.invert, range);
    let goal_ticks = deg_to_tick(deg).clamp(limits.min_ticks, limits.max_ticks);

    ActuatorTarget {
        goal_ticks,
        profile_velocity: profile_value(unit(cmd.velocity_sp), floors.velocity, limits.velocity_limit),
        profile_accel: profile_value(unit(cmd.accel_sp), floors.accel, limits.accel_limit),
    }
}
