//! 反馈归一化：舵机原始反馈 → 0..=1000 的状态值

use crate::types::SoftwareRange;
use jaw_driver::Feedback;
use jaw_protocol::{SETPOINT_SCALE, tick_to_deg};

const FULL_SCALE: f64 = SETPOINT_SCALE as f64;

/// 位置刻度 → 0..=1000
///
/// 角度先钳位到软件窗口，再按与正向缩放相同的反转方向映射。
/// 窗口宽度为 0 时归一化值为 0。
pub fn normalize_position(ticks: u32, range: &SoftwareRange, invert: bool) -> u16 {
    let deg = tick_to_deg(ticks).clamp(range.min_deg(), range.max_deg());
    let span = range.span();
    let u = if span > 0.0 {
        (deg - range.min_deg()) / span
    } else {
        0.0
    };
    let u = if invert { 1.0 - u } else { u };
    (u * FULL_SCALE).round().clamp(0.0, FULL_SCALE) as u16
}

/// 速度原始值 → 0..=1000（取绝对值，相对硬件速度上限）
pub fn normalize_velocity(raw: i32, velocity_limit: u32) -> u16 {
    let limit = velocity_limit.max(1) as f64;
    let v = (raw.unsigned_abs() as f64 / limit * FULL_SCALE).round();
    v.clamp(0.0, FULL_SCALE) as u16
}

/// 带"最后有效值"保持的反馈归一化
///
/// 读取失败时沿用上次成功的结果，避免向控制器报告虚假的零位。
#[derive(Debug, Default, Clone)]
pub struct FeedbackNormalizer {
    last_position: u16,
    last_velocity: u16,
}

impl FeedbackNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(
        &mut self,
        fb: &Feedback,
        range: &SoftwareRange,
        invert: bool,
        velocity_limit: u32,
    ) -> (u16, u16) {
        if fb.read_ok {
            self.last_position = normalize_position(fb.position_ticks, range, invert);
            self.last_velocity = normalize_velocity(fb.velocity_raw, velocity_limit);
        }
        (self.last_position, self.last_velocity)
    }

    pub fn last(&self) -> (u16, u16) {
        (self.last_position, self.last_velocity)
    }
}
