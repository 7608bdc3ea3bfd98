//! 桥接层数据类型

/// 软件角度窗口（度）
///
/// 构造时归一化，保证 `min_deg <= max_deg`，与输入顺序无关。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftwareRange {
    min_deg: f64,
    max_deg: f64,
}

impl SoftwareRange {
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            min_deg: a.min(b),
            max_deg: a.max(b),
        }
    }

    pub fn min_deg(&self) -> f64 {
        self.min_deg
    }

    pub fn max_deg(&self) -> f64 {
        self.max_deg
    }

    pub fn span(&self) -> f64 {
        self.max_deg - self.min_deg
    }
}

/// 一条被接受指令的舵机目标（只在当前周期有效）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorTarget {
    /// 已钳位到硬件位置限位
    pub goal_ticks: u32,
    /// 已钳位到 `[floor, velocity_limit]`
    pub profile_velocity: u32,
    /// 已钳位到 `[floor, accel_limit]`
    pub profile_accel: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_range_normalizes_order() {
        let range = SoftwareRange::new(245.0, 200.0);
        assert_eq!(range.min_deg(), 200.0);
        assert_eq!(range.max_deg(), 245.0);
        assert_eq!(range.span(), 45.0);
        assert_eq!(range, SoftwareRange::new(200.0, 245.0));
    }
}
