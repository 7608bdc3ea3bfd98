//! 指令门控
//!
//! 两个相互独立的判断：
//! - 使能边沿：`enable` 由假变真时开力矩，由真变假时关力矩，重复值不产生写入
//! - 新指令判断：`enable` 为真且序列号与上次应用的不同，才下发到舵机
//!
//! 序列号只当作不透明的新旧标记，不假设递增（16 位回绕）。

/// 力矩状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TorqueState {
    #[default]
    Disabled,
    Enabled,
}

impl TorqueState {
    /// 根据 `enable` 转移，返回需要写入的力矩值（无边沿时为 `None`）
    pub fn transition(&mut self, enable: bool) -> Option<bool> {
        match (*self, enable) {
            (TorqueState::Disabled, true) => {
                *self = TorqueState::Enabled;
                Some(true)
            },
            (TorqueState::Enabled, false) => {
                *self = TorqueState::Disabled;
                Some(false)
            },
            _ => None,
        }
    }

    pub fn is_enabled(self) -> bool {
        self == TorqueState::Enabled
    }
}

/// 门控状态（会话内保持，重连时复位为 `{false, None}`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateState {
    pub torque_enabled: bool,
    pub last_applied_sequence: Option<u16>,
}

/// 单条指令的门控结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    /// 需要写入的力矩值
    pub torque: Option<bool>,
    /// 是否下发目标位置
    pub apply: bool,
}

/// 指令门控
#[derive(Debug, Default)]
pub struct CommandGate {
    torque: TorqueState,
    last_applied: Option<u16>,
    last_accepted: Option<u16>,
}

impl CommandGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 评估一条指令
    ///
    /// 关力矩边沿会清除 `last_applied_sequence`，重新使能后的第一条指令总会被应用，
    /// 即使其序列号与禁用前相同。
    pub fn evaluate(&mut self, enable: bool, sequence: u16) -> GateDecision {
        let torque = self.torque.transition(enable);
        if torque == Some(false) {
            self.last_applied = None;
        }

        let apply = enable && self.last_applied != Some(sequence);
        GateDecision { torque, apply }
    }

    /// 下发尝试完成后标记序列号（写失败同样视为已消费）
    pub fn mark_applied(&mut self, sequence: u16) {
        self.last_applied = Some(sequence);
        self.last_accepted = Some(sequence);
    }

    /// 上报给控制器的确认序列号：本会话最近一次被接受的指令
    pub fn ack_sequence(&self) -> u16 {
        self.last_accepted.unwrap_or(0)
    }

    pub fn torque_enabled(&self) -> bool {
        self.torque.is_enabled()
    }

    pub fn state(&self) -> GateState {
        GateState {
            torque_enabled: self.torque.is_enabled(),
            last_applied_sequence: self.last_applied,
        }
    }

    /// 会话复位
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
