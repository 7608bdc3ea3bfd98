//! 桥接配置（TOML）
//!
//! 每个字段都有默认值，配置文件只需写需要覆盖的项：
//!
//! ```toml
//! [actuator]
//! device = "/dev/ttyUSB0"
//! baud = 1000000
//!
//! [range]
//! min_deg = 200.0
//! max_deg = 245.0
//!
//! [plc.command]
//! db = 10
//! ```
//!
//! 启动时调用 [`BridgeConfig::validate`]，无效配置直接拒绝。

use crate::error::BridgeError;
use crate::scale::ProfileFloors;
use crate::supervisor::BackoffConfig;
use crate::types::SoftwareRange;
use jaw_driver::InitProfile;
use jaw_protocol::block::{CommandLayout, StatusLayout};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 最高控制频率
pub const MAX_FREQUENCY_HZ: f64 = 1000.0;

/// 最大单播舵机 ID（253 保留，254 为广播）
pub const MAX_SERVO_ID: u8 = 252;

/// 总线看门狗寄存器上限（N × 20ms）
pub const MAX_WATCHDOG_20MS: u8 = 127;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub actuator: ActuatorConfig,
    pub range: RangeConfig,
    pub profile: ProfileConfig,
    pub control: ControlConfig,
    pub supervisor: SupervisorConfig,
    pub plc: PlcConfig,
    pub udp: UdpConfig,
}

/// 串口舵机
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActuatorConfig {
    pub device: String,
    pub baud: u32,
    pub id: u8,
    /// 单次串口事务超时
    pub timeout_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".into(),
            baud: 57600,
            id: 1,
            timeout_ms: 20,
        }
    }
}

/// 软件角度窗口
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RangeConfig {
    pub min_deg: f64,
    pub max_deg: f64,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            min_deg: 200.0,
            max_deg: 245.0,
        }
    }
}

/// 轮廓下限与初始值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileConfig {
    pub velocity_floor: u32,
    pub accel_floor: u32,
    pub velocity_default: u32,
    pub accel_default: u32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            velocity_floor: 1,
            accel_floor: 1,
            velocity_default: 50000,
            accel_default: 30000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    pub frequency_hz: f64,
    /// 总线看门狗（N × 20ms，0 = 关闭）
    pub watchdog_20ms: u8,
    /// 连续指令读取失败超过该值视为连接丢失
    pub max_consecutive_failures: u32,
    /// 连续失败时每 N 次记录一次日志
    pub failure_log_interval: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 100.0,
            watchdog_20ms: 3,
            max_consecutive_failures: 50,
            failure_log_interval: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// 0 = 直到取消
    pub max_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1000,
            max_backoff_ms: 8000,
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

/// S7 PLC 连接与数据块布局
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlcConfig {
    pub host: String,
    pub port: u16,
    pub rack: u8,
    pub slot: u8,
    pub timeout_ms: u64,
    pub command: CommandLayout,
    pub status: StatusLayout,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.10".into(),
            port: jaw_protocol::s7::ISO_TCP_PORT,
            rack: 0,
            slot: 1,
            timeout_ms: 100,
            command: CommandLayout::default(),
            status: StatusLayout::default(),
        }
    }
}

/// 单字节 UDP 指令源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UdpConfig {
    pub bind: String,
    pub invert: bool,
    /// 固定速度设定值（0..=1000）
    pub velocity_sp: i16,
    /// 固定加速度设定值（0..=1000）
    pub accel_sp: i16,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", jaw_protocol::udp::DEFAULT_PORT),
            invert: false,
            velocity_sp: 1000,
            accel_sp: 1000,
        }
    }
}

fn invalid(msg: impl Into<String>) -> BridgeError {
    BridgeError::Config(msg.into())
}

impl BridgeConfig {
    /// 读取并解析配置文件（不校验）
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, BridgeError> {
        toml::from_str(text).map_err(|e| invalid(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, BridgeError> {
        toml::to_string_pretty(self).map_err(|e| invalid(e.to_string()))
    }

    /// 启动时校验
    pub fn validate(&self) -> Result<(), BridgeError> {
        let hz = self.control.frequency_hz;
        if !hz.is_finite() || hz <= 0.0 || hz > MAX_FREQUENCY_HZ {
            return Err(invalid(format!(
                "control.frequency_hz must be in (0, {MAX_FREQUENCY_HZ}], got {hz}"
            )));
        }
        if !self.range.min_deg.is_finite() || !self.range.max_deg.is_finite() {
            return Err(invalid("range.min_deg / range.max_deg must be finite"));
        }
        // 0 在 Dynamixel 轮廓寄存器中表示不限速
        if self.profile.velocity_floor == 0 || self.profile.accel_floor == 0 {
            return Err(invalid("profile floors must be >= 1"));
        }
        if self.actuator.id > MAX_SERVO_ID {
            return Err(invalid(format!("actuator.id {} out of range 0..={MAX_SERVO_ID}", self.actuator.id)));
        }
        if self.actuator.baud == 0 {
            return Err(invalid("actuator.baud must be > 0"));
        }
        if self.actuator.timeout_ms == 0 || self.plc.timeout_ms == 0 {
            return Err(invalid("timeouts must be > 0"));
        }
        if self.control.watchdog_20ms > MAX_WATCHDOG_20MS {
            return Err(invalid(format!(
                "control.watchdog_20ms must be <= {MAX_WATCHDOG_20MS}"
            )));
        }
        if self.control.failure_log_interval == 0 {
            return Err(invalid("control.failure_log_interval must be >= 1"));
        }

        let s = &self.supervisor;
        if s.initial_backoff_ms == 0 {
            return Err(invalid("supervisor.initial_backoff_ms must be > 0"));
        }
        if s.initial_backoff_ms > s.max_backoff_ms {
            return Err(invalid("supervisor.initial_backoff_ms exceeds max_backoff_ms"));
        }
        if !s.multiplier.is_finite() || s.multiplier < 1.0 {
            return Err(invalid("supervisor.multiplier must be >= 1"));
        }

        self.plc
            .command
            .validate()
            .map_err(|e| invalid(e.to_string()))?;
        self.plc
            .status
            .validate()
            .map_err(|e| invalid(e.to_string()))?;
        if self.plc.command.db == self.plc.status.db {
            let (c, s) = (&self.plc.command, &self.plc.status);
            let c_end = c.start as u64 + c.size as u64;
            let s_end = s.start as u64 + s.size as u64;
            if (c.start as u64) < s_end && (s.start as u64) < c_end {
                return Err(invalid(format!(
                    "command and status blocks overlap in DB{}",
                    c.db
                )));
            }
        }
        Ok(())
    }

    pub fn software_range(&self) -> SoftwareRange {
        SoftwareRange::new(self.range.min_deg, self.range.max_deg)
    }

    pub fn floors(&self) -> ProfileFloors {
        ProfileFloors {
            velocity: self.profile.velocity_floor,
            accel: self.profile.accel_floor,
        }
    }

    pub fn init_profile(&self) -> InitProfile {
        InitProfile {
            velocity_floor: self.profile.velocity_floor,
            accel_floor: self.profile.accel_floor,
            velocity_default: self.profile.velocity_default,
            accel_default: self.profile.accel_default,
            watchdog_20ms: self.control.watchdog_20ms,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.control.frequency_hz)
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(self.supervisor.initial_backoff_ms),
            max: Duration::from_millis(self.supervisor.max_backoff_ms),
            multiplier: self.supervisor.multiplier,
            max_attempts: self.supervisor.max_attempts,
        }
    }

    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_millis(self.actuator.timeout_ms)
    }

    pub fn plc_timeout(&self) -> Duration {
        Duration::from_millis(self.plc.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.period(), Duration::from_millis(10));
        assert_eq!(config.plc.command, CommandLayout::default());
        assert_eq!(config.udp.bind, "0.0.0.0:5006");
        assert_eq!(config.init_profile(), InitProfile::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [actuator]
            device = "/dev/ttyACM0"

            [plc.command]
            db = 10
            sequence = 10
            size = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.actuator.device, "/dev/ttyACM0");
        assert_eq!(config.actuator.baud, 57600);
        assert_eq!(config.plc.command.db, 10);
        assert_eq!(config.plc.command.sequence, 10);
        assert_eq!(config.plc.command.enable_bit, 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = BridgeConfig::from_toml_str("[control]\nfrequncy_hz = 50.0\n").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = BridgeConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(BridgeConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[range]\nmin_deg = 245.0\nmax_deg = 200.0").unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        let range = config.software_range();
        assert_eq!(range.min_deg(), 200.0);
        assert_eq!(range.max_deg(), 245.0);
    }

    #[test]
    fn test_load_missing_file() {
        let err = BridgeConfig::load("/nonexistent/jaw.toml").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn test_validate_rejects() {
        let cases: Vec<(&str, fn(&mut BridgeConfig))> = vec![
            ("zero frequency", |c| c.control.frequency_hz = 0.0),
            ("absurd frequency", |c| c.control.frequency_hz = 5000.0),
            ("nan range", |c| c.range.min_deg = f64::NAN),
            ("zero floor", |c| c.profile.velocity_floor = 0),
            ("broadcast id", |c| c.actuator.id = 254),
            ("zero timeout", |c| c.plc.timeout_ms = 0),
            ("watchdog", |c| c.control.watchdog_20ms = 200),
            ("backoff order", |c| c.supervisor.initial_backoff_ms = 10_000),
            ("multiplier", |c| c.supervisor.multiplier = 0.5),
            ("bit index", |c| c.plc.command.enable_bit = 8),
            ("field overflow", |c| c.plc.status.timestamp_ms = 10),
            ("field overlap", |c| c.plc.command.velocity_sp = 1),
            ("block overlap", |c| c.plc.status.db = 1),
        ];

        for (name, mutate) in cases {
            let mut config = BridgeConfig::default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "{name} should be rejected");
        }
    }

    #[test]
    fn test_floor_above_hardware_is_not_a_config_error() {
        let mut config = BridgeConfig::default();
        config.profile.velocity_floor = 100_000;
        config.validate().unwrap();
    }
}
