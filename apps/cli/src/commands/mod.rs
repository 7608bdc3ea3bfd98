//! 子命令实现与配置覆盖参数

use anyhow::{Context, Result};
use clap::Args;
use jaw_bridge::BridgeConfig;
use std::path::Path;

mod run;

pub use run::{run_plc, run_udp};

/// 舵机与控制频率覆盖（所有子命令共用）
#[derive(Args, Debug, Default)]
pub struct ActuatorArgs {
    /// 串口设备（如 /dev/ttyUSB0）
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// 波特率
    #[arg(long, global = true)]
    pub baud: Option<u32>,

    /// 舵机 ID
    #[arg(long, global = true)]
    pub id: Option<u8>,

    /// 控制频率（Hz）
    #[arg(long, global = true)]
    pub hz: Option<f64>,
}

impl ActuatorArgs {
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(device) = &self.device {
            config.actuator.device = device.clone();
        }
        if let Some(baud) = self.baud {
            config.actuator.baud = baud;
        }
        if let Some(id) = self.id {
            config.actuator.id = id;
        }
        if let Some(hz) = self.hz {
            config.control.frequency_hz = hz;
        }
    }
}

/// S7 连接覆盖
#[derive(Args, Debug, Default)]
pub struct PlcArgs {
    /// PLC 地址
    #[arg(long)]
    pub host: Option<String>,

    /// ISO-on-TCP 端口
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub rack: Option<u8>,

    #[arg(long)]
    pub slot: Option<u8>,
}

impl PlcArgs {
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(host) = &self.host {
            config.plc.host = host.clone();
        }
        if let Some(port) = self.port {
            config.plc.port = port;
        }
        if let Some(rack) = self.rack {
            config.plc.rack = rack;
        }
        if let Some(slot) = self.slot {
            config.plc.slot = slot;
        }
    }
}

/// UDP 覆盖
#[derive(Args, Debug, Default)]
pub struct UdpArgs {
    /// 监听地址（如 0.0.0.0:5006）
    #[arg(long)]
    pub bind: Option<String>,

    /// 位置字节取反（255 - b）
    #[arg(long)]
    pub invert: bool,
}

impl UdpArgs {
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(bind) = &self.bind {
            config.udp.bind = bind.clone();
        }
        if self.invert {
            config.udp.invert = true;
        }
    }
}

/// 读取配置文件；未指定时使用默认配置
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(BridgeConfig::default()),
    }
}

pub fn validate(config: &BridgeConfig) -> Result<()> {
    config.validate().context("invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_only_given_fields() {
        let mut config = BridgeConfig::default();
        ActuatorArgs {
            baud: Some(1_000_000),
            hz: Some(50.0),
            ..Default::default()
        }
        .apply(&mut config);
        PlcArgs {
            host: Some("10.0.0.2".into()),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.actuator.baud, 1_000_000);
        assert_eq!(config.actuator.device, "/dev/ttyUSB0");
        assert_eq!(config.control.frequency_hz, 50.0);
        assert_eq!(config.plc.host, "10.0.0.2");
        assert_eq!(config.plc.slot, 1);
    }

    #[test]
    fn test_udp_invert_flag_does_not_clear_file_value() {
        let mut config = BridgeConfig::default();
        config.udp.invert = true;
        UdpArgs::default().apply(&mut config);
        assert!(config.udp.invert);
    }
}
