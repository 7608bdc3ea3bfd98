//! 桥接运行：打开舵机、建立控制器链路、安装信号处理并进入主循环

use anyhow::{Context, Result};
use jaw_bridge::{
    Bridge, BridgeConfig, BridgeSettings, CancellationToken, ControllerLink, PlcLink,
    SystemClock, UdpLink,
};
use jaw_driver::DynamixelServo;
use jaw_io::{S7Client, SerialServoBus};
use tracing::{info, warn};

pub fn run_plc(config: &BridgeConfig) -> Result<()> {
    let plc = &config.plc;
    let client = S7Client::new(plc.host.as_str(), plc.rack, plc.slot, config.plc_timeout())
        .with_port(plc.port);
    let link = PlcLink::new(client, plc.command.clone(), plc.status.clone());
    run_bridge(config, link)
}

pub fn run_udp(config: &BridgeConfig) -> Result<()> {
    let udp = &config.udp;
    let link = UdpLink::new(udp.bind.as_str(), udp.invert, udp.velocity_sp, udp.accel_sp);
    run_bridge(config, link)
}

/// 打开串口并确认舵机在线（失败为致命错误）
fn open_servo(config: &BridgeConfig) -> Result<DynamixelServo<SerialServoBus>> {
    let actuator = &config.actuator;
    let bus = SerialServoBus::open(
        actuator.device.as_str(),
        actuator.baud,
        config.actuator_timeout(),
    )
    .with_context(|| format!("cannot open servo port {}", actuator.device))?;

    let mut servo = DynamixelServo::new(bus, actuator.id);
    servo.ping().with_context(|| {
        format!(
            "servo id {} did not answer on {} at {} baud",
            actuator.id, actuator.device, actuator.baud
        )
    })?;

    match servo.hardware_error_status() {
        Ok(status) => {
            let faults = status.active_faults();
            if !faults.is_empty() {
                warn!(?faults, "servo reports hardware errors");
            }
        },
        Err(e) => warn!(error = %e, "cannot read hardware error status"),
    }

    info!(
        device = %actuator.device,
        baud = actuator.baud,
        id = actuator.id,
        "servo online"
    );
    Ok(servo)
}

fn run_bridge<L: ControllerLink>(config: &BridgeConfig, link: L) -> Result<()> {
    let servo = open_servo(config)?;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        info!("interrupt received, shutting down");
        handler_token.cancel();
    })
    .context("failed to install signal handler")?;

    let settings = BridgeSettings::from_config(config);
    info!(
        link = %link.describe(),
        frequency_hz = config.control.frequency_hz,
        min_deg = settings.range.min_deg(),
        max_deg = settings.range.max_deg(),
        "starting bridge"
    );

    let mut bridge = Bridge::new(servo, link, SystemClock::new(), settings);
    let stats = bridge.run(&token).context("bridge stopped")?;

    info!(
        cycles = stats.cycles,
        overruns = stats.overruns,
        reconnects = stats.reconnects,
        "bye"
    );
    Ok(())
}
