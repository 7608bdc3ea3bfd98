//! # Jaw Bridge CLI
//!
//! PLC 到 Dynamixel 夹爪舵机的桥接程序。
//!
//! ```bash
//! # S7 PLC 数据块
//! jaw-bridge -c jaw.toml plc --host 192.168.0.10
//!
//! # 单字节 UDP（手动测试）
//! jaw-bridge --device /dev/ttyUSB0 udp --bind 0.0.0.0:5006 --invert
//!
//! # 打印生效配置
//! jaw-bridge -c jaw.toml --hz 50 config
//! ```
//!
//! 日志级别由 `RUST_LOG` 控制，`-v` 提升默认级别到 debug。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ActuatorArgs, PlcArgs, UdpArgs};

/// Jaw Bridge - PLC → Dynamixel 舵机桥
#[derive(Parser, Debug)]
#[command(name = "jaw-bridge")]
#[command(about = "Bridge a PLC (S7 data blocks or UDP bytes) to a Dynamixel servo", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件（TOML）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    actuator: ActuatorArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 通过 S7 数据块桥接
    Plc {
        #[command(flatten)]
        args: PlcArgs,
    },

    /// 通过单字节 UDP 桥接
    Udp {
        #[command(flatten)]
        args: UdpArgs,
    },

    /// 打印生效配置（TOML）
    Config,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "jaw_bridge={level},jaw_driver={level},jaw_io={level}"
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = commands::load_config(cli.config.as_deref())?;
    cli.actuator.apply(&mut config);

    match cli.command {
        Commands::Plc { args } => {
            args.apply(&mut config);
            commands::validate(&config)?;
            commands::run_plc(&config)
        },

        Commands::Udp { args } => {
            args.apply(&mut config);
            commands::validate(&config)?;
            commands::run_udp(&config)
        },

        Commands::Config => {
            commands::validate(&config)?;
            print!("{}", config.to_toml()?);
            Ok(())
        },
    }
}
