//! # Jaw Bridge
//!
//! PLC（S7 数据块或单字节 UDP）到 Dynamixel 舵机的固定周期桥接。
//!
//! ## 每周期流程
//!
//! ```text
//! 读指令 → 指令门控 → 缩放/钳位 → 写舵机 → 读反馈 → 反馈归一化 → 写状态
//! ```
//!
//! 单线程循环独占所有可变状态（门控状态、硬件限位、软件量程），不需要锁。
//! 只在周期末睡眠和带超时的 I/O 上挂起。
//!
//! ## 故障分类
//!
//! - 瞬时故障（单次读写失败）：记录日志，本周期跳过
//! - 连接丢失（链路断开、连续读失败过多、串口句柄丢失）：监督器退避重连，
//!   重新初始化舵机并复位门控状态
//! - 致命故障（启动时舵机无法配置）：返回错误，由调用方关闭力矩后退出

pub mod bridge;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod link;
pub mod normalize;
pub mod scale;
pub mod supervisor;
pub mod types;

pub use bridge::{Bridge, BridgeSettings, CycleOutcome, CycleStats, Lost};
pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BridgeConfig;
pub use error::{BridgeError, LinkError};
pub use gate::{CommandGate, GateDecision, GateState, TorqueState};
pub use link::{ControllerLink, PlcLink, UdpLink};
pub use normalize::FeedbackNormalizer;
pub use scale::{ProfileFloors, scale};
pub use supervisor::{Backoff, BackoffConfig, Supervisor};
pub use types::{ActuatorTarget, SoftwareRange};

pub use jaw_protocol::{Command, Status};
