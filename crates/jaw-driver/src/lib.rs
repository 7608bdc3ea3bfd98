//! # Jaw Driver
//!
//! 舵机传输层：寄存器级读写、硬件限位探测、会话初始化与关闭。
//!
//! 所有调用同步执行，只受串口事务超时约束，内部不重试；
//! 是否在下一周期重试由调用方决定。

pub mod error;
pub mod limits;
pub mod servo;
pub mod session;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::DriverError;
pub use limits::{HardwareLimits, discover};
pub use servo::{DynamixelServo, Feedback, ServoTransport};
pub use session::{InitProfile, initialize, shutdown};
