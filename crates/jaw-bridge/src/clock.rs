//! 时钟抽象
//!
//! 桥接循环与监督器只通过 [`Clock`] 读取时间和睡眠，测试中用 [`ManualClock`]
//! 替换，不依赖真实时间。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait Clock {
    /// 单调时间（自任意起点）
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);

    /// 墙上时间（Unix 毫秒），只用于状态时间戳
    fn unix_millis(&self) -> u64;
}

/// 真实时钟
///
/// 周期睡眠使用 `spin_sleep`（微秒级精度，`thread::sleep` 约 1-2ms 抖动）。
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            spin_sleep::sleep(duration);
        }
    }

    fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// 手动时钟（测试用）
///
/// `sleep` 立即返回并把时间推进相同长度，同时记录每次睡眠时长。
/// 克隆共享同一时间线。
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
    epoch_ms: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定 `unix_millis()` 在时间 0 时的值
    pub fn with_epoch_ms(mut self, epoch_ms: u64) -> Self {
        self.epoch_ms = epoch_ms;
        self
    }

    /// 推进时间（模拟一次耗时的 I/O）
    pub fn advance(&self, duration: Duration) {
        self.nanos.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// 迄今所有睡眠时长
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
    }

    fn unix_millis(&self) -> u64 {
        self.epoch_ms + self.now().as_millis() as u64
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }

    fn unix_millis(&self) -> u64 {
        (**self).unix_millis()
    }
}
