//! 重连监督器
//!
//! 指数退避重试，等待期间按小片轮询取消令牌，收到终止信号后立即返回。

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::error::BridgeError;
use std::fmt::Display;
use std::time::Duration;
use tracing::{info, warn};

/// 单次等待切片上限
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// 退避参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// 最大尝试次数（0 = 直到取消）
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(8),
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

/// 退避计数器
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: config.initial,
        }
    }

    /// 返回本次等待时长，并把下一次放大到 `min(current * multiplier, max)`
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.config.max);
        let next = delay.as_secs_f64() * self.config.multiplier.max(1.0);
        self.current = Duration::from_secs_f64(next.min(self.config.max.as_secs_f64()));
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial;
    }
}

/// 监督器
#[derive(Debug, Clone, Copy, Default)]
pub struct Supervisor {
    config: BackoffConfig,
}

impl Supervisor {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// 重复执行 `op` 直到成功、被取消或尝试次数耗尽
    ///
    /// 第一次尝试不等待。
    pub fn retry<C, T, E, F>(
        &self,
        clock: &C,
        token: &CancellationToken,
        what: &str,
        mut op: F,
    ) -> Result<T, BridgeError>
    where
        C: Clock + ?Sized,
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut backoff = Backoff::new(self.config);
        let mut attempts = 0u32;

        loop {
            if token.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }

            attempts += 1;
            match op() {
                Ok(value) => {
                    if attempts > 1 {
                        info!(what, attempts, "recovered");
                    }
                    return Ok(value);
                },
                Err(e) => {
                    if self.config.max_attempts > 0 && attempts >= self.config.max_attempts {
                        return Err(BridgeError::Exhausted {
                            what: what.to_string(),
                            attempts,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = backoff.next_delay();
                    warn!(
                        what,
                        attempts,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "attempt failed, backing off"
                    );
                    wait(clock, token, delay)?;
                },
            }
        }
    }
}

/// 可取消的等待
pub fn wait<C: Clock + ?Sized>(
    clock: &C,
    token: &CancellationToken,
    duration: Duration,
) -> Result<(), BridgeError> {
    let deadline = clock.now() + duration;
    loop {
        if token.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        let now = clock.now();
        if now >= deadline {
            return Ok(());
        }
        clock.sleep((deadline - now).min(WAIT_SLICE));
    }
}
