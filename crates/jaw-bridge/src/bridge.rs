//! 固定周期桥接循环
//!
//! 每周期严格按顺序执行：
//!
//! ```text
//! read_command → gate → scale → set_profile/set_goal_position
//!              → read_feedback → normalize → write_status
//! ```
//!
//! 周期调度使用绝对锚点：`next_tick += period`，睡眠到锚点；
//! 超时（overrun）时不睡眠并把锚点重置到当前时间，不追赶也不累积漂移。
//!
//! 连接丢失（链路断开、连续读失败过多、串口句柄丢失）交给监督器处理：
//! 等待一个退避间隔，重连，重新初始化舵机（含限位探测），复位门控状态。
//! 这是唯一会复位会话状态的路径。

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, LinkError};
use crate::gate::{CommandGate, GateState};
use crate::link::ControllerLink;
use crate::normalize::FeedbackNormalizer;
use crate::scale::{ProfileFloors, scale};
use crate::supervisor::{BackoffConfig, Supervisor, wait};
use crate::types::SoftwareRange;
use jaw_driver::{DriverError, HardwareLimits, InitProfile, ServoTransport, initialize};
use jaw_protocol::{Command, Status};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 循环参数（会话内不变）
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub range: SoftwareRange,
    pub floors: ProfileFloors,
    pub init: InitProfile,
    pub period: Duration,
    /// 连续指令读取失败超过该值视为连接丢失（0 = 不升级）
    pub max_consecutive_failures: u32,
    pub failure_log_interval: u32,
    pub backoff: BackoffConfig,
}

impl BridgeSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            range: config.software_range(),
            floors: config.floors(),
            init: config.init_profile(),
            period: config.period(),
            max_consecutive_failures: config.control.max_consecutive_failures,
            failure_log_interval: config.control.failure_log_interval.max(1),
            backoff: config.backoff(),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

/// 丢失的连接
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lost {
    Controller,
    Actuator,
}

/// 单周期结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    /// 需要监督器重连
    Escalate(Lost),
}

/// 运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub overruns: u64,
    /// 被接受并下发的指令数
    pub accepted: u64,
    pub transient_failures: u64,
    pub reconnects: u64,
}

/// 连续失败计数：首次失败与之后每 N 次记录一次，恢复时记录一次
#[derive(Debug)]
struct FailureStreak {
    what: &'static str,
    count: u32,
    log_interval: u32,
}

impl FailureStreak {
    fn new(what: &'static str, log_interval: u32) -> Self {
        Self {
            what,
            count: 0,
            log_interval: log_interval.max(1),
        }
    }

    fn fail(&mut self, error: &dyn Display) -> u32 {
        self.count = self.count.saturating_add(1);
        if self.count == 1 || self.count % self.log_interval == 0 {
            warn!(what = self.what, consecutive = self.count, error = %error, "transient failure");
        }
        self.count
    }

    fn succeed(&mut self) {
        if self.count > 0 {
            info!(what = self.what, after = self.count, "recovered");
            self.count = 0;
        }
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// 会话开始：必要时重开串口，然后执行完整初始化序列
fn open_session<S: ServoTransport + ?Sized>(
    servo: &mut S,
    init: &InitProfile,
) -> Result<HardwareLimits, DriverError> {
    if servo.is_lost() {
        servo.reopen()?;
    }
    initialize(servo, init)
}

/// PLC ↔ 舵机桥
pub struct Bridge<S: ServoTransport, L: ControllerLink, C: Clock> {
    servo: S,
    link: L,
    clock: C,
    settings: BridgeSettings,
    supervisor: Supervisor,
    gate: CommandGate,
    normalizer: FeedbackNormalizer,
    limits: HardwareLimits,
    /// 最近一次写入舵机的力矩值（写失败同样更新）
    torque_on: bool,
    /// 会话初始化后力矩为开，而门控复位为禁用；首条指令为禁用时补写一次关力矩
    torque_sync_pending: bool,
    /// 最近一条指令的反转标志，反馈归一化使用
    last_invert: bool,
    command_failures: FailureStreak,
    status_failures: FailureStreak,
    actuator_failures: FailureStreak,
    feedback_failures: FailureStreak,
    stats: CycleStats,
}

impl<S: ServoTransport, L: ControllerLink, C: Clock> Bridge<S, L, C> {
    pub fn new(servo: S, link: L, clock: C, settings: BridgeSettings) -> Self {
        let interval = settings.failure_log_interval;
        Self {
            servo,
            link,
            clock,
            supervisor: Supervisor::new(settings.backoff),
            limits: settings.init.fallback_limits(),
            settings,
            gate: CommandGate::new(),
            normalizer: FeedbackNormalizer::new(),
            torque_on: false,
            torque_sync_pending: false,
            last_invert: false,
            command_failures: FailureStreak::new("command read", interval),
            status_failures: FailureStreak::new("status write", interval),
            actuator_failures: FailureStreak::new("servo write", interval),
            feedback_failures: FailureStreak::new("feedback read", interval),
            stats: CycleStats::default(),
        }
    }

    pub fn servo(&self) -> &S {
        &self.servo
    }

    pub fn servo_mut(&mut self) -> &mut S {
        &mut self.servo
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn limits(&self) -> &HardwareLimits {
        &self.limits
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    // ========================================================================
    // 启动与会话
    // ========================================================================

    /// 启动：连接控制器（监督重试），然后初始化舵机
    ///
    /// 舵机初始化失败为致命错误，直接返回。
    pub fn start(&mut self, token: &CancellationToken) -> Result<(), BridgeError> {
        info!(link = %self.link.describe(), "connecting controller link");
        self.supervisor
            .retry(&self.clock, token, "controller connect", || self.link.connect())?;

        let limits = open_session(&mut self.servo, &self.settings.init)?;
        self.begin_session(limits);
        Ok(())
    }

    fn begin_session(&mut self, limits: HardwareLimits) {
        self.limits = limits;
        self.gate.reset();
        self.torque_on = true;
        self.torque_sync_pending = true;
        self.command_failures.reset();
        self.status_failures.reset();
        self.actuator_failures.reset();
        self.feedback_failures.reset();
        info!(
            min_ticks = limits.min_ticks,
            max_ticks = limits.max_ticks,
            velocity_limit = limits.velocity_limit,
            accel_limit = limits.accel_limit,
            "session started"
        );
    }

    /// 监督重连：断开、等待一个退避间隔、重连，然后开始新会话
    pub fn recover(&mut self, lost: Lost, token: &CancellationToken) -> Result<(), BridgeError> {
        self.stats.reconnects += 1;
        match lost {
            Lost::Controller => {
                warn!(link = %self.link.describe(), "controller connection lost, reconnecting");
                self.link.disconnect();
                wait(&self.clock, token, self.settings.backoff.initial)?;
                self.supervisor
                    .retry(&self.clock, token, "controller reconnect", || self.link.connect())?;
            },
            Lost::Actuator => {
                warn!("servo port lost, reopening");
                wait(&self.clock, token, self.settings.backoff.initial)?;
            },
        }

        let limits = self.supervisor.retry(&self.clock, token, "servo session", || {
            open_session(&mut self.servo, &self.settings.init)
        })?;
        self.begin_session(limits);
        Ok(())
    }

    // ========================================================================
    // 单周期
    // ========================================================================

    /// 执行一个控制周期（不睡眠）
    pub fn cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;

        // 1. 读指令
        let (command, sw_ok) = match self.link.read_command() {
            Ok(cmd) => {
                self.command_failures.succeed();
                (cmd, true)
            },
            Err(LinkError::Disconnected(reason)) => {
                error!(reason = %reason, "controller link disconnected");
                return CycleOutcome::Escalate(Lost::Controller);
            },
            Err(e) => {
                self.stats.transient_failures += 1;
                let streak = self.command_failures.fail(&e);
                let limit = self.settings.max_consecutive_failures;
                if limit > 0 && streak > limit {
                    error!(consecutive = streak, "too many consecutive command read failures");
                    return CycleOutcome::Escalate(Lost::Controller);
                }
                (None, false)
            },
        };

        // 2. 门控、缩放、下发
        if let Some(cmd) = command {
            self.apply_command(&cmd);
        }

        // 3. 反馈（无论是否有新指令）
        let feedback = self.servo.read_feedback();
        if feedback.read_ok {
            self.feedback_failures.succeed();
        } else {
            self.stats.transient_failures += 1;
            self.feedback_failures.fail(&"no status packet");
        }
        if feedback.alert {
            debug!("servo hardware alert bit set");
        }

        // 4. 归一化
        let (position_fb, velocity_fb) = self.normalizer.normalize(
            &feedback,
            &self.settings.range,
            self.last_invert,
            self.limits.velocity_limit,
        );

        // 5. 回写状态
        let status = Status {
            position_fb,
            velocity_fb,
            ack_sequence: self.gate.ack_sequence(),
            hw_ok: feedback.read_ok && self.torque_on && !feedback.alert,
            sw_ok,
            timestamp_ms: self.clock.unix_millis(),
        };
        match self.link.write_status(&status) {
            Ok(()) => self.status_failures.succeed(),
            Err(LinkError::Disconnected(reason)) => {
                error!(reason = %reason, "controller link disconnected on status write");
                return CycleOutcome::Escalate(Lost::Controller);
            },
            Err(e) => {
                self.stats.transient_failures += 1;
                self.status_failures.fail(&e);
            },
        }
        trace!(?status, "cycle");

        if self.servo.is_lost() {
            error!("servo serial port lost");
            return CycleOutcome::Escalate(Lost::Actuator);
        }
        CycleOutcome::Continue
    }

    fn apply_command(&mut self, cmd: &Command) {
        self.last_invert = cmd.invert;

        let decision = self.gate.evaluate(cmd.enable, cmd.sequence);
        match decision.torque {
            Some(on) => self.write_torque(on),
            None if self.torque_sync_pending && !cmd.enable => self.write_torque(false),
            None => {},
        }
        self.torque_sync_pending = false;

        if !decision.apply {
            return;
        }

        let target = scale(cmd, &self.limits, &self.settings.range, &self.settings.floors);
        debug!(
            sequence = cmd.sequence,
            goal_ticks = target.goal_ticks,
            profile_velocity = target.profile_velocity,
            profile_accel = target.profile_accel,
            "command accepted"
        );

        let written = self
            .servo
            .set_profile(target.profile_velocity, target.profile_accel)
            .and_then(|()| self.servo.set_goal_position(target.goal_ticks));
        match written {
            Ok(()) => self.actuator_failures.succeed(),
            Err(e) => {
                self.stats.transient_failures += 1;
                self.actuator_failures.fail(&e);
            },
        }

        // 写失败同样视为已消费，下一条指令会带新的序列号
        self.gate.mark_applied(cmd.sequence);
        self.stats.accepted += 1;
    }

    fn write_torque(&mut self, on: bool) {
        match self.servo.set_torque(on) {
            Ok(()) => info!(on, "torque"),
            Err(e) => warn!(on, error = %e, hardware_code = ?e.hardware_code(), "torque write failed"),
        }
        self.torque_on = on;
    }

    // ========================================================================
    // 主循环
    // ========================================================================

    /// 启动并运行直到取消
    ///
    /// 无论如何退出都会执行关闭序列（关力矩、释放串口、断开链路）。
    /// 取消视为正常退出，返回运行统计。
    pub fn run(&mut self, token: &CancellationToken) -> Result<CycleStats, BridgeError> {
        let result = self.start(token).and_then(|()| self.run_loop(token));
        self.shutdown();
        match result {
            Ok(()) | Err(BridgeError::Cancelled) => Ok(self.stats),
            Err(e) => Err(e),
        }
    }

    fn run_loop(&mut self, token: &CancellationToken) -> Result<(), BridgeError> {
        let period = self.settings.period;
        let interval = u64::from(self.settings.failure_log_interval);
        let mut next_tick = self.clock.now();

        while !token.is_cancelled() {
            next_tick += period;

            if let CycleOutcome::Escalate(lost) = self.cycle() {
                self.recover(lost, token)?;
                next_tick = self.clock.now();
                continue;
            }

            let now = self.clock.now();
            if next_tick > now {
                self.clock.sleep(next_tick - now);
            } else {
                self.stats.overruns += 1;
                if self.stats.overruns == 1 || self.stats.overruns % interval == 0 {
                    warn!(
                        late_us = (now - next_tick).as_micros() as u64,
                        period_us = period.as_micros() as u64,
                        overruns = self.stats.overruns,
                        "control loop overrun"
                    );
                }
                next_tick = now;
            }
        }
        Ok(())
    }

    /// 关闭：关力矩并释放串口，断开链路
    pub fn shutdown(&mut self) {
        jaw_driver::shutdown(&mut self.servo);
        self.torque_on = false;
        self.link.disconnect();
        info!(
            cycles = self.stats.cycles,
            overruns = self.stats.overruns,
            accepted = self.stats.accepted,
            transient_failures = self.stats.transient_failures,
            reconnects = self.stats.reconnects,
            "bridge stopped"
        );
    }
}
