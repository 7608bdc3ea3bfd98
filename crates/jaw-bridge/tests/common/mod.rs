//! 集成测试共用的脚本化链路

#![allow(dead_code)]

use jaw_bridge::{
    Bridge, BridgeSettings, CancellationToken, Command, ControllerLink, LinkError, ManualClock,
    Status,
};
use jaw_driver::mock::MockServo;
use std::collections::VecDeque;
use std::time::Duration;

pub type TestBridge = Bridge<MockServo, ScriptedLink, ManualClock>;

/// 按脚本返回指令的控制器链路
///
/// 脚本读完后返回 `Ok(None)`，并在设置了取消令牌时取消运行。
/// 每次读指令可以推进共享时钟，模拟 PLC 读写耗时。
#[derive(Default)]
pub struct ScriptedLink {
    pub reads: VecDeque<Result<Option<Command>, LinkError>>,
    pub read_delays: VecDeque<Duration>,
    pub connect_results: VecDeque<Result<(), LinkError>>,
    pub status_results: VecDeque<Result<(), LinkError>>,
    pub statuses: Vec<Status>,
    pub connects: u32,
    pub connect_attempts: u32,
    pub disconnects: u32,
    pub clock: Option<ManualClock>,
    pub cancel_when_done: Option<CancellationToken>,
    /// 第 N 次连接尝试时取消
    pub cancel_on_connect: Option<(u32, CancellationToken)>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, cmd: Command) -> Self {
        self.reads.push_back(Ok(Some(cmd)));
        self
    }

    pub fn nothing(mut self) -> Self {
        self.reads.push_back(Ok(None));
        self
    }

    pub fn fail(mut self, err: LinkError) -> Self {
        self.reads.push_back(Err(err));
        self
    }

    pub fn commands(mut self, cmds: impl IntoIterator<Item = Command>) -> Self {
        self.reads.extend(cmds.into_iter().map(|c| Ok(Some(c))));
        self
    }

    pub fn with_clock(mut self, clock: &ManualClock) -> Self {
        self.clock = Some(clock.clone());
        self
    }

    pub fn cancel_when_done(mut self, token: &CancellationToken) -> Self {
        self.cancel_when_done = Some(token.clone());
        self
    }
}

impl ControllerLink for ScriptedLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        self.connect_attempts += 1;
        if let Some((n, token)) = &self.cancel_on_connect
            && self.connect_attempts >= *n
        {
            token.cancel();
        }
        let result = self.connect_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.connects += 1;
        }
        result
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
    }

    fn read_command(&mut self) -> Result<Option<Command>, LinkError> {
        if let (Some(clock), Some(delay)) = (&self.clock, self.read_delays.pop_front()) {
            clock.advance(delay);
        }
        match self.reads.pop_front() {
            Some(step) => step,
            None => {
                if let Some(token) = &self.cancel_when_done {
                    token.cancel();
                }
                Ok(None)
            },
        }
    }

    fn write_status(&mut self, status: &Status) -> Result<(), LinkError> {
        self.statuses.push(*status);
        self.status_results.pop_front().unwrap_or(Ok(()))
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

pub fn cmd(position_sp: i16, enable: bool, sequence: u16) -> Command {
    Command {
        position_sp,
        velocity_sp: 1000,
        accel_sp: 1000,
        invert: false,
        enable,
        sequence,
    }
}

pub fn settings() -> BridgeSettings {
    BridgeSettings::default()
}

/// 已完成启动并清空调用记录的桥
pub fn started(link: ScriptedLink) -> TestBridge {
    started_with(link, MockServo::new(), settings())
}

pub fn started_with(link: ScriptedLink, servo: MockServo, settings: BridgeSettings) -> TestBridge {
    let mut bridge = Bridge::new(servo, link, ManualClock::new(), settings);
    bridge.start(&CancellationToken::new()).unwrap();
    bridge.servo_mut().clear_calls();
    bridge
}
