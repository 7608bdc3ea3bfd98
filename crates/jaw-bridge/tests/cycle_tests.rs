//! 单周期行为：门控、去重、缩放、反馈与状态

mod common;

use common::{ScriptedLink, cmd, settings, started, started_with};
use jaw_bridge::{Command, CycleOutcome, GateState, LinkError};
use jaw_driver::mock::{MockServo, ServoCall};
use jaw_protocol::deg_to_tick;
use jaw_protocol::dxl::Register;

#[test]
fn test_duplicate_sequence_written_once() {
    let mut bridge = started(ScriptedLink::new().commands([cmd(500, true, 1), cmd(500, true, 1)]));

    bridge.cycle();
    bridge.cycle();

    assert_eq!(bridge.servo().goal_positions().len(), 1);
    assert_eq!(bridge.servo().profiles().len(), 1);
    assert_eq!(bridge.stats().accepted, 1);
}

#[test]
fn test_changed_sequence_written_again() {
    let mut bridge = started(ScriptedLink::new().commands([
        cmd(500, true, 1),
        cmd(500, true, 2),
        cmd(600, true, 2),
    ]));

    for _ in 0..3 {
        bridge.cycle();
    }
    // 同一序列号的第三条即使位置变化也不下发
    assert_eq!(bridge.servo().goal_positions().len(), 2);
}

#[test]
fn test_enable_edges_from_session_start() {
    let mut bridge = started(ScriptedLink::new().commands([
        cmd(0, false, 1),
        cmd(0, true, 1),
        cmd(0, true, 1),
        cmd(0, false, 1),
    ]));

    for _ in 0..4 {
        bridge.cycle();
    }
    // 初始化后力矩为开：首条禁用指令先同步一次关力矩，
    // 之后的边沿各写一次
    assert_eq!(bridge.servo().torque_writes(), vec![false, true, false]);
    assert_eq!(bridge.servo().goal_positions().len(), 1);
}

#[test]
fn test_enable_edges_after_session_sync() {
    let mut bridge = started(ScriptedLink::new().commands([
        cmd(0, true, 1),
        cmd(0, false, 1),
        cmd(0, true, 2),
        cmd(0, true, 2),
        cmd(0, false, 2),
    ]));

    bridge.cycle();
    bridge.cycle();
    bridge.servo_mut().clear_calls();

    // false→true→true→false：一次开，一次关
    for _ in 0..3 {
        bridge.cycle();
    }
    assert_eq!(bridge.servo().torque_writes(), vec![true, false]);
}

#[test]
fn test_session_sync_writes_torque_off_once() {
    let mut bridge = started(ScriptedLink::new().commands((1..=4).map(|s| cmd(0, false, s))));
    for _ in 0..4 {
        bridge.cycle();
    }
    assert_eq!(bridge.servo().torque_writes(), vec![false]);
}

#[test]
fn test_first_enabled_command_does_not_double_write_torque() {
    let mut bridge = started(ScriptedLink::new().commands([cmd(0, true, 1), cmd(0, true, 2)]));
    bridge.cycle();
    bridge.cycle();
    assert_eq!(bridge.servo().torque_writes(), vec![true]);
}

#[test]
fn test_reenable_applies_stale_sequence() {
    let mut bridge = started(ScriptedLink::new().commands([
        cmd(300, true, 5),
        cmd(300, false, 6),
        cmd(300, true, 6),
    ]));

    for _ in 0..3 {
        bridge.cycle();
    }
    assert_eq!(bridge.servo().goal_positions().len(), 2);
    assert_eq!(
        bridge.gate_state(),
        GateState {
            torque_enabled: true,
            last_applied_sequence: Some(6),
        }
    );
}

#[test]
fn test_disabled_commands_never_move() {
    let mut bridge = started(ScriptedLink::new().commands((1..=5).map(|s| cmd(1000, false, s))));
    for _ in 0..5 {
        bridge.cycle();
    }
    assert!(bridge.servo().goal_positions().is_empty());
    assert_eq!(bridge.link().statuses.last().map(|s| s.ack_sequence), Some(0));
}

#[test]
fn test_scenario_invert_flips_endpoints() {
    let inverted = Command {
        invert: true,
        ..cmd(1000, true, 2)
    };
    let mut bridge = started(ScriptedLink::new().command(cmd(0, true, 1)).command(inverted));

    bridge.cycle();
    bridge.cycle();

    let expected = deg_to_tick(200.0);
    assert!((2275..=2276).contains(&expected));
    assert_eq!(bridge.servo().goal_positions(), vec![expected, expected]);

    // 反馈与正向使用同一反转标志
    let status = bridge.link().statuses[1];
    assert!(status.position_fb >= 999);
}

#[test]
fn test_goal_clamped_to_discovered_limits() {
    let mut servo = MockServo::new();
    servo.set_register(Register::MinPositionLimit, 2400);
    servo.set_register(Register::MaxPositionLimit, 2600);
    let mut bridge = started_with(
        ScriptedLink::new().commands([cmd(0, true, 1), cmd(1000, true, 2)]),
        servo,
        settings(),
    );

    bridge.cycle();
    bridge.cycle();
    assert_eq!(bridge.servo().goal_positions(), vec![2400, 2600]);
}

#[test]
fn test_inverted_hardware_limits_are_swapped() {
    let mut servo = MockServo::new();
    servo.set_register(Register::MinPositionLimit, 3000);
    servo.set_register(Register::MaxPositionLimit, 1000);
    let bridge = started_with(ScriptedLink::new(), servo, settings());

    assert_eq!(bridge.limits().min_ticks, 1000);
    assert_eq!(bridge.limits().max_ticks, 3000);
}

#[test]
fn test_unreadable_limits_fall_back_per_field() {
    let mut servo = MockServo::new();
    servo.remove_register(Register::VelocityLimit);
    let bridge = started_with(ScriptedLink::new(), servo, settings());

    assert_eq!(bridge.limits().velocity_limit, 50000);
    assert_eq!(bridge.limits().accel_limit, 32767);
    assert_eq!(bridge.limits().max_ticks, 4095);
}

#[test]
fn test_profile_interpolates_between_floor_and_limit() {
    let slow = Command {
        velocity_sp: 0,
        accel_sp: 500,
        ..cmd(500, true, 1)
    };
    let mut bridge = started(ScriptedLink::new().command(slow));
    bridge.cycle();

    // velocity: floor 1；accel: 1 + 0.5 * (32767 - 1) = 16384
    assert_eq!(bridge.servo().profiles(), vec![(1, 16384)]);
}

#[test]
fn test_status_reports_feedback_and_ack() {
    let mut bridge = started(
        ScriptedLink::new()
            .command(cmd(1000, true, 9))
            .command(cmd(1000, false, 10)),
    );
    bridge.servo_mut().set_feedback(0, -265);

    bridge.cycle();
    let first = bridge.link().statuses[0];
    assert_eq!(first.position_fb, 1000);
    assert_eq!(first.velocity_fb, 1000);
    assert_eq!(first.ack_sequence, 9);
    assert!(first.hw_ok);
    assert!(first.sw_ok);

    bridge.cycle();
    let second = bridge.link().statuses[1];
    // 禁用后确认序号保持最近一次接受的指令
    assert_eq!(second.ack_sequence, 9);
    assert!(!second.hw_ok);
}

#[test]
fn test_failed_feedback_keeps_last_good_values() {
    let mut bridge = started(ScriptedLink::new().command(cmd(1000, true, 1)).nothing());

    bridge.cycle();
    let good = bridge.link().statuses[0];
    assert_eq!(good.position_fb, 1000);

    bridge.servo_mut().fail_feedback(true);
    bridge.cycle();
    let stale = bridge.link().statuses[1];
    assert_eq!(stale.position_fb, good.position_fb);
    assert_eq!(stale.velocity_fb, good.velocity_fb);
    assert!(!stale.hw_ok);
}

#[test]
fn test_alert_clears_hw_ok() {
    let mut bridge = started(ScriptedLink::new().command(cmd(500, true, 1)));
    bridge.servo_mut().set_alert(true);
    bridge.cycle();
    assert!(!bridge.link().statuses[0].hw_ok);
}

#[test]
fn test_transient_read_failure_skips_command() {
    let mut bridge = started(
        ScriptedLink::new()
            .command(cmd(500, true, 1))
            .fail(LinkError::Transient("timeout".into())),
    );

    bridge.cycle();
    bridge.servo_mut().clear_calls();

    assert_eq!(bridge.cycle(), CycleOutcome::Continue);
    // 只读反馈，不写舵机
    assert_eq!(bridge.servo().calls(), &[ServoCall::ReadFeedback]);
    let status = bridge.link().statuses[1];
    assert!(!status.sw_ok);
    assert_eq!(status.ack_sequence, 1);
}

#[test]
fn test_read_failure_before_any_command_writes_nothing() {
    let mut bridge = started(ScriptedLink::new().fail(LinkError::Transient("timeout".into())));
    assert_eq!(bridge.cycle(), CycleOutcome::Continue);
    assert_eq!(bridge.servo().calls(), &[ServoCall::ReadFeedback]);
    assert_eq!(bridge.link().statuses.len(), 1);
}

#[test]
fn test_out_of_range_setpoints_are_clamped() {
    let wild = Command {
        position_sp: -32768,
        velocity_sp: 32767,
        accel_sp: -5,
        ..cmd(0, true, 1)
    };
    let mut bridge = started(ScriptedLink::new().command(wild));
    bridge.cycle();

    assert_eq!(bridge.servo().goal_positions(), vec![deg_to_tick(200.0)]);
    assert_eq!(bridge.servo().profiles(), vec![(265, 1)]);
}
