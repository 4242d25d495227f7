//! Motor translator and watchdog safety invariants
//!
//! Run with: `cargo test --test motor_safety`

use disha_nav::config::MotorConfig;
use disha_nav::motor::sink::SimulatedSink;
use disha_nav::motor::{MotorController, MotorSink, MotorTranslator};
use disha_nav::nav::DriveCommand;
use std::time::{Duration, Instant};

fn motor_config(ramp_rate: f64, max_speed: f64, safety_timeout_s: f64) -> MotorConfig {
    MotorConfig {
        ramp_rate,
        turn_sensitivity: 1.0,
        safety_timeout_s,
        max_speed,
        backend: "simulated".to_string(),
    }
}

// ============================================================================
// Translator invariants
// ============================================================================

#[test]
fn ramp_bound_holds_across_command_sweep() {
    let ramp = 0.3;
    let mut translator = MotorTranslator::new(&motor_config(ramp, 1.0, 0.5));

    let commands = [
        (1.0, 0.0),
        (1.0, 1.0),
        (-1.0, 0.5),
        (0.0, -1.0),
        (0.7, 0.2),
        (-0.3, -0.9),
        (0.0, 0.0),
        (1.0, -1.0),
    ];

    let mut previous = translator.current();
    for &(speed, turn) in commands.iter().cycle().take(64) {
        let next = translator.translate(speed, turn);
        assert!(
            (next.left - previous.left).abs() <= ramp + 1e-12,
            "left ramp violated: {} -> {}",
            previous.left,
            next.left
        );
        assert!(
            (next.right - previous.right).abs() <= ramp + 1e-12,
            "right ramp violated: {} -> {}",
            previous.right,
            next.right
        );
        assert!(next.left.abs() <= 1.0 && next.right.abs() <= 1.0);
        previous = next;
    }
}

#[test]
fn outputs_never_exceed_max_speed() {
    let max_speed = 0.8;
    let mut translator = MotorTranslator::new(&motor_config(1.0, max_speed, 0.5));

    for &(speed, turn) in &[(1.0, 0.0), (1.0, 1.0), (-1.0, -1.0), (0.5, -1.0)] {
        // Run to steady state
        let mut wheels = translator.translate(speed, turn);
        for _ in 0..4 {
            wheels = translator.translate(speed, turn);
        }
        assert!(
            wheels.left.abs().max(wheels.right.abs()) <= max_speed + 1e-12,
            "cap violated for ({}, {}): {:?}",
            speed,
            turn,
            wheels
        );
    }
}

#[test]
fn turn_direction_survives_saturation() {
    // With the turn ratio preserved under magnitude scaling, the sign of
    // (right - left) must match the unsaturated mix for every command
    let mut translator = MotorTranslator::new(&motor_config(1.0, 1.0, 0.5));

    for speed_step in -4i32..=4 {
        for turn_step in -4i32..=4 {
            let speed = speed_step as f64 / 4.0;
            let turn = turn_step as f64 / 4.0;

            translator.reset();
            let wheels = translator.translate(speed, turn);
            let raw_diff = 2.0 * turn; // (speed + turn) - (speed - turn)
            let out_diff = wheels.right - wheels.left;

            if raw_diff == 0.0 {
                assert!(
                    out_diff.abs() < 1e-12,
                    "straight command turned: {:?}",
                    wheels
                );
            } else {
                assert_eq!(
                    out_diff.signum(),
                    raw_diff.signum(),
                    "turn direction flipped for ({}, {})",
                    speed,
                    turn
                );
            }
        }
    }
}

// ============================================================================
// S5: Emergency stop
// ============================================================================

#[test]
fn s5_emergency_stop_zeroes_within_100ms_and_latches() {
    let config = motor_config(1.0, 1.0, 5.0);
    let controller = MotorController::new(&config, MotorSink::Simulated(SimulatedSink::new()));
    controller.start().unwrap();

    // Bring the wheels up to (0.8, 0.8)
    controller
        .apply(&DriveCommand::new(0.8, 0.0, Instant::now()))
        .unwrap();
    assert!((controller.current_wheels().left - 0.8).abs() < 1e-12);

    let before = Instant::now();
    controller.emergency_stop();
    assert!(before.elapsed() < Duration::from_millis(100));
    assert!(controller.current_wheels().is_zero());

    // Further drive commands are ignored until cleared
    assert!(controller
        .apply(&DriveCommand::new(0.5, 0.0, Instant::now()))
        .is_err());
    assert!(controller.current_wheels().is_zero());

    controller.clear_emergency();
    assert!(controller
        .apply(&DriveCommand::new(0.5, 0.0, Instant::now()))
        .is_ok());

    controller.stop();
}

// ============================================================================
// Dead-man timeout
// ============================================================================

#[test]
fn deadman_ramps_output_to_zero_without_commands() {
    // 100 ms dead-man with a 0.5 ramp: the watchdog should take the wheels
    // to zero in a few of its 100 ms cycles
    let config = motor_config(0.5, 1.0, 0.1);
    let controller = MotorController::new(&config, MotorSink::Simulated(SimulatedSink::new()));
    controller.start().unwrap();

    controller
        .apply(&DriveCommand::new(1.0, 0.0, Instant::now()))
        .unwrap();
    assert!(!controller.current_wheels().is_zero());

    let deadline = Instant::now() + Duration::from_secs(2);
    while !controller.current_wheels().is_zero() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(25));
    }
    assert!(
        controller.current_wheels().is_zero(),
        "dead-man did not zero the wheels"
    );

    // A fresh command re-arms the output path
    assert!(controller
        .apply(&DriveCommand::new(0.5, 0.0, Instant::now()))
        .is_ok());

    controller.stop();
}
