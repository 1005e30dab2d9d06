//! 标定序列集成测试
//!
//! 全部基于 `zcal-machine` 的 mock 机器：脚本化两个传感器的触发高度，
//! 驱动完整命令表面，再核对移动日志、电流命令与暂存配置。

use zcal::{CalConfig, CalError, CalPhase, OffsetCalibrator, ReferenceSampling};
use zcal_machine::{MotionControl, Position};
use zcal_machine::mock::{DEFAULT_MAX_ACCEL, MockEndstop, MockMachine};

const EPS: f64 = 1e-9;

/// 双 Z 机型 + 床中心参考点的标准测试配置
fn test_config() -> CalConfig {
    CalConfig {
        reference_x: 100.0,
        reference_y: 100.0,
        probe_current_factor: 0.5,
        samples_tolerance: 1.0,
        ..CalConfig::default()
    }
}

struct Rig {
    machine: MockMachine,
    bed: MockEndstop,
    reference: MockEndstop,
    cal: OffsetCalibrator,
}

fn rig(cfg: CalConfig, bed: MockEndstop, reference: MockEndstop) -> Rig {
    let machine = bed_machine(&bed);
    let mut cal = OffsetCalibrator::builder()
        .config(cfg)
        .motion(machine.clone())
        .current_control(machine.clone())
        .bed_sensor(bed.clone())
        .reference_probe(reference.clone())
        .settings(machine.clone())
        .build()
        .expect("build calibrator");
    cal.attach();
    Rig {
        machine,
        bed,
        reference,
        cal,
    }
}

fn bed_machine(bed: &MockEndstop) -> MockMachine {
    let machine = bed.machine().clone();
    machine.add_driver("tmc2209 stepper_z", 0.8);
    machine.add_driver("tmc2209 stepper_z1", 0.8);
    machine.add_driver("tmc2209 stepper_x", 1.0);
    machine.set_position(Position::new(0.0, 0.0, 10.0));
    machine
}

fn make_sensors() -> (MockEndstop, MockEndstop) {
    let machine = MockMachine::new();
    let bed = MockEndstop::new("bed_sensor", machine.clone());
    let reference = MockEndstop::new("probe", machine);
    (bed, reference)
}

#[test]
fn test_calibrate_averages_runs_and_inverts_sign() {
    let (bed, reference) = make_sensors();
    // 三轮测量：床面 0.30 / 0.32 / 0.31，参考探针恒 0.20
    for z in [0.30, 0.32, 0.31] {
        bed.push_triggers(z, 3);
    }
    reference.push_triggers(0.20, 3);
    let mut r = rig(test_config(), bed, reference);

    r.cal.calibrate().expect("calibrate");

    // 偏移 [0.10, 0.12, 0.11] 的平均取反
    assert!((r.cal.calibrated_z_offset() + 0.11).abs() < EPS);
    assert_eq!(r.cal.status().phase, CalPhase::Idle);
    assert_eq!(r.bed.remaining(), 0);
    assert_eq!(r.reference.remaining(), 0);

    // 先清零运行时偏移，最后应用标定值
    let applied = r.machine.applied_z_offsets();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0], 0.0);
    assert!((applied[1] + 0.11).abs() < EPS);

    // 暂存到配置段，等待操作者显式保存
    let staged = r.machine.staged_settings();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].0, "zcal");
    assert_eq!(staged[0].1, "calibrated_z_offset");
    assert!((staged[0].2 + 0.11).abs() < EPS);
}

#[test]
fn test_calibrate_holds_reduced_current_across_runs() {
    let (bed, reference) = make_sensors();
    for _ in 0..3 {
        bed.push_triggers(0.30, 3);
    }
    reference.push_triggers(0.20, 3);
    let mut r = rig(test_config(), bed, reference);

    r.cal.calibrate().expect("calibrate");

    // hold 语义：整个平均环只降流一次、恢复一次（两个 Z 驱动器各一条）
    let commands = r.machine.current_commands();
    assert_eq!(commands.len(), 4);
    assert_eq!(commands[0], ("stepper_z".to_string(), 0.4));
    assert_eq!(commands[1], ("stepper_z1".to_string(), 0.4));
    assert_eq!(commands[2], ("stepper_z".to_string(), 0.8));
    assert_eq!(commands[3], ("stepper_z1".to_string(), 0.8));
}

#[test]
fn test_calibrate_restores_guards_on_reference_fault() {
    let (bed, reference) = make_sensors();
    bed.push_triggers(0.30, 3);
    reference.push_fault();
    let cfg = CalConfig {
        probe_accel: 500.0,
        ..test_config()
    };
    let mut r = rig(cfg, bed, reference);

    let err = r.cal.calibrate().unwrap_err();
    assert!(matches!(err, CalError::Machine(_)));
    assert_eq!(r.cal.status().phase, CalPhase::Failed);

    // 失败路径也完成了电流与加速度恢复
    let commands = r.machine.current_commands();
    assert_eq!(commands.len(), 4);
    assert_eq!(commands[2].1, 0.8);
    assert_eq!(commands[3].1, 0.8);
    assert_eq!(r.machine.accel_history(), vec![500.0, DEFAULT_MAX_ACCEL]);

    // 失败不暂存、不应用标定值
    assert!(r.machine.staged_settings().is_empty());
    assert_eq!(r.machine.applied_z_offsets(), vec![0.0]);
}

#[test]
fn test_probe_attempts_restore_after_partial_reduce_failure() {
    let (bed, reference) = make_sensors();
    bed.push_triggers(0.30, 3);
    let mut r = rig(test_config(), bed, reference);
    // 第二台 Z 驱动器拒绝电流命令，降流中途失败
    r.machine.fail_current_on("stepper_z1");

    let err = r.cal.probe().unwrap_err();
    assert!(matches!(err, CalError::Machine(_)));
    assert_eq!(r.cal.status().phase, CalPhase::Failed);

    // 已降流的第一台驱动器在失败路径上被恢复到额定值
    let commands = r.machine.current_commands();
    assert_eq!(
        commands,
        vec![
            ("stepper_z".to_string(), 0.4),
            ("stepper_z".to_string(), 0.8),
        ]
    );
    // 降流失败时探测从未开始，脚本原样保留
    assert_eq!(r.bed.remaining(), 3);
}

#[test]
fn test_end_to_end_with_bed_sensor_air_gap() {
    let machine = MockMachine::new();
    // 床面传感器触发面比喷嘴接触点高 0.20（气隙），工具头在 0.50 触发
    let bed = MockEndstop::new("bed_sensor", machine.clone()).with_z_trigger_offset(0.20);
    let reference = MockEndstop::new("probe", machine);
    bed.push_triggers(0.50, 3);
    reference.push_trigger(0.05);
    let cfg = CalConfig {
        offset_samples: 1,
        ..test_config()
    };
    let mut r = rig(cfg, bed, reference);

    r.cal.calibrate().expect("calibrate");

    // 床面 0.50 − 0.20 = 0.30，参考 0.05，真实偏移 0.25，存 −0.25
    assert!((r.cal.last_bed_z() - 0.30).abs() < EPS);
    assert!((r.cal.calibrated_z_offset() + 0.25).abs() < EPS);
    let applied = r.machine.applied_z_offsets();
    assert_eq!(applied[0], 0.0);
    assert!((applied[1] + 0.25).abs() < EPS);
}

#[test]
fn test_measure_offset_returns_uninverted_difference() {
    let (bed, reference) = make_sensors();
    bed.push_triggers(0.30, 3);
    reference.push_trigger(0.05);
    let mut r = rig(test_config(), bed, reference);

    let offset = r.cal.measure_offset().expect("measure");
    assert!((offset - 0.25).abs() < EPS);
    // 单次测量不动标定值，也不暂存
    assert_eq!(r.cal.calibrated_z_offset(), 0.0);
    assert!(r.machine.staged_settings().is_empty());
}

#[test]
fn test_repositioning_compensates_probe_xy_offset() {
    let machine = MockMachine::new();
    let bed = MockEndstop::new("bed_sensor", machine.clone());
    // 参考探针装在喷嘴左后方 (−30, −10)
    let reference = MockEndstop::new("probe", machine).with_xy_offset(-30.0, -10.0);
    bed.push_triggers(0.30, 3);
    reference.push_trigger(0.05);
    let mut r = rig(test_config(), bed, reference);

    r.cal.measure_offset().expect("measure");

    // 让探针对准参考点：工具头移到 (100−(−30), 100−(−10))
    let moves = r.machine.moves();
    let reposition = moves
        .iter()
        .find(|(t, _)| t.x == Some(130.0) && t.y == Some(110.0))
        .expect("repositioning move present");
    assert_eq!(reposition.0.z, None);
    assert_eq!(reposition.1, 50.0);
}

#[test]
fn test_sampled_reference_mode_runs_full_session() {
    let (bed, reference) = make_sensors();
    bed.push_triggers(0.30, 3);
    reference.push_triggers(0.05, 3);
    let cfg = CalConfig {
        reference_sampling: ReferenceSampling::Sampled,
        ..test_config()
    };
    let mut r = rig(cfg, bed, reference);

    let offset = r.cal.measure_offset().expect("measure");
    assert!((offset - 0.25).abs() < EPS);
    assert_eq!(r.reference.remaining(), 0);
}

#[test]
fn test_home_z_applies_air_gap_then_lifts() {
    let (bed, reference) = make_sensors();
    bed.push_triggers(0.5, 3);
    let cfg = CalConfig {
        z_offset: 0.2,
        ..test_config()
    };
    let mut r = rig(cfg, bed, reference);

    r.cal.home_z().expect("home_z");

    // 触发点被定义为 Z=0.2，随后抬升 probe_hop
    assert_eq!(r.machine.set_z_calls(), vec![0.2]);
    assert!((r.machine.position().z - 5.2).abs() < EPS);
    assert_eq!(r.cal.status().phase, CalPhase::Idle);
}

#[test]
fn test_load_offset_is_idempotent() {
    let (bed, reference) = make_sensors();
    let cfg = CalConfig {
        calibrated_z_offset: 0.15,
        ..test_config()
    };
    let mut r = rig(cfg, bed, reference);

    r.cal.load_offset().expect("load");
    r.cal.load_offset().expect("load again");

    assert_eq!(r.machine.applied_z_offsets(), vec![0.15, 0.15]);
    assert!(r.machine.staged_settings().is_empty());
}

#[test]
fn test_save_current_offset_adopts_runtime_value() {
    let (bed, reference) = make_sensors();
    let mut r = rig(test_config(), bed, reference);
    // 操作者打印中手动微调到 0.05
    r.machine.set_runtime_z_offset(0.05);

    r.cal.save_current_offset().expect("save");

    assert_eq!(r.cal.calibrated_z_offset(), 0.05);
    let staged = r.machine.staged_settings();
    assert_eq!(
        staged,
        vec![("zcal".to_string(), "calibrated_z_offset".to_string(), 0.05)]
    );
    // 采纳不重新应用偏移
    assert!(r.machine.applied_z_offsets().is_empty());
}

#[test]
fn test_prepare_hook_runs_once_per_calibrate() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    let (bed, reference) = make_sensors();
    for _ in 0..3 {
        bed.push_triggers(0.30, 3);
    }
    reference.push_triggers(0.20, 3);
    let machine = bed_machine(&bed);

    let calls = Arc::new(AtomicU32::new(0));
    let hook_calls = Arc::clone(&calls);
    let mut cal = OffsetCalibrator::builder()
        .config(test_config())
        .motion(machine.clone())
        .current_control(machine.clone())
        .bed_sensor(bed)
        .reference_probe(reference)
        .settings(machine)
        .prepare_hook(move |_| {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .expect("build");
    cal.attach();

    cal.calibrate().expect("calibrate");
    // 三轮测量，整备只做一次
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cal.probe().unwrap_err();
    // 单独 probe 不再抑制整备
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_status_snapshot_serializes() {
    let (bed, reference) = make_sensors();
    bed.push_triggers(0.30, 3);
    reference.push_trigger(0.05);
    let mut r = rig(test_config(), bed, reference);
    r.cal.measure_offset().expect("measure");

    let status = r.cal.status();
    assert!((status.last_bed_z - 0.30).abs() < EPS);
    let json = serde_json::to_value(status).expect("serialize");
    assert_eq!(json["phase"], "idle");
    assert!((json["last_bed_z"].as_f64().unwrap() - 0.30).abs() < EPS);
}
