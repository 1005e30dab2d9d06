//! 内存机器实现（测试用）
//!
//! `MockMachine` 是可克隆句柄，内部共享状态，测试可以在把句柄交给
//! 标定引擎之后继续观察机器状态。`MockEndstop` 用脚本队列模拟传感器
//! 触发高度，弹空或遇到 `Fault` 条目即报探测故障。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::control::{CurrentControl, MotionControl, ProbeEndstop, SettingsStore};
use crate::error::MachineError;
use crate::types::{DriverInfo, MoveTarget, Position};

/// 默认加速度上限
pub const DEFAULT_MAX_ACCEL: f64 = 3000.0;

#[derive(Debug, Default)]
struct MockLog {
    moves: Vec<(MoveTarget, f64)>,
    current: Vec<(String, f64)>,
    accel: Vec<f64>,
    z_offsets: Vec<f64>,
    set_z: Vec<f64>,
    staged: Vec<(String, String, f64)>,
}

#[derive(Debug)]
struct MockState {
    position: Position,
    max_accel: f64,
    z_offset: f64,
    drivers: Vec<DriverInfo>,
    fail_current_axis: Option<String>,
    log: MockLog,
}

/// 内存机器（可克隆句柄）
#[derive(Debug, Clone)]
pub struct MockMachine {
    state: Arc<Mutex<MockState>>,
}

impl MockMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                position: Position::default(),
                max_accel: DEFAULT_MAX_ACCEL,
                z_offset: 0.0,
                drivers: Vec::new(),
                fail_current_axis: None,
                log: MockLog::default(),
            })),
        }
    }

    /// 注册一个轴驱动器
    pub fn add_driver(&self, name: impl Into<String>, run_current: f64) {
        self.state
            .lock()
            .unwrap()
            .drivers
            .push(DriverInfo::new(name, run_current));
    }

    pub fn set_position(&self, position: Position) {
        self.state.lock().unwrap().position = position;
    }

    /// 直接写 Z（模拟探测触发时的物理位置，不记入移动日志）
    pub fn force_z(&self, z: f64) {
        self.state.lock().unwrap().position.z = z;
    }

    /// 模拟操作者手动调好的运行时偏移（babystep）
    pub fn set_runtime_z_offset(&self, offset: f64) {
        self.state.lock().unwrap().z_offset = offset;
    }

    /// 让指定轴的电流命令持续失败（模拟驱动器拒绝命令）
    pub fn fail_current_on(&self, axis: impl Into<String>) {
        self.state.lock().unwrap().fail_current_axis = Some(axis.into());
    }

    // ---- 观察接口 ----

    pub fn moves(&self) -> Vec<(MoveTarget, f64)> {
        self.state.lock().unwrap().log.moves.clone()
    }

    pub fn current_commands(&self) -> Vec<(String, f64)> {
        self.state.lock().unwrap().log.current.clone()
    }

    pub fn accel_history(&self) -> Vec<f64> {
        self.state.lock().unwrap().log.accel.clone()
    }

    pub fn applied_z_offsets(&self) -> Vec<f64> {
        self.state.lock().unwrap().log.z_offsets.clone()
    }

    pub fn set_z_calls(&self) -> Vec<f64> {
        self.state.lock().unwrap().log.set_z.clone()
    }

    pub fn staged_settings(&self) -> Vec<(String, String, f64)> {
        self.state.lock().unwrap().log.staged.clone()
    }
}

impl Default for MockMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionControl for MockMachine {
    fn move_to(&mut self, target: MoveTarget, speed: f64) -> Result<(), MachineError> {
        let mut s = self.state.lock().unwrap();
        if let Some(x) = target.x {
            s.position.x = x;
        }
        if let Some(y) = target.y {
            s.position.y = y;
        }
        if let Some(z) = target.z {
            s.position.z = z;
        }
        s.log.moves.push((target, speed));
        Ok(())
    }

    fn position(&self) -> Position {
        self.state.lock().unwrap().position
    }

    fn set_z_position(&mut self, z: f64) -> Result<(), MachineError> {
        let mut s = self.state.lock().unwrap();
        s.position.z = z;
        s.log.set_z.push(z);
        Ok(())
    }

    fn max_accel(&self) -> f64 {
        self.state.lock().unwrap().max_accel
    }

    fn set_max_accel(&mut self, accel: f64) -> Result<(), MachineError> {
        let mut s = self.state.lock().unwrap();
        s.max_accel = accel;
        s.log.accel.push(accel);
        Ok(())
    }

    fn z_offset(&self) -> f64 {
        self.state.lock().unwrap().z_offset
    }

    fn apply_z_offset(&mut self, offset: f64) -> Result<(), MachineError> {
        let mut s = self.state.lock().unwrap();
        s.z_offset = offset;
        s.log.z_offsets.push(offset);
        Ok(())
    }
}

impl CurrentControl for MockMachine {
    fn drivers(&self) -> Vec<DriverInfo> {
        self.state.lock().unwrap().drivers.clone()
    }

    fn set_current(&mut self, axis: &str, amps: f64) -> Result<(), MachineError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_current_axis.as_deref() == Some(axis) {
            return Err(MachineError::Driver(format!(
                "set_current rejected for {axis}"
            )));
        }
        s.log.current.push((axis.to_string(), amps));
        Ok(())
    }
}

impl SettingsStore for MockMachine {
    fn set_float(&mut self, section: &str, key: &str, value: f64) {
        self.state
            .lock()
            .unwrap()
            .log
            .staged
            .push((section.to_string(), key.to_string(), value));
    }
}

/// 脚本条目：在给定高度触发，或直接故障
#[derive(Debug, Clone, Copy)]
pub enum MockTrigger {
    At(f64),
    Fault,
}

/// 脚本化探测限位
#[derive(Clone)]
pub struct MockEndstop {
    name: String,
    xy_offset: (f64, f64),
    z_trigger_offset: f64,
    machine: MockMachine,
    script: Arc<Mutex<VecDeque<MockTrigger>>>,
}

impl MockEndstop {
    pub fn new(name: impl Into<String>, machine: MockMachine) -> Self {
        Self {
            name: name.into(),
            xy_offset: (0.0, 0.0),
            z_trigger_offset: 0.0,
            machine,
            script: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    #[must_use]
    pub fn with_xy_offset(mut self, dx: f64, dy: f64) -> Self {
        self.xy_offset = (dx, dy);
        self
    }

    #[must_use]
    pub fn with_z_trigger_offset(mut self, dz: f64) -> Self {
        self.z_trigger_offset = dz;
        self
    }

    /// 追加一次在 `z` 处的触发
    pub fn push_trigger(&self, z: f64) {
        self.script.lock().unwrap().push_back(MockTrigger::At(z));
    }

    /// 追加 `count` 次在 `z` 处的触发
    pub fn push_triggers(&self, z: f64, count: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..count {
            script.push_back(MockTrigger::At(z));
        }
    }

    /// 追加一次故障
    pub fn push_fault(&self) {
        self.script.lock().unwrap().push_back(MockTrigger::Fault);
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    /// 触发时被写入物理位置的那台机器
    pub fn machine(&self) -> &MockMachine {
        &self.machine
    }
}

impl ProbeEndstop for MockEndstop {
    fn name(&self) -> &str {
        &self.name
    }

    fn probing_move(&mut self, target_z: f64, _speed: f64) -> Result<Position, MachineError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(MockTrigger::At(z)) => {
                self.machine.force_z(z);
                Ok(self.machine.position())
            }
            Some(MockTrigger::Fault) | None => Err(MachineError::ProbeFault {
                probe: self.name.clone(),
                target_z,
            }),
        }
    }

    fn xy_offset(&self) -> (f64, f64) {
        self.xy_offset
    }

    fn z_trigger_offset(&self) -> f64 {
        self.z_trigger_offset
    }
}
