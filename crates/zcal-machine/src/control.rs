//! 协作者 trait
//!
//! 标定引擎通过这些 trait 与机器交互。全部调用为阻塞语义：
//! 移动与探测在底层运动完成（或超时/故障）前不返回。超时策略属于
//! 各实现，本层只区分"成功返回"与"错误上抛"。

use crate::error::MachineError;
use crate::types::{DriverInfo, MoveTarget, Position};

/// 运动控制
///
/// 工具头移动、当前位置读取、运动学 Z 重置以及运行时 Z 坐标偏移。
pub trait MotionControl {
    /// 阻塞移动到目标坐标（`None` 轴保持不变），速度单位 mm/s
    fn move_to(&mut self, target: MoveTarget, speed: f64) -> Result<(), MachineError>;

    /// 当前工具头坐标
    fn position(&self) -> Position;

    /// 将当前物理位置的运动学 Z 重置为给定值（归零后设定气隙用）
    fn set_z_position(&mut self, z: f64) -> Result<(), MachineError>;

    /// 当前加速度上限（mm/s²）
    fn max_accel(&self) -> f64;

    /// 设置加速度上限
    fn set_max_accel(&mut self, accel: f64) -> Result<(), MachineError>;

    /// 当前生效的运行时 Z 坐标偏移
    fn z_offset(&self) -> f64;

    /// 应用运行时 Z 坐标偏移（不触发移动）
    fn apply_z_offset(&mut self, offset: f64) -> Result<(), MachineError>;
}

/// 探测限位
///
/// 一个可作为临时 Z 限位使用的传感器。`probing_move` 是唯一的
/// 触发原语：朝目标高度移动，触发即停，返回触发位置。
pub trait ProbeEndstop {
    /// 传感器名称（日志与错误信息用）
    fn name(&self) -> &str;

    /// 朝 `target_z` 执行探测移动，阻塞到触发或失败
    ///
    /// # Errors
    ///
    /// 到达目标仍未触发、或传感器故障时返回
    /// [`MachineError::ProbeFault`]。
    fn probing_move(&mut self, target_z: f64, speed: f64) -> Result<Position, MachineError>;

    /// 传感器相对喷嘴的 XY 偏移 `(dx, dy)`
    fn xy_offset(&self) -> (f64, f64);

    /// 传感器自身的触发高度修正
    fn z_trigger_offset(&self) -> f64;
}

/// 驱动电流控制
pub trait CurrentControl {
    /// 枚举全部已注册的轴驱动器（供电流守卫做发现与筛选）
    fn drivers(&self) -> Vec<DriverInfo>;

    /// 设置指定轴的运行电流（A），即发即忘
    fn set_current(&mut self, axis: &str, amps: f64) -> Result<(), MachineError>;
}

/// 持久化配置写入
///
/// 写入只是暂存；真正落盘由外部的显式保存动作完成（不在本层范围）。
pub trait SettingsStore {
    fn set_float(&mut self, section: &str, key: &str, value: f64);
}
