//! 坐标与探测记录类型

use serde::{Deserialize, Serialize};

/// 工具头当前坐标（机器坐标系，单位 mm）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// 部分移动目标
///
/// `None` 表示该轴保持不变，对应固件 `manual_move` 的可选轴语义。
///
/// # Example
///
/// ```
/// use zcal_machine::MoveTarget;
///
/// // 只抬升 Z，XY 不动
/// let lift = MoveTarget::z_only(12.0);
/// assert_eq!(lift.x, None);
/// assert_eq!(lift.z, Some(12.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveTarget {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl MoveTarget {
    pub const fn new(x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Self {
        Self { x, y, z }
    }

    /// 三轴全指定
    pub const fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// 仅 XY
    pub const fn xy(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: None,
        }
    }

    /// 仅 Z
    pub const fn z_only(z: f64) -> Self {
        Self {
            x: None,
            y: None,
            z: Some(z),
        }
    }
}

/// 一次探测触发的记录
///
/// `z` 始终是床面接触高度。当传感器带有触发高度修正
/// （trigger offset）时，触发瞬间的工具头高度与床面接触高度不同，
/// 此时 `toolhead_z` 记录工具头的原始高度；否则为 `None`。
///
/// 原始触发位置只在一个边界处转换为本类型（[`ProbePoint::from_trigger`]），
/// 其余代码一律通过字段访问，不再关心记录的来源形态。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbePoint {
    pub x: f64,
    pub y: f64,
    /// 床面接触高度
    pub z: f64,
    /// 触发瞬间的工具头高度（仅当与 `z` 不同时记录）
    pub toolhead_z: Option<f64>,
}

impl ProbePoint {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            toolhead_z: None,
        }
    }

    /// 原始触发位置 → 探测记录的唯一转换点
    ///
    /// `z_trigger_offset` 是传感器自身的触发高度修正：触发时工具头
    /// 高出床面接触点多少。修正为零时退化为普通三元组。
    pub fn from_trigger(position: Position, z_trigger_offset: f64) -> Self {
        if z_trigger_offset == 0.0 {
            Self::new(position.x, position.y, position.z)
        } else {
            Self {
                x: position.x,
                y: position.y,
                z: position.z - z_trigger_offset,
                toolhead_z: Some(position.z),
            }
        }
    }

}

/// 已注册的轴驱动器
///
/// 名称沿用 `"<驱动类型> <轴名>"` 约定（如 `"tmc2209 stepper_z1"`），
/// 电流守卫按该约定筛选 Z 轴驱动。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverInfo {
    pub name: String,
    /// 额定运行电流（A）
    pub run_current: f64,
}

impl DriverInfo {
    pub fn new(name: impl Into<String>, run_current: f64) -> Self {
        Self {
            name: name.into(),
            run_current,
        }
    }
}
