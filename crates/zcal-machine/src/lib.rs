//! # zcal-machine - 机器抽象层
//!
//! 定义标定引擎与真实机器之间的全部边界：
//!
//! - `types` - 坐标与探测记录类型（`Position` / `MoveTarget` / `ProbePoint`）
//! - `control` - 协作者 trait（运动、探测限位、驱动电流、持久化配置）
//! - `error` - 机器层统一错误类型
//! - `mock` - 内存实现（可选，`mock` feature，仅供测试）
//!
//! ## 依赖原则
//!
//! 本 crate 不依赖标定逻辑，只描述机器能做什么。具体算法在 `zcal` 中实现，
//! 真实后端（固件 RPC、串口等）由应用层自行提供并实现这些 trait。

pub mod control;
pub mod error;
pub mod types;

#[cfg(feature = "mock")]
pub mod mock;

pub use control::{CurrentControl, MotionControl, ProbeEndstop, SettingsStore};
pub use error::MachineError;
pub use types::{DriverInfo, MoveTarget, Position, ProbePoint};
