//! 探测期间的机器状态守卫
//!
//! 探测要求临时改变机器动态：降低 Z 电机电流让碰撞更温和，覆盖加速度
//! 上限让触发位置更精确。两个守卫都承担同一条纪律：任何临时改动必须在
//! 每条退出路径上恢复，包括失败路径。

mod accel;
mod current;

pub use accel::AccelGuard;
pub use current::{AxisCurrentRecord, CurrentGuard};
