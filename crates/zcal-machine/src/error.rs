//! 机器层错误类型定义

use thiserror::Error;

/// 机器层统一错误类型
///
/// 标定引擎不在本层做任何重试：探测失败、移动被拒、驱动命令失败
/// 都原样上抛，由调用方决定是否中止整个序列。
#[derive(Debug, Error)]
pub enum MachineError {
    /// 探测移动到达目标仍未触发，或传感器故障
    #[error("probe '{probe}' did not trigger before reaching z={target_z:.3}")]
    ProbeFault { probe: String, target_z: f64 },

    /// 移动被运动层拒绝（超限位、未归零等）
    #[error("move rejected: {0}")]
    Move(String),

    /// 驱动器命令失败（电流设置、加速度设置等）
    #[error("driver command failed: {0}")]
    Driver(String),
}
