//! 标定层错误类型定义

use thiserror::Error;
use zcal_machine::MachineError;

use crate::config::ConfigError;

/// 标定层错误类型
#[derive(Debug, Error)]
pub enum CalError {
    /// 配置错误（启动期致命）
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// 机器层错误（探测故障、移动被拒等），原样上抛
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// 重采预算耗尽仍未收敛到容差以内
    #[error(
        "probe samples exceed samples_tolerance ({spread:.6} > {tolerance:.6}) after {retries} retries"
    )]
    SamplingTolerance {
        spread: f64,
        tolerance: f64,
        retries: u32,
    },

    /// 引擎尚未完成二阶段构造
    #[error("calibrator not attached; call attach() once the machine is ready")]
    NotAttached,

    /// Builder 缺少必需组件
    #[error("calibrator builder missing component: {0}")]
    MissingComponent(&'static str),
}
