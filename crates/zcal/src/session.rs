//! 多采样探测会话
//!
//! 单个传感器的一次逻辑探测：重复触发采样，极差超限时整组重采，
//! 预算耗尽则报容差错误；收满后去掉最高最低样本，按配置策略归约成
//! 一个 Z 读数。会话只依赖运动与探测原语，不感知电流与加速度守卫。

use tracing::warn;
use zcal_machine::{MotionControl, MoveTarget, ProbeEndstop, ProbePoint};

use crate::config::{CalConfig, ConfigError, SamplesResult};
use crate::error::CalError;

/// 一次会话的采样参数
#[derive(Debug, Clone, Copy)]
pub struct SampleParams {
    pub sample_count: u32,
    pub samples_tolerance: f64,
    pub samples_tolerance_retries: u32,
    pub sample_retract_dist: f64,
    pub speed: f64,
    pub lift_speed: f64,
    pub samples_result: SamplesResult,
}

impl SampleParams {
    pub fn from_config(cfg: &CalConfig) -> Self {
        Self {
            sample_count: cfg.samples,
            samples_tolerance: cfg.samples_tolerance,
            samples_tolerance_retries: cfg.samples_tolerance_retries,
            sample_retract_dist: cfg.sample_retract_dist,
            speed: cfg.speed,
            lift_speed: cfg.resolved_lift_speed(),
            samples_result: cfg.samples_result,
        }
    }
}

fn z_spread(samples: &[ProbePoint]) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for p in samples {
        min = min.min(p.z);
        max = max.max(p.z);
    }
    max - min
}

/// 对已按 Z 排序的样本序列做归约
fn reduce_sorted(zs: &[f64], policy: SamplesResult) -> f64 {
    match policy {
        SamplesResult::Mean => zs.iter().sum::<f64>() / zs.len() as f64,
        SamplesResult::Median => {
            let mid = zs.len() / 2;
            if zs.len() % 2 == 1 {
                zs[mid]
            } else {
                (zs[mid - 1] + zs[mid]) / 2.0
            }
        }
    }
}

/// 执行一次多采样探测会话
///
/// 1. 记下当前 XY 作为回退锚点（回退始终回到锚点 XY，避免漂移）
/// 2. 反复触发采样直到收满 `sample_count` 个；每收一个就检查整组极差，
///    超过 `samples_tolerance` 时丢弃本组重采，重采预算耗尽则失败
/// 3. 按 Z 排序后去掉最高与最低样本
/// 4. 按 `samples_result` 归约为单个 Z，返回锚点 XY 与该 Z
///
/// 传感器自身的触发高度修正在 [`ProbePoint::from_trigger`] 边界处
/// 统一扣除（常量平移不影响极差与去极值）。
///
/// # Errors
///
/// - [`CalError::SamplingTolerance`] 重采预算耗尽
/// - [`CalError::Machine`] 探测或回退移动失败
pub fn run_probe(
    motion: &mut dyn MotionControl,
    endstop: &mut dyn ProbeEndstop,
    params: &SampleParams,
    z_floor: f64,
) -> Result<ProbePoint, CalError> {
    if params.sample_count < 3 {
        return Err(ConfigError::TooFewSamples(params.sample_count).into());
    }
    let anchor = motion.position();
    let wanted = params.sample_count as usize;
    let mut samples: Vec<ProbePoint> = Vec::with_capacity(wanted);
    let mut retries = 0u32;

    while samples.len() < wanted {
        let triggered = endstop.probing_move(z_floor, params.speed)?;
        samples.push(ProbePoint::from_trigger(
            triggered,
            endstop.z_trigger_offset(),
        ));

        let spread = z_spread(&samples);
        if spread > params.samples_tolerance {
            if retries >= params.samples_tolerance_retries {
                return Err(CalError::SamplingTolerance {
                    spread,
                    tolerance: params.samples_tolerance,
                    retries,
                });
            }
            warn!(
                spread,
                tolerance = params.samples_tolerance,
                "probe samples exceed tolerance, retrying"
            );
            retries += 1;
            samples.clear();
        }

        if samples.len() < wanted {
            // 回退用工具头的当前 Z，而不是触发记录里的 Z
            let lift_z = motion.position().z + params.sample_retract_dist;
            motion.move_to(
                MoveTarget::new(Some(anchor.x), Some(anchor.y), Some(lift_z)),
                params.lift_speed,
            )?;
        }
    }

    samples.sort_by(|a, b| a.z.total_cmp(&b.z));
    let kept = &samples[1..samples.len() - 1];
    let zs: Vec<f64> = kept.iter().map(|p| p.z).collect();
    Ok(ProbePoint::new(
        anchor.x,
        anchor.y,
        reduce_sorted(&zs, params.samples_result),
    ))
}
