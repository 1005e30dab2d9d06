//! 标定配置
//!
//! 配置从 TOML 段反序列化（缺省字段取默认值），加载后必须经过
//! [`CalConfig::validate`]；越界值在启动时立即失败，不做运行期容忍。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 多采样归约策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplesResult {
    /// 去极值后取算术平均
    #[default]
    Mean,
    /// 去极值后取中位数（偶数个样本取中间两值的平均）
    Median,
}

/// 参考探针的采样策略
///
/// 参考探针通常自带标定好的采样逻辑，默认单次触发即可；
/// 也可以选择与床面传感器相同的统计会话。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSampling {
    #[default]
    SingleShot,
    Sampled,
}

/// 标定引擎配置
///
/// # Example
///
/// ```
/// use zcal::CalConfig;
///
/// let cfg: CalConfig = CalConfig::from_toml(
///     r#"
///     z_offset = 0.2
///     offset_samples = 5
///     samples_result = "median"
///     reference_x = 160.0
///     reference_y = 160.0
///     "#,
/// ).unwrap();
/// assert_eq!(cfg.offset_samples, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalConfig {
    /// 气隙：床面归零后喷嘴停留的微小正高度
    pub z_offset: f64,
    /// 探测前后抬升距离（强制下限 4.0）
    pub probe_hop: f64,
    /// 探测移动速度（mm/s）
    pub speed: f64,
    /// 抬升速度，缺省沿用 `speed`
    pub lift_speed: Option<f64>,
    /// XY 平移速度
    pub xy_speed: f64,
    /// 探测移动期间的加速度覆盖，0 表示不覆盖
    pub probe_accel: f64,
    /// 平均环的测量轮数（≥ 1）
    pub offset_samples: u32,
    /// 单次探测会话的采样数（≥ 3，去极值后至少留一个样本）
    pub samples: u32,
    /// 单次会话内样本极差容忍（max(z) - min(z)）
    pub samples_tolerance: f64,
    /// 极差超限后整组重采的预算
    pub samples_tolerance_retries: u32,
    /// 相邻采样之间的回退距离
    pub sample_retract_dist: f64,
    /// 多采样归约策略
    pub samples_result: SamplesResult,
    /// 参考探针采样策略
    pub reference_sampling: ReferenceSampling,
    /// 探测期间 Z 电机电流缩减系数，取值 (0, 1)
    pub probe_current_factor: f64,
    /// 探测参考点 X（通常为床中心）
    pub reference_x: f64,
    /// 探测参考点 Y
    pub reference_y: f64,
    /// 探测移动允许到达的最低 Z
    pub z_floor: f64,
    /// 上次标定结果；既是持久化输出，也可作为预置输入
    pub calibrated_z_offset: f64,
}

impl Default for CalConfig {
    fn default() -> Self {
        Self {
            z_offset: 0.0,
            probe_hop: 5.0,
            speed: 5.0,
            lift_speed: None,
            xy_speed: 50.0,
            probe_accel: 0.0,
            offset_samples: 3,
            samples: 3,
            samples_tolerance: 0.1,
            samples_tolerance_retries: 3,
            sample_retract_dist: 2.0,
            samples_result: SamplesResult::default(),
            reference_sampling: ReferenceSampling::default(),
            probe_current_factor: 0.33,
            reference_x: 0.0,
            reference_y: 0.0,
            z_floor: 0.0,
            calibrated_z_offset: 0.0,
        }
    }
}

impl CalConfig {
    /// 从 TOML 文本解析（不做校验，校验见 [`validate`](Self::validate)）
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// 生效的抬升速度
    pub fn resolved_lift_speed(&self) -> f64 {
        self.lift_speed.unwrap_or(self.speed)
    }

    /// 启动期校验
    ///
    /// # Errors
    ///
    /// 任一字段越界即返回 [`ConfigError`]，调用方应视为致命错误。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.samples < 3 {
            return Err(ConfigError::TooFewSamples(self.samples));
        }
        if self.offset_samples < 1 {
            return Err(ConfigError::BelowMinimum {
                option: "offset_samples",
                min: 1.0,
                value: f64::from(self.offset_samples),
            });
        }
        if self.probe_hop < 4.0 {
            return Err(ConfigError::BelowMinimum {
                option: "probe_hop",
                min: 4.0,
                value: self.probe_hop,
            });
        }
        if self.speed <= 0.0 {
            return Err(ConfigError::NotPositive {
                option: "speed",
                value: self.speed,
            });
        }
        if let Some(lift) = self.lift_speed {
            if lift <= 0.0 {
                return Err(ConfigError::NotPositive {
                    option: "lift_speed",
                    value: lift,
                });
            }
        }
        if self.xy_speed <= 0.0 {
            return Err(ConfigError::NotPositive {
                option: "xy_speed",
                value: self.xy_speed,
            });
        }
        if self.sample_retract_dist <= 0.0 {
            return Err(ConfigError::NotPositive {
                option: "sample_retract_dist",
                value: self.sample_retract_dist,
            });
        }
        if self.samples_tolerance < 0.0 {
            return Err(ConfigError::BelowMinimum {
                option: "samples_tolerance",
                min: 0.0,
                value: self.samples_tolerance,
            });
        }
        if self.probe_accel < 0.0 {
            return Err(ConfigError::BelowMinimum {
                option: "probe_accel",
                min: 0.0,
                value: self.probe_accel,
            });
        }
        if self.probe_current_factor <= 0.0 || self.probe_current_factor >= 1.0 {
            return Err(ConfigError::CurrentFactorOutOfRange(
                self.probe_current_factor,
            ));
        }
        Ok(())
    }
}

/// 配置错误（启动期致命，不重试）
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse calibration config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{option} must be at least {min} (got {value})")]
    BelowMinimum {
        option: &'static str,
        min: f64,
        value: f64,
    },

    #[error("{option} must be greater than zero (got {value})")]
    NotPositive { option: &'static str, value: f64 },

    /// 去掉最高/最低样本后必须仍有数据
    #[error("samples must be >= 3 so the min/max trim leaves data (got {0})")]
    TooFewSamples(u32),

    #[error("probe_current_factor must be within (0, 1) (got {0})")]
    CurrentFactorOutOfRange(f64),
}
