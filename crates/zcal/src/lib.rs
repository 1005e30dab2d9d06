//! # zcal - 双传感器 Z 偏移标定引擎
//!
//! 计算、滤波并持久化机器主探测传感器（电感/光学喷嘴探针）与独立安装的
//! 床面接触传感器之间的真实 Z 偏移。核心难点不在 I/O，而在标定状态机：
//!
//! - 对同一物理参考点顺序使用两种异构传感器
//! - 对单次触发的噪声读数做多采样、容差重试与去极值均值
//! - 探测前后临时改变机器动态（电机电流、加速度），失败路径也必须恢复
//! - 多轮测量合成一个符号约定正确的可信偏移并暂存到配置
//!
//! ## 模块
//!
//! - `config` - 配置表面（serde + TOML，启动时校验）
//! - `guard` - 电流守卫与加速度守卫
//! - `session` - 单传感器多采样探测会话（容差重试 + 去极值归约）
//! - `calibrator` - 顶层标定序列与命令表面
//!
//! ## Example
//!
//! 以 mock 机器为例（真实后端实现 `zcal-machine` 的协作者 trait 后
//! 以同样方式接入）：
//!
//! ```no_run
//! use zcal::{CalConfig, OffsetCalibrator};
//! use zcal_machine::mock::{MockEndstop, MockMachine};
//!
//! let machine = MockMachine::new();
//! let mut cal = OffsetCalibrator::builder()
//!     .config(CalConfig::default())
//!     .motion(machine.clone())
//!     .current_control(machine.clone())
//!     .bed_sensor(MockEndstop::new("bed_sensor", machine.clone()))
//!     .reference_probe(MockEndstop::new("probe", machine.clone()))
//!     .settings(machine)
//!     .build()?;
//! cal.attach();
//! cal.calibrate()?;
//! # Ok::<(), zcal::CalError>(())
//! ```

pub mod calibrator;
pub mod config;
pub mod error;
pub mod guard;
pub mod session;

pub use calibrator::{CalPhase, CalStatus, OffsetCalibrator, OffsetCalibratorBuilder, PrepareHook};
pub use config::{CalConfig, ConfigError, ReferenceSampling, SamplesResult};
pub use error::CalError;
pub use guard::{AccelGuard, AxisCurrentRecord, CurrentGuard};
pub use session::{SampleParams, run_probe};
