//! 顶层偏移标定器
//!
//! 驱动完整的双传感器标定序列：定位到参考点 → 床面传感器多采样探测 →
//! 抬升 → 按传感器 XY 偏移重新定位 → 参考探针探测 → 求差 → 多轮平均 →
//! 一次符号反转 → 应用并暂存。电流守卫跨整个平均环持有（`hold`），
//! 加速度守卫只包住床面探测移动；两者在每条退出路径上都会恢复。
//!
//! 构造采用二阶段：`builder().build()` 校验配置并装配协作者，
//! `attach()` 在机器就绪后做驱动器发现。

use serde::Serialize;
use tracing::{debug, info};
use zcal_machine::{
    CurrentControl, MachineError, MotionControl, MoveTarget, ProbeEndstop, ProbePoint,
    SettingsStore,
};

use crate::config::{CalConfig, ReferenceSampling};
use crate::error::CalError;
use crate::guard::{AccelGuard, CurrentGuard};
use crate::session::{self, SampleParams};

/// 暂存标定结果所用的配置段名
const SETTINGS_SECTION: &str = "zcal";

/// 标定序列阶段
///
/// 任一未恢复的错误使序列进入 `Failed`（守卫清理已执行），
/// 成功的命令最终回到 `Idle`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalPhase {
    Idle,
    Preparing,
    ProbingBed,
    Lifting,
    Repositioning,
    ProbingReference,
    Computing,
    Averaging,
    Applying,
    Persisting,
    Failed,
}

/// 只读状态快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalStatus {
    pub phase: CalPhase,
    pub last_bed_z: f64,
    pub last_probe_position: ProbePoint,
    pub calibrated_z_offset: f64,
}

/// 探测前的机械整备回调（如去应力例程），由应用层注入
pub type PrepareHook = Box<dyn FnMut(&mut dyn MotionControl) -> Result<(), MachineError>>;

/// 偏移标定器 Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use zcal::{CalConfig, OffsetCalibrator};
/// use zcal_machine::mock::{MockEndstop, MockMachine};
///
/// let machine = MockMachine::new();
/// let mut cal = OffsetCalibrator::builder()
///     .config(CalConfig::default())
///     .motion(machine.clone())
///     .current_control(machine.clone())
///     .bed_sensor(MockEndstop::new("bed_sensor", machine.clone()))
///     .reference_probe(MockEndstop::new("probe", machine.clone()))
///     .settings(machine)
///     .build()?;
/// cal.attach();
/// # Ok::<(), zcal::CalError>(())
/// ```
#[derive(Default)]
pub struct OffsetCalibratorBuilder {
    config: Option<CalConfig>,
    motion: Option<Box<dyn MotionControl>>,
    current: Option<Box<dyn CurrentControl>>,
    bed_sensor: Option<Box<dyn ProbeEndstop>>,
    reference_probe: Option<Box<dyn ProbeEndstop>>,
    settings: Option<Box<dyn SettingsStore>>,
    prepare: Option<PrepareHook>,
}

impl OffsetCalibratorBuilder {
    pub fn config(mut self, config: CalConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn motion(mut self, motion: impl MotionControl + 'static) -> Self {
        self.motion = Some(Box::new(motion));
        self
    }

    pub fn current_control(mut self, current: impl CurrentControl + 'static) -> Self {
        self.current = Some(Box::new(current));
        self
    }

    pub fn bed_sensor(mut self, sensor: impl ProbeEndstop + 'static) -> Self {
        self.bed_sensor = Some(Box::new(sensor));
        self
    }

    pub fn reference_probe(mut self, probe: impl ProbeEndstop + 'static) -> Self {
        self.reference_probe = Some(Box::new(probe));
        self
    }

    pub fn settings(mut self, settings: impl SettingsStore + 'static) -> Self {
        self.settings = Some(Box::new(settings));
        self
    }

    /// 可选：床面探测前运行的整备回调
    pub fn prepare_hook(
        mut self,
        hook: impl FnMut(&mut dyn MotionControl) -> Result<(), MachineError> + 'static,
    ) -> Self {
        self.prepare = Some(Box::new(hook));
        self
    }

    /// 校验配置并装配标定器
    ///
    /// # Errors
    ///
    /// - [`CalError::Config`] 配置越界
    /// - [`CalError::MissingComponent`] 缺少必需协作者
    pub fn build(self) -> Result<OffsetCalibrator, CalError> {
        let cfg = self.config.unwrap_or_default();
        cfg.validate()?;
        let motion = self.motion.ok_or(CalError::MissingComponent("motion"))?;
        let current = self
            .current
            .ok_or(CalError::MissingComponent("current_control"))?;
        let bed_sensor = self
            .bed_sensor
            .ok_or(CalError::MissingComponent("bed_sensor"))?;
        let reference_probe = self
            .reference_probe
            .ok_or(CalError::MissingComponent("reference_probe"))?;
        let settings = self
            .settings
            .ok_or(CalError::MissingComponent("settings"))?;

        let current_guard = CurrentGuard::new(cfg.probe_current_factor);
        let accel_guard = AccelGuard::new(cfg.probe_accel);
        let calibrated_z_offset = cfg.calibrated_z_offset;
        Ok(OffsetCalibrator {
            cfg,
            motion,
            current,
            bed_sensor,
            reference_probe,
            settings,
            prepare: self.prepare,
            current_guard,
            accel_guard,
            skip_prepare: false,
            attached: false,
            phase: CalPhase::Idle,
            last_bed_z: 0.0,
            last_probe_position: ProbePoint::new(0.0, 0.0, 0.0),
            calibrated_z_offset,
        })
    }
}

/// 偏移标定器
///
/// 单线程协作式：每个探测与移动调用都阻塞到底层原语完成，序列运行期间
/// 是机器状态的唯一写者。
pub struct OffsetCalibrator {
    cfg: CalConfig,
    motion: Box<dyn MotionControl>,
    current: Box<dyn CurrentControl>,
    bed_sensor: Box<dyn ProbeEndstop>,
    reference_probe: Box<dyn ProbeEndstop>,
    settings: Box<dyn SettingsStore>,
    prepare: Option<PrepareHook>,
    current_guard: CurrentGuard,
    accel_guard: AccelGuard,
    skip_prepare: bool,
    attached: bool,
    phase: CalPhase,
    last_bed_z: f64,
    last_probe_position: ProbePoint,
    calibrated_z_offset: f64,
}

impl OffsetCalibrator {
    pub fn builder() -> OffsetCalibratorBuilder {
        OffsetCalibratorBuilder::default()
    }

    /// 二阶段构造的第二步：机器就绪后做 Z 驱动器发现
    ///
    /// 零匹配是合法的（机器没有可控的 Z 电流）。
    pub fn attach(&mut self) {
        let drivers = self.current.drivers();
        self.current_guard.discover(&drivers);
        self.attached = true;
        info!(
            "calibrator attached ({} z driver(s) under current management)",
            self.current_guard.record_count()
        );
    }

    // ---- 命令表面 ----------------------------------------------------

    /// 在当前 XY 用床面传感器探测，返回床面接触 Z
    pub fn probe(&mut self) -> Result<f64, CalError> {
        self.ensure_attached()?;
        let result = self.probe_inner();
        self.complete(result)
    }

    /// 用床面传感器归零 Z，然后按配置气隙抬到安全高度
    pub fn home_z(&mut self) -> Result<(), CalError> {
        self.ensure_attached()?;
        let result = self.home_z_inner();
        self.complete(result)
    }

    /// 一次床面 vs 参考探针的测量，返回带符号的真实偏移
    pub fn measure_offset(&mut self) -> Result<f64, CalError> {
        self.ensure_attached()?;
        let result = self.measure_offset_inner();
        self.complete(result)
    }

    /// 多轮测量取平均并持久化标定结果
    pub fn calibrate(&mut self) -> Result<(), CalError> {
        self.ensure_attached()?;
        let result = self.calibrate_inner();
        self.complete(result)
    }

    /// 重新应用已保存的标定偏移（不测量）
    pub fn load_offset(&mut self) -> Result<(), CalError> {
        self.ensure_attached()?;
        self.set_phase(CalPhase::Applying);
        let result = self.apply_offset();
        self.complete(result)
    }

    /// 把操作者当前手调的运行时偏移采纳为新的标定值并暂存
    pub fn save_current_offset(&mut self) -> Result<(), CalError> {
        self.ensure_attached()?;
        self.set_phase(CalPhase::Persisting);
        self.calibrated_z_offset = self.motion.z_offset();
        self.persist();
        let result = Ok(());
        self.complete(result)
    }

    /// 只读状态快照
    pub fn status(&self) -> CalStatus {
        CalStatus {
            phase: self.phase,
            last_bed_z: self.last_bed_z,
            last_probe_position: self.last_probe_position,
            calibrated_z_offset: self.calibrated_z_offset,
        }
    }

    pub fn calibrated_z_offset(&self) -> f64 {
        self.calibrated_z_offset
    }

    pub fn last_bed_z(&self) -> f64 {
        self.last_bed_z
    }

    // ---- 序列实现 ----------------------------------------------------

    fn probe_inner(&mut self) -> Result<f64, CalError> {
        self.run_prepare()?;
        self.set_phase(CalPhase::ProbingBed);
        let params = SampleParams::from_config(&self.cfg);
        let z_floor = self.cfg.z_floor;

        let result = match self.current_guard.reduce(self.current.as_mut()) {
            Ok(()) => {
                let motion = self.motion.as_mut();
                let bed = self.bed_sensor.as_mut();
                self.accel_guard
                    .wrap(motion, |m| session::run_probe(m, bed, &params, z_floor))
            }
            // 降流中途失败也走恢复路径，已降流的驱动器不能停在低电流
            Err(e) => Err(e.into()),
        };
        let restored = self.current_guard.restore(self.current.as_mut());
        let point = result?;
        restored?;

        self.last_bed_z = point.z;
        self.last_probe_position = point;
        info!("bed sensor measured z={:.6}", point.z);
        Ok(point.z)
    }

    fn home_z_inner(&mut self) -> Result<(), CalError> {
        self.set_phase(CalPhase::Preparing);
        self.move_to_reference()?;
        self.probe_inner()?;
        // 当前物理高度重置为气隙值，即触发点成为新的 Z=z_offset 平面
        self.motion.set_z_position(self.cfg.z_offset)?;
        self.set_phase(CalPhase::Lifting);
        self.lift()?;
        info!(
            "z homed via bed sensor, air gap {:.3} applied",
            self.cfg.z_offset
        );
        Ok(())
    }

    fn measure_offset_inner(&mut self) -> Result<f64, CalError> {
        self.set_phase(CalPhase::Preparing);
        self.move_to_reference()?;
        self.probe_inner()?;
        self.set_phase(CalPhase::Lifting);
        self.lift()?;

        // 平移，让参考探针对准刚探过的同一物理点
        self.set_phase(CalPhase::Repositioning);
        let (dx, dy) = self.reference_probe.xy_offset();
        self.motion.move_to(
            MoveTarget::xy(self.cfg.reference_x - dx, self.cfg.reference_y - dy),
            self.cfg.xy_speed,
        )?;

        self.set_phase(CalPhase::ProbingReference);
        let reference_z = self.probe_reference()?;

        self.set_phase(CalPhase::Computing);
        let true_offset = self.last_bed_z - reference_z;
        // 日志取反只是显示约定；参与平均的返回值不取反
        info!(
            "true nozzle offset z={:.6} (bed_z={:.6}, reference_z={:.6})",
            -true_offset, self.last_bed_z, reference_z
        );
        self.set_phase(CalPhase::Lifting);
        self.lift()?;
        Ok(true_offset)
    }

    fn calibrate_inner(&mut self) -> Result<(), CalError> {
        self.set_phase(CalPhase::Preparing);
        // 清掉已有的运行时偏移，避免污染测量
        self.motion.apply_z_offset(0.0)?;
        // 整备只做一次，环内抑制
        self.run_prepare()?;
        self.skip_prepare = true;
        self.current_guard.set_hold(true);

        let mut total = 0.0;
        let mut failure = self
            .current_guard
            .reduce(self.current.as_mut())
            .err()
            .map(CalError::from);
        if failure.is_none() {
            for run in 0..self.cfg.offset_samples {
                match self.measure_offset_inner() {
                    Ok(offset) => {
                        debug!(run, offset, "calibration run complete");
                        total += offset;
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        // 清理在每条路径上执行：释放 hold、恢复电流、恢复整备
        self.skip_prepare = false;
        self.current_guard.set_hold(false);
        let restored = self.current_guard.restore(self.current.as_mut());
        if let Some(e) = failure {
            return Err(e);
        }
        restored?;

        self.move_to_reference()?;
        self.set_phase(CalPhase::Averaging);
        let average = total / f64::from(self.cfg.offset_samples);
        // 唯一的语义符号反转点：存储约定是应用为正坐标偏移
        self.calibrated_z_offset = -average;

        self.set_phase(CalPhase::Applying);
        self.apply_offset()?;
        self.set_phase(CalPhase::Persisting);
        self.persist();
        Ok(())
    }

    fn probe_reference(&mut self) -> Result<f64, CalError> {
        match self.cfg.reference_sampling {
            ReferenceSampling::SingleShot => {
                let pos = self
                    .reference_probe
                    .probing_move(self.cfg.z_floor, self.cfg.speed)?;
                let offset = self.reference_probe.z_trigger_offset();
                Ok(ProbePoint::from_trigger(pos, offset).z)
            }
            ReferenceSampling::Sampled => {
                let params = SampleParams::from_config(&self.cfg);
                let z_floor = self.cfg.z_floor;
                let motion = self.motion.as_mut();
                let probe = self.reference_probe.as_mut();
                Ok(session::run_probe(motion, probe, &params, z_floor)?.z)
            }
        }
    }

    // ---- 辅助 --------------------------------------------------------

    fn run_prepare(&mut self) -> Result<(), CalError> {
        if self.skip_prepare {
            return Ok(());
        }
        if let Some(hook) = self.prepare.as_mut() {
            hook(self.motion.as_mut())?;
        }
        Ok(())
    }

    fn move_to_reference(&mut self) -> Result<(), CalError> {
        let z = self.motion.position().z.max(self.cfg.probe_hop);
        self.motion.move_to(
            MoveTarget::xyz(self.cfg.reference_x, self.cfg.reference_y, z),
            self.cfg.xy_speed,
        )?;
        Ok(())
    }

    fn lift(&mut self) -> Result<(), CalError> {
        let z = self.motion.position().z + self.cfg.probe_hop;
        self.motion
            .move_to(MoveTarget::z_only(z), self.cfg.resolved_lift_speed())?;
        Ok(())
    }

    fn apply_offset(&mut self) -> Result<(), CalError> {
        self.motion.apply_z_offset(self.calibrated_z_offset)?;
        info!(
            "applied calibrated_z_offset: {:.6}",
            self.calibrated_z_offset
        );
        Ok(())
    }

    fn persist(&mut self) {
        self.settings.set_float(
            SETTINGS_SECTION,
            "calibrated_z_offset",
            self.calibrated_z_offset,
        );
        info!(
            "calibrated_z_offset {:.6} staged; an explicit config save is still required to survive a restart",
            self.calibrated_z_offset
        );
    }

    fn ensure_attached(&self) -> Result<(), CalError> {
        if self.attached {
            Ok(())
        } else {
            Err(CalError::NotAttached)
        }
    }

    fn set_phase(&mut self, phase: CalPhase) {
        if phase != self.phase {
            debug!(from = ?self.phase, to = ?phase, "calibration phase");
            self.phase = phase;
        }
    }

    fn complete<T>(&mut self, result: Result<T, CalError>) -> Result<T, CalError> {
        match result {
            Ok(value) => {
                self.set_phase(CalPhase::Idle);
                Ok(value)
            }
            Err(e) => {
                self.set_phase(CalPhase::Failed);
                Err(e)
            }
        }
    }
}
