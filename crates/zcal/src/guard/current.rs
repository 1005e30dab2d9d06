//! Z 电机电流守卫
//!
//! 机器就绪后枚举全部轴驱动器，按命名约定筛出 Z 轴的电流驱动并缓存其
//! 额定电流。探测前 `reduce()` 按系数降流，探测后 `restore()` 恢复；
//! `hold` 标志允许外层标定环把多次 reduce/restore 合并成一个连续的
//! 低电流窗口，此时内层的 `restore()` 是 no-op，最终恢复由外层负责。

use tracing::debug;
use zcal_machine::{CurrentControl, DriverInfo, MachineError};

/// 一个被管理的 Z 轴驱动器及其额定电流
#[derive(Debug, Clone, PartialEq)]
pub struct AxisCurrentRecord {
    pub axis: String,
    pub nominal: f64,
}

/// 电流守卫
///
/// 状态不变量：
/// - `reduce()` 在已降流时是 no-op（幂等）
/// - `restore()` 在 `hold` 置位或未降流时是 no-op
#[derive(Debug)]
pub struct CurrentGuard {
    factor: f64,
    records: Vec<AxisCurrentRecord>,
    is_reduced: bool,
    hold: bool,
}

/// 判断驱动器名是否为 Z 轴电流驱动
///
/// 约定：名称由两段组成，`"<驱动类型> <轴名>"`，驱动类型以 `tmc` 开头，
/// 轴名以 `stepper_z` 开头（覆盖 `stepper_z`、`stepper_z1` 等多 Z 机型）。
fn is_z_current_driver(name: &str) -> bool {
    let mut parts = name.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some(axis), None) => kind.starts_with("tmc") && axis.starts_with("stepper_z"),
        _ => false,
    }
}

impl CurrentGuard {
    pub fn new(factor: f64) -> Self {
        Self {
            factor,
            records: Vec::new(),
            is_reduced: false,
            hold: false,
        }
    }

    /// 机器就绪后的一次性发现
    ///
    /// 零匹配是合法的（机器没有可控的 Z 电流），此时 reduce/restore
    /// 退化为纯标志位操作。
    pub fn discover(&mut self, drivers: &[DriverInfo]) {
        self.records = drivers
            .iter()
            .filter(|d| is_z_current_driver(&d.name))
            .map(|d| {
                // set_current 按轴名寻址，去掉驱动类型前缀
                let axis = d.name.split_whitespace().nth(1).unwrap_or(&d.name);
                AxisCurrentRecord {
                    axis: axis.to_string(),
                    nominal: d.run_current,
                }
            })
            .collect();
        debug!(
            "current guard discovered {} z-axis driver(s)",
            self.records.len()
        );
    }

    /// 按系数降低全部受管驱动器的运行电流（幂等）
    ///
    /// 降流标志在发出第一条命令之前置位：即使中途失败，后续的
    /// `restore()` 仍会把所有驱动器恢复到额定值。
    pub fn reduce(&mut self, current: &mut dyn CurrentControl) -> Result<(), MachineError> {
        if self.is_reduced {
            return Ok(());
        }
        self.is_reduced = true;
        for record in &self.records {
            let reduced = record.nominal * self.factor;
            debug!(axis = %record.axis, amps = reduced, "reducing z motor current");
            current.set_current(&record.axis, reduced)?;
        }
        Ok(())
    }

    /// 恢复全部受管驱动器的额定电流
    ///
    /// `hold` 置位或未降流时是 no-op；标志在全部命令成功后才清除，
    /// 失败时保持降流状态以便重试恢复。
    pub fn restore(&mut self, current: &mut dyn CurrentControl) -> Result<(), MachineError> {
        if !self.is_reduced || self.hold {
            return Ok(());
        }
        for record in &self.records {
            debug!(axis = %record.axis, amps = record.nominal, "restoring z motor current");
            current.set_current(&record.axis, record.nominal)?;
        }
        self.is_reduced = false;
        Ok(())
    }

    /// 外层标定环用：置位后内层 `restore()` 不再生效
    pub fn set_hold(&mut self, hold: bool) {
        self.hold = hold;
    }

    pub fn is_reduced(&self) -> bool {
        self.is_reduced
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[AxisCurrentRecord] {
        &self.records
    }
}
