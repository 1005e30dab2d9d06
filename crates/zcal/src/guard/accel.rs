//! 加速度守卫
//!
//! 探测移动期间临时覆盖机器加速度上限，操作结束后无条件恢复原值。
//! 加速度状态绝不允许泄漏出一次失败的探测。

use tracing::debug;
use zcal_machine::MotionControl;

use crate::error::CalError;

/// 加速度守卫
///
/// `probe_accel` 为 0 时不做任何覆盖，操作原样执行。
#[derive(Debug, Clone, Copy)]
pub struct AccelGuard {
    probe_accel: f64,
}

impl AccelGuard {
    pub fn new(probe_accel: f64) -> Self {
        Self { probe_accel }
    }

    /// 在加速度覆盖下执行 `op`
    ///
    /// 恢复在每条退出路径上执行；`op` 的错误优先于恢复本身的错误上抛。
    pub fn wrap<T>(
        &self,
        motion: &mut dyn MotionControl,
        op: impl FnOnce(&mut dyn MotionControl) -> Result<T, CalError>,
    ) -> Result<T, CalError> {
        if self.probe_accel <= 0.0 {
            return op(motion);
        }
        let saved = motion.max_accel();
        motion.set_max_accel(self.probe_accel)?;
        debug!(saved, probe_accel = self.probe_accel, "accel override active");
        let result = op(&mut *motion);
        let restored = motion.set_max_accel(saved);
        let value = result?;
        restored?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zcal_machine::MachineError;
    use zcal_machine::mock::{DEFAULT_MAX_ACCEL, MockMachine};

    #[test]
    fn test_zero_override_leaves_accel_untouched() {
        let machine = MockMachine::new();
        let guard = AccelGuard::new(0.0);
        guard
            .wrap(&mut machine.clone(), |_| Ok(()))
            .expect("wrapped op");
        assert!(machine.accel_history().is_empty());
    }

    #[test]
    fn test_override_and_restore() {
        let mut handle = MockMachine::new();
        let machine = handle.clone();
        let guard = AccelGuard::new(500.0);
        let seen = guard
            .wrap(&mut handle, |m| Ok(m.max_accel()))
            .expect("wrapped op");
        assert_eq!(seen, 500.0);
        assert_eq!(machine.accel_history(), vec![500.0, DEFAULT_MAX_ACCEL]);
        assert_eq!(machine.max_accel(), DEFAULT_MAX_ACCEL);
    }

    #[test]
    fn test_restores_when_op_fails() {
        let mut handle = MockMachine::new();
        let machine = handle.clone();
        let guard = AccelGuard::new(500.0);
        let err = guard
            .wrap(&mut handle, |_| {
                Err::<(), _>(CalError::Machine(MachineError::Move("fault".to_string())))
            })
            .unwrap_err();
        assert!(matches!(err, CalError::Machine(_)));
        // 失败路径也恢复了原值
        assert_eq!(machine.max_accel(), DEFAULT_MAX_ACCEL);
    }
}
