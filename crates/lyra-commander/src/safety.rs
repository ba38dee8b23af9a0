//! 安全监督 - 限位校验与急停闩锁
//!
//! 两条职责：
//!
//! 1. **逐拍设定点校验**：六轴都必须落在配置限位内。越界**拒绝**
//!    而不是钳位：钳位会把规划器的 bug 伪装成正常运动。
//! 2. **急停闩锁**：手动命令和硬件 IO 输入位（低有效）都能触发；
//!    一旦闩住，所有运动命令被拒绝，直到物理急停确认松开后收到
//!    显式清错命令。通信故障升级也走同一个闩锁。

use std::fmt;
use std::sync::Arc;

use lyra_kinematics::{ArmModel, JointAngles};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

/// 急停来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstopSource {
    /// 上位机 ESTOP 命令
    Manual,
    /// 硬件急停输入位
    HardwareInput,
}

impl fmt::Display for EstopSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstopSource::Manual => write!(f, "manual command"),
            EstopSource::HardwareInput => write!(f, "hardware input"),
        }
    }
}

impl std::error::Error for EstopSource {}

/// 安全故障
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SafetyFault {
    /// 设定点越限（直接拒绝，不钳位）
    #[error("joint J{joint} setpoint {value:.3}° outside limits [{min:.3}, {max:.3}]")]
    LimitViolation { joint: usize, value: f64, min: f64, max: f64 },

    /// 急停已触发
    #[error("emergency stop active (source: {source})")]
    EstopActive { source: EstopSource },

    /// 硬件反馈超时（CommunicationError 升级）
    #[error("hardware link lost after {retries} consecutive failures: {detail}")]
    CommunicationLost { retries: u32, detail: String },
}

/// 安全参数
#[derive(Debug, Clone)]
pub struct SafetyParams {
    /// 急停所在的数字输入位（0-7）
    pub estop_input_bit: usize,
    /// 反馈新鲜度窗口（节拍数）
    pub stale_feedback_ticks: u32,
    /// 连续通信失败多少次后升级为安全故障
    pub comm_retry_limit: u32,
}

impl Default for SafetyParams {
    fn default() -> Self {
        SafetyParams {
            estop_input_bit: 4,
            stale_feedback_ticks: 10,
            comm_retry_limit: 5,
        }
    }
}

/// 安全监督器
///
/// 被执行器（逐拍校验、IO 观察）和命令接收（命令级拒绝、清错）
/// 共享；内部状态只有一个故障闩锁。
pub struct SafetySupervisor {
    model: Arc<ArmModel>,
    params: SafetyParams,
    latched_fault: Mutex<Option<SafetyFault>>,
}

impl SafetySupervisor {
    pub fn new(model: Arc<ArmModel>, params: SafetyParams) -> Self {
        SafetySupervisor {
            model,
            params,
            latched_fault: Mutex::new(None),
        }
    }

    pub fn params(&self) -> &SafetyParams {
        &self.params
    }

    /// 逐拍设定点校验
    ///
    /// 急停闩锁优先于限位检查：故障态下任何设定点都不允许下发。
    pub fn validate_setpoint(&self, q: &JointAngles) -> Result<(), SafetyFault> {
        if let Some(fault) = self.latched_fault.lock().clone() {
            return Err(fault);
        }
        self.check_limits(q)
    }

    /// 仅限位检查（命令入口校验目标用，不看闩锁）
    pub fn check_limits(&self, q: &JointAngles) -> Result<(), SafetyFault> {
        for (i, limit) in self.model.limits().iter().enumerate() {
            if !limit.contains(q[i]) {
                return Err(SafetyFault::LimitViolation {
                    joint: i + 1,
                    value: q[i],
                    min: limit.min_deg,
                    max: limit.max_deg,
                });
            }
        }
        Ok(())
    }

    /// 闩锁一个安全故障（已有故障时保留最早的那个）
    pub fn latch_fault(&self, fault: SafetyFault) {
        let mut latched = self.latched_fault.lock();
        if latched.is_none() {
            error!(%fault, "safety fault latched");
            *latched = Some(fault);
        }
    }

    /// 触发急停（手动或硬件源）
    pub fn assert_estop(&self, source: EstopSource) {
        self.latch_fault(SafetyFault::EstopActive { source });
    }

    /// 通信故障升级（执行器在重试耗尽后调用）
    pub fn latch_comm_fault(&self, retries: u32, detail: String) {
        self.latch_fault(SafetyFault::CommunicationLost { retries, detail });
    }

    /// 急停/故障是否闩住
    pub fn fault_active(&self) -> bool {
        self.latched_fault.lock().is_some()
    }

    /// 急停是否处于触发态（闩锁的故障正是急停）
    pub fn estop_active(&self) -> bool {
        matches!(
            *self.latched_fault.lock(),
            Some(SafetyFault::EstopActive { .. })
        )
    }

    /// 当前闩住的故障
    pub fn latched_fault(&self) -> Option<SafetyFault> {
        self.latched_fault.lock().clone()
    }

    /// 硬件急停输入是否处于按下状态（低有效）
    pub fn hardware_estop_pressed(&self, io_inputs: &[u8; 8]) -> bool {
        io_inputs[self.params.estop_input_bit] == 0
    }

    /// 执行器每拍用最新 IO 调用：硬件急停按下则闩锁
    pub fn observe_io(&self, io_inputs: &[u8; 8]) {
        if self.hardware_estop_pressed(io_inputs) {
            self.assert_estop(EstopSource::HardwareInput);
        }
    }

    /// 显式清错
    ///
    /// 只有物理急停输入确认松开时才允许清除；否则保持故障态并报告
    /// 原因。
    pub fn try_clear(&self, io_inputs: &[u8; 8]) -> Result<(), SafetyFault> {
        if self.hardware_estop_pressed(io_inputs) {
            warn!("clear rejected: hardware E-stop input still pressed");
            return Err(SafetyFault::EstopActive { source: EstopSource::HardwareInput });
        }
        let had_fault = self.latched_fault.lock().take();
        if let Some(fault) = had_fault {
            info!(%fault, "safety fault cleared");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> SafetySupervisor {
        SafetySupervisor::new(Arc::new(ArmModel::lyra6()), SafetyParams::default())
    }

    #[test]
    fn test_out_of_limit_setpoint_rejected_not_clamped() {
        let safety = supervisor();
        let q = JointAngles::new([0.0, 130.0, 0.0, 0.0, 0.0, 0.0]);

        let err = safety.validate_setpoint(&q).unwrap_err();
        match err {
            SafetyFault::LimitViolation { joint, value, min, max } => {
                assert_eq!(joint, 2);
                assert_eq!(value, 130.0);
                assert_eq!((min, max), (-120.0, 120.0));
            },
            other => panic!("wrong fault: {other:?}"),
        }
    }

    #[test]
    fn test_estop_latches_until_cleared() {
        let safety = supervisor();
        let ok = JointAngles::ZERO;
        assert!(safety.validate_setpoint(&ok).is_ok());

        safety.assert_estop(EstopSource::Manual);
        assert!(safety.fault_active());
        assert!(matches!(
            safety.validate_setpoint(&ok),
            Err(SafetyFault::EstopActive { source: EstopSource::Manual })
        ));

        // 硬件输入仍按下（位 4 为 0）：清错被拒
        let pressed = [1, 1, 1, 1, 0, 1, 1, 1];
        assert!(safety.try_clear(&pressed).is_err());
        assert!(safety.fault_active());

        // 松开后才能清
        let released = [1; 8];
        safety.try_clear(&released).unwrap();
        assert!(!safety.fault_active());
        assert!(safety.validate_setpoint(&ok).is_ok());
    }

    #[test]
    fn test_hardware_estop_observed_from_io() {
        let safety = supervisor();
        let mut io = [1u8; 8];
        safety.observe_io(&io);
        assert!(!safety.fault_active());

        io[4] = 0;
        safety.observe_io(&io);
        assert!(matches!(
            safety.latched_fault(),
            Some(SafetyFault::EstopActive { source: EstopSource::HardwareInput })
        ));
    }

    #[test]
    fn test_first_estop_source_wins() {
        let safety = supervisor();
        safety.assert_estop(EstopSource::HardwareInput);
        safety.assert_estop(EstopSource::Manual);
        assert!(matches!(
            safety.latched_fault(),
            Some(SafetyFault::EstopActive { source: EstopSource::HardwareInput })
        ));
    }

    #[test]
    fn test_comm_fault_does_not_overwrite_estop() {
        let safety = supervisor();
        safety.assert_estop(EstopSource::Manual);
        safety.latch_comm_fault(5, "silent link".into());
        assert!(matches!(
            safety.latched_fault(),
            Some(SafetyFault::EstopActive { .. })
        ));
    }
}
