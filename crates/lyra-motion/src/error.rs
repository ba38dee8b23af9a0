//! 规划错误类型定义

use lyra_kinematics::solver::IkFailReason;
use thiserror::Error;

/// 规划错误
///
/// `Validation` 在任何状态改变之前拒绝请求；`IkFailure` 表示批量
/// 求解中途失败：整个规划作废，**不安装任何部分轨迹**，执行器上的
/// 旧轨迹不受影响。
#[derive(Debug, Error)]
pub enum PlanError {
    /// 请求参数非法（越限、非有限值、超范围百分比等）
    #[error("validation failed: {0}")]
    Validation(String),

    /// 批量 IK 在某个路点上用尽细分与种子扫描后仍未收敛
    #[error("IK failed at waypoint {waypoint}/{total}: {reason}")]
    IkFailure {
        waypoint: usize,
        total: usize,
        reason: IkFailReason,
    },
}
