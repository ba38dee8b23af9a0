//! 运动学错误类型定义

use thiserror::Error;

/// 运动学模型/配置错误
///
/// 仅在构建模型时可能出现。求解本身从不返回 `Err`：
/// 收敛失败通过 [`IkOutcome::Failed`](crate::IkOutcome) 表达。
#[derive(Debug, Error)]
pub enum KinematicsError {
    /// 关节限位上下界颠倒
    #[error("Joint J{joint} limit range inverted: min {min_deg}° >= max {max_deg}°")]
    InvertedLimit { joint: usize, min_deg: f64, max_deg: f64 },

    /// 关节最大速度/加速度非正
    #[error("Joint J{joint} rate must be positive: {value}")]
    NonPositiveRate { joint: usize, value: f64 },

    /// 求解器参数非法
    #[error("Invalid solver parameter {name}: {value}")]
    InvalidSolverParam { name: &'static str, value: f64 },
}
