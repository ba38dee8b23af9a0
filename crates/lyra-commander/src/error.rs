//! 指挥进程错误类型定义

use lyra_motion::PlanError;
use thiserror::Error;

use crate::link::LinkError;
use crate::safety::SafetyFault;

/// 指挥进程错误
///
/// 四类错误语义：校验错误在入队前拒绝、IK 失败不安装轨迹、安全
/// 故障停机待清错、通信错误有限重试后升级。没有任何变体会让进程
/// 退出，只影响在途运动。
#[derive(Debug, Error)]
pub enum CommanderError {
    /// 请求参数非法（入队前拒绝，无状态变化）
    #[error("validation failed: {0}")]
    Validation(String),

    /// 规划失败（含批量 IK 不收敛；不产出部分轨迹）
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// 安全故障（限位越界或急停；需要显式清错）
    #[error("safety fault: {0}")]
    Safety(#[from] SafetyFault),

    /// 硬件链路错误
    #[error("hardware link error: {0}")]
    Link(#[from] LinkError),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),
}
