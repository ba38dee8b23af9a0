//! 状态上下文 - RobotState 快照发布
//!
//! `RobotState` 由执行器独占写入，通过 `ArcSwap` 整体替换；任何
//! 读者（命令接收、状态反馈、桥接层）随时 `load` 都得到一份完整、
//! 内部一致的快照，绝不会看到写了一半的状态。这替代了原系统中的
//! 全局可变量 + socket 散装发布。

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use lyra_kinematics::{CartesianPose, JointAngles};

use crate::link::GripperFeedback;
use crate::metrics::LoopMetrics;

/// 夹爪状态（反馈侧）
pub type GripperState = GripperFeedback;

/// 机器人状态快照
///
/// 不可变：创建后字段不再修改，替换只能整体替换。
#[derive(Debug, Clone, PartialEq)]
pub struct RobotState {
    /// 当前关节角（度），来自编码器反馈
    pub joints: JointAngles,
    /// 由正运动学导出的 TCP 位姿
    pub pose: CartesianPose,
    /// 8 位数字输入
    pub io_inputs: [u8; 8],
    pub gripper: GripperState,
    /// 执行器是否空闲（无在途轨迹）
    pub is_stopped: bool,
    pub estop_active: bool,
    /// 硬件链路是否在新鲜度窗口内有反馈
    pub link_connected: bool,
    /// 实测回路频率（Hz）
    pub loop_hz: f64,
    /// 快照时间（UNIX 微秒）
    pub system_timestamp_us: u64,
}

impl Default for RobotState {
    fn default() -> Self {
        RobotState {
            joints: JointAngles::ZERO,
            pose: CartesianPose::default(),
            // IO 全高 = 急停未按下
            io_inputs: [1; 8],
            gripper: GripperState::default(),
            is_stopped: true,
            estop_active: false,
            link_connected: false,
            loop_hz: 0.0,
            system_timestamp_us: 0,
        }
    }
}

/// 当前 UNIX 时间（微秒）
pub(crate) fn system_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// 指挥进程共享上下文
///
/// 热数据（`robot_state`）走 ArcSwap 无锁读取；计数器全是原子量。
pub struct CommanderContext {
    /// 机器人状态快照（执行器单写者）
    pub robot_state: ArcSwap<RobotState>,
    /// 回路与命令指标
    pub metrics: LoopMetrics,
}

impl CommanderContext {
    pub fn new() -> Self {
        CommanderContext {
            robot_state: ArcSwap::from_pointee(RobotState::default()),
            metrics: LoopMetrics::new(),
        }
    }

    /// 读取当前状态快照
    pub fn state(&self) -> Arc<RobotState> {
        self.robot_state.load_full()
    }
}

impl Default for CommanderContext {
    fn default() -> Self {
        Self::new()
    }
}
