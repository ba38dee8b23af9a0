//! 状态反馈数据报定义
//!
//! 订阅方通过 `SUBSCRIBE` 命令注册话题，指挥进程按各话题配置的
//! 频率周期发布 `RobotState` 快照的对应切片。`progress` 话题是
//! 事件驱动的：只在笛卡尔规划期间产生。

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// 状态话题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTopic {
    /// 连接 / 急停 / 回路频率
    Status,
    /// 关节角
    Joints,
    /// TCP 位姿
    Pose,
    /// 数字 IO
    Io,
    /// 夹爪
    Gripper,
    /// 笛卡尔规划进度（事件驱动）
    Progress,
}

/// 状态消息（指挥进程 → 订阅方）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "lowercase")]
pub enum StatusMessage {
    Status {
        /// 硬件链路是否在反馈窗口内有数据
        connected: bool,
        estop_active: bool,
        /// 执行器是否空闲（没有在跑轨迹）
        is_stopped: bool,
        /// 实测回路频率（Hz）
        loop_hz: f64,
    },
    Joints {
        /// [J1..J6]（度）
        angles: [f64; 6],
    },
    Pose {
        /// [x, y, z, rx, ry, rz]（mm / 度）
        pose: [f64; 6],
    },
    Io {
        /// 8 位数字输入状态
        inputs: [u8; 8],
    },
    Gripper {
        position: i32,
        speed: i32,
        current: i32,
        status_code: u8,
        object_detected: bool,
    },
}

impl StatusMessage {
    pub fn topic(&self) -> StatusTopic {
        match self {
            StatusMessage::Status { .. } => StatusTopic::Status,
            StatusMessage::Joints { .. } => StatusTopic::Joints,
            StatusMessage::Pose { .. } => StatusTopic::Pose,
            StatusMessage::Io { .. } => StatusTopic::Io,
            StatusMessage::Gripper { .. } => StatusTopic::Gripper,
        }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// 规划进度消息（`progress` 话题）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProgressMessage {
    pub request_id: u32,
    /// 已求解路点数
    pub current: usize,
    /// 总路点数
    pub total: usize,
    /// 种子扫描恢复累计
    pub recoveries: u32,
}

impl PlanProgressMessage {
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }
}
