//! 命令数据报定义

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::status::StatusTopic;

fn default_timeout_s() -> f64 {
    5.0
}

/// 命令消息（上位机 → 指挥进程）
///
/// `wait_for_ack` 只影响上位机侧要不要等确认通道；指挥进程对每条
/// 携带 request_id 的命令都会发确认，自身从不阻塞等待确认被消费。
/// `timeout_s` 同样只约束上位机侧的等待，控制回路内不存在超时。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandMessage {
    /// 关节空间运动
    #[serde(rename = "MOVE_JOINTS")]
    MoveJoints {
        request_id: u32,
        /// 目标关节角 [J1..J6]（度）
        angles: [f64; 6],
        /// 速度百分比 (0, 100]
        speed_pct: f64,
        /// 加速度百分比 (0, 100]
        accel_pct: f64,
        #[serde(default)]
        wait_for_ack: bool,
        #[serde(default = "default_timeout_s")]
        timeout_s: f64,
    },

    /// 笛卡尔空间运动
    #[serde(rename = "MOVE_CARTESIAN")]
    MoveCartesian {
        request_id: u32,
        /// 目标位姿 [x, y, z, rx, ry, rz]（mm / 度）
        pose: [f64; 6],
        /// 运动时长（秒），决定路点数 floor(duration/0.01)
        duration_s: f64,
        #[serde(default)]
        wait_for_ack: bool,
        #[serde(default = "default_timeout_s")]
        timeout_s: f64,
    },

    /// 急停：立即停写设定点并进入故障态
    #[serde(rename = "ESTOP")]
    Estop { request_id: u32 },

    /// 清错：物理急停确认松开后，从故障态回到空闲
    #[serde(rename = "CLEAR_ERROR")]
    ClearError { request_id: u32 },

    /// 回零：关节空间回到 Home 位形
    #[serde(rename = "HOME")]
    Home {
        request_id: u32,
        #[serde(default)]
        wait_for_ack: bool,
        #[serde(default = "default_timeout_s")]
        timeout_s: f64,
    },

    /// 夹爪设定点直通（不经过规划器）
    #[serde(rename = "GRIPPER")]
    Gripper {
        request_id: u32,
        /// 目标开度（0-255，设备行程单位）
        position: u8,
        /// 速度（0-255）
        speed: u8,
        /// 电流限制（mA）
        current: u16,
    },

    /// 订阅状态反馈话题（发往状态端口）
    #[serde(rename = "SUBSCRIBE")]
    Subscribe {
        /// 订阅的话题名（"status" / "joints" / "pose" / "io" / "gripper" / "progress"）
        topics: Vec<StatusTopic>,
    },
}

impl CommandMessage {
    /// 命令携带的请求 id（订阅消息没有）
    pub fn request_id(&self) -> Option<u32> {
        match self {
            CommandMessage::MoveJoints { request_id, .. }
            | CommandMessage::MoveCartesian { request_id, .. }
            | CommandMessage::Estop { request_id }
            | CommandMessage::ClearError { request_id }
            | CommandMessage::Home { request_id, .. }
            | CommandMessage::Gripper { request_id, .. } => Some(*request_id),
            CommandMessage::Subscribe { .. } => None,
        }
    }

    /// 从一条数据报解码
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// 编码为一条数据报
    pub fn to_vec(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }
}
