//! 确认数据报定义

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// 确认状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    /// 轨迹已开始执行
    #[serde(rename = "STARTED")]
    Started,
    /// 轨迹自然走完
    #[serde(rename = "COMPLETED")]
    Completed,
    /// 请求被拒绝（校验失败 / IK 失败 / 安全拒绝 / 被新请求取代）
    #[serde(rename = "REJECTED")]
    Rejected,
}

/// 确认消息（指挥进程 → 上位机，独立端口）
///
/// 每个 request_id 收到恰好一条**终态**确认（`COMPLETED` 或
/// `REJECTED`）；`STARTED` 是过程通知，在执行开始时额外发出。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    pub request_id: u32,
    pub status: AckStatus,
    /// 拒绝原因（仅 `REJECTED` 携带）
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

impl AckMessage {
    pub fn started(request_id: u32) -> Self {
        AckMessage { request_id, status: AckStatus::Started, reason: None }
    }

    pub fn completed(request_id: u32) -> Self {
        AckMessage { request_id, status: AckStatus::Completed, reason: None }
    }

    pub fn rejected(request_id: u32, reason: impl Into<String>) -> Self {
        AckMessage { request_id, status: AckStatus::Rejected, reason: Some(reason.into()) }
    }

    /// 是否是终态确认（每个 request_id 只出现一次）
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, AckStatus::Completed | AckStatus::Rejected)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }
}
