//! 协议错误类型定义

use thiserror::Error;

/// 线协议错误
#[derive(Debug, Error)]
pub enum ProtoError {
    /// 数据报不是合法的 JSON 消息（或 type/topic 未知、字段缺失）
    #[error("malformed datagram: {0}")]
    Malformed(#[from] serde_json::Error),
}
