//! 线协议定义 - 命令/确认/状态数据报
//!
//! 上位机与运动指挥进程之间的全部 UDP 数据报格式。一条数据报一条
//! JSON 消息，按 `type`（命令）或 `topic`（状态）字段区分：
//!
//! - **命令通道** (`command`): 上位机 → 指挥进程，fire-and-forget
//! - **确认通道** (`ack`): 指挥进程 → 上位机，每个 request_id 恰好
//!   一条终态确认
//! - **状态反馈** (`status`): 指挥进程 → 订阅方，按话题周期快照，
//!   外加笛卡尔规划期间的进度事件
//!
//! 桥接层（HTTP/WebSocket）把 REST 调用一比一翻译成这里的命令消息，
//! 本 crate 不关心它的存在。

mod ack;
mod command;
mod error;
mod status;

pub use ack::{AckMessage, AckStatus};
pub use command::CommandMessage;
pub use error::ProtoError;
pub use status::{PlanProgressMessage, StatusMessage, StatusTopic};
