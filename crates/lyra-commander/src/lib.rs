//! 运动指挥运行时 - LYRA-6 的实时控制核心
//!
//! 本模块把规划、执行、安全三块拼成一个进程内运行时：
//!
//! - 状态上下文 (`context`): ArcSwap 快照发布（单写者/多读者）
//! - 安全监督 (`safety`): 限位校验、急停闩锁、通信故障升级
//! - 连接监控 (`monitor`): 硬件链路反馈新鲜度检测
//! - 硬件链路 (`link`): `write_setpoints` / `read_feedback` 抽象 +
//!   回环仿真实现
//! - 轨迹执行器 (`executor`): 100Hz 定拍回路，唯一的硬实时路径
//! - 命令接收 (`ingress`): 校验、规划分派、确认发射，永不阻塞回路
//! - 回路指标 (`metrics`): 节拍计数与实测频率
//! - 配置 (`config`): TOML 聚合配置
//!
//! # 线程模型
//!
//! 三个逻辑并发体：执行器（硬实时，10ms 预算，绝不做 IK）、
//! 命令接收/确认（异步）、笛卡尔规划工人（每请求一个，可被新请求
//! 隐式取代）。轨迹通过单格邮箱移交，最新请求总是赢，没有运动队列。

mod builder;
pub mod config;
pub mod context;
mod error;
pub mod executor;
pub mod ingress;
pub mod link;
pub mod metrics;
pub mod monitor;
pub mod safety;

pub use builder::{CommanderBuilder, CommanderRuntime};
pub use config::CommanderConfig;
pub use context::{CommanderContext, GripperState, RobotState};
pub use error::CommanderError;
pub use executor::PendingMotion;
pub use ingress::{IngressParams, MotionCommander};
pub use link::{GripperSetpoint, HardwareLink, LinkError, LinkFeedback, LoopbackHandle, LoopbackLink};
pub use metrics::{LoopMetrics, MetricsSnapshot};
pub use monitor::FeedbackMonitor;
pub use safety::{EstopSource, SafetyFault, SafetySupervisor};
