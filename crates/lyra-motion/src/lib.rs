//! 运动规划 - 把高层运动请求变成逐拍关节轨迹
//!
//! 两条规划路径，开销差异巨大，并发模型完全不同：
//!
//! - **关节空间** (`joint_plan`): 纯插值，不碰 IK，微秒级完成，
//!   可以在命令接收线程同步执行
//! - **笛卡尔空间** (`cartesian_plan`): 逐路点批量 IK，耗时与
//!   路点数 × 单次求解成本成正比，必须放到独立工作线程，
//!   绝不允许出现在 100Hz 执行线程上
//!
//! 两条路径产出同一种 [`Trajectory`]：按 10ms 节拍索引的关节角序列，
//! 由执行器逐拍消费。

mod cartesian_plan;
mod error;
mod joint_plan;
mod trajectory;

pub use cartesian_plan::{PlanProgress, PlanningReport, plan_cartesian_move};
pub use error::PlanError;
pub use joint_plan::plan_joint_move;
pub use trajectory::{MotionKind, TICK_RATE_HZ, TICK_SECONDS, Trajectory};
