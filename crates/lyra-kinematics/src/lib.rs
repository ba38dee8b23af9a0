//! 运动学引擎 - LYRA-6 机械臂的正/逆运动学
//!
//! 本 crate 提供 LYRA-6 六轴机械臂的几何模型与数值求解能力：
//!
//! - **几何模型** (`model`): DH 参数链、TCP 偏移、关节限位表、正运动学
//! - **IK 求解器** (`solver`): 阻尼最小二乘（DLS）数值逆解，
//!   带自适应容差、递归细分与 J1 种子扫描恢复
//! - **基础类型** (`types`): `JointAngles`（度）、`CartesianPose`（毫米/度）、
//!   轴参与掩码、求解结果
//!
//! # 单位约定
//!
//! 对外接口一律使用**度**（关节角、姿态角）和**毫米**（位置）。
//! 这与上位机的线格式保持一致，避免在边界处反复换算。
//!
//! # 纯函数设计
//!
//! 求解器不持有可变状态：同一个 `IkSolver` 实例可以被离线规划器和
//! 在线查询方共享，两边永远得到一致的解。

mod error;
pub mod model;
pub mod solver;
pub mod types;

pub use error::KinematicsError;
pub use model::{ArmModel, DhRow, JointLimit};
pub use solver::{IkFailReason, IkOutcome, IkSolver, SolverConfig};
pub use types::{AxisMask, CartesianPose, JointAngles, normalize_angle_deg, shortest_arc_deg};
