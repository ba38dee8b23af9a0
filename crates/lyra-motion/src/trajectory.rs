//! 轨迹类型 - 按节拍索引的关节角序列

use lyra_kinematics::JointAngles;

/// 执行节拍周期（秒）
pub const TICK_SECONDS: f64 = 0.01;

/// 执行节拍频率（Hz）
pub const TICK_RATE_HZ: f64 = 100.0;

/// 轨迹来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    /// 关节空间插值
    Joint,
    /// 笛卡尔路点批量 IK
    Cartesian,
    /// 回零（关节空间到 Home 位形）
    Home,
}

/// 轨迹：时间索引的关节角设定点序列
///
/// 每个点对应一个 10ms 节拍。由规划器一次性创建，执行器逐拍只读
/// 消费，从不原位修改；替换只能整体替换（单写者/单读者分工）。
#[derive(Debug, Clone)]
pub struct Trajectory {
    request_id: u32,
    kind: MotionKind,
    points: Vec<JointAngles>,
}

impl Trajectory {
    pub fn new(request_id: u32, kind: MotionKind, points: Vec<JointAngles>) -> Self {
        Trajectory { request_id, kind, points }
    }

    /// 产生该轨迹的请求 id
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn kind(&self) -> MotionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 第 `tick` 拍的设定点，越界返回 `None`（执行器以此判定轨迹耗尽）
    pub fn point(&self, tick: usize) -> Option<&JointAngles> {
        self.points.get(tick)
    }

    pub fn last(&self) -> Option<&JointAngles> {
        self.points.last()
    }

    /// 名义执行时长（秒）
    pub fn duration_s(&self) -> f64 {
        self.points.len() as f64 * TICK_SECONDS
    }

    pub fn points(&self) -> &[JointAngles] {
        &self.points
    }
}
