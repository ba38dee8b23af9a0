//! 基础类型 - 关节角、笛卡尔位姿与轴掩码
//!
//! 所有类型都是纯数据（`Copy`），不携带模型引用，方便跨线程传递和快照发布。

use std::fmt;
use std::ops::{Index, IndexMut};

/// 关节数量（J1-J6）
pub const JOINT_COUNT: usize = 6;

/// 六关节角度（度）
///
/// NewType 包装 `[f64; 6]`，下标 0-5 对应 J1-J6。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointAngles(pub [f64; 6]);

impl JointAngles {
    /// 全零位形
    pub const ZERO: Self = JointAngles([0.0; 6]);

    pub const fn new(deg: [f64; 6]) -> Self {
        JointAngles(deg)
    }

    pub fn as_array(&self) -> &[f64; 6] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().copied()
    }

    /// 所有分量是否有限（排除 NaN/Inf 输入）
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// 解缠绕：把每个关节角调整到离 `reference` 最近的等价角
    ///
    /// -179° 与 181° 物理上只差 2°，但数值上差 360°。逐关节比较差值，
    /// 超过 180° 就加减一整圈，避免求解结果让关节绕远路。
    pub fn unwrapped_toward(&self, reference: &JointAngles) -> JointAngles {
        let mut out = *self;
        for i in 0..JOINT_COUNT {
            let diff = self.0[i] - reference.0[i];
            if diff > 180.0 {
                out.0[i] = self.0[i] - 360.0;
            } else if diff < -180.0 {
                out.0[i] = self.0[i] + 360.0;
            }
        }
        out
    }

    /// 与另一位形的最大逐关节偏差（度）
    pub fn max_abs_diff(&self, other: &JointAngles) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl Index<usize> for JointAngles {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl IndexMut<usize> for JointAngles {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.0[index]
    }
}

impl From<[f64; 6]> for JointAngles {
    fn from(deg: [f64; 6]) -> Self {
        JointAngles(deg)
    }
}

impl fmt::Display for JointAngles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.2}, {:.2}, {:.2}, {:.2}, {:.2}, {:.2}]°",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// 笛卡尔位姿
///
/// 位置单位毫米，姿态为 XYZ 欧拉角（度），参考基座坐标系，
/// 已包含 TCP 偏移。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CartesianPose {
    /// X 位置（mm）
    pub x: f64,
    /// Y 位置（mm）
    pub y: f64,
    /// Z 位置（mm）
    pub z: f64,
    /// 绕 X 轴姿态角（度）
    pub rx: f64,
    /// 绕 Y 轴姿态角（度）
    pub ry: f64,
    /// 绕 Z 轴姿态角（度）
    pub rz: f64,
}

impl CartesianPose {
    pub const fn new(x: f64, y: f64, z: f64, rx: f64, ry: f64, rz: f64) -> Self {
        CartesianPose { x, y, z, rx, ry, rz }
    }

    /// 以 `[x, y, z, rx, ry, rz]` 数组构造（线格式顺序）
    pub fn from_vector(v: [f64; 6]) -> Self {
        CartesianPose::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }

    /// 转为 `[x, y, z, rx, ry, rz]` 数组（线格式顺序）
    pub fn to_vector(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.rx, self.ry, self.rz]
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|v| v.is_finite())
    }

    /// 基座到 TCP 的伸展距离（mm）
    pub fn reach(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// 位置分量的欧氏距离（mm）
    pub fn position_distance(&self, other: &CartesianPose) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// 朝 `target` 插值 `s ∈ [0, 1]`
    ///
    /// 位置线性插值；姿态角逐分量走**短弧**：先把角差归一到
    /// `[-180, 180]`，再按比例叠加。170° → −170° 会经过 ±180°，
    /// 而不是绕行 340° 经过 0°。
    pub fn interp_toward(&self, target: &CartesianPose, s: f64) -> CartesianPose {
        CartesianPose {
            x: self.x + (target.x - self.x) * s,
            y: self.y + (target.y - self.y) * s,
            z: self.z + (target.z - self.z) * s,
            rx: interp_angle_deg(self.rx, target.rx, s),
            ry: interp_angle_deg(self.ry, target.ry, s),
            rz: interp_angle_deg(self.rz, target.rz, s),
        }
    }
}

impl fmt::Display for CartesianPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "xyz=({:.1}, {:.1}, {:.1})mm rpy=({:.1}, {:.1}, {:.1})°",
            self.x, self.y, self.z, self.rx, self.ry, self.rz
        )
    }
}

/// 把角度归一化到 `[-180, 180)`（度）
pub fn normalize_angle_deg(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a >= 180.0 {
        a -= 360.0;
    } else if a < -180.0 {
        a += 360.0;
    }
    a
}

/// `from` 到 `to` 的短弧角差（度，落在 `[-180, 180)`）
pub fn shortest_arc_deg(from: f64, to: f64) -> f64 {
    normalize_angle_deg(to - from)
}

/// 角度短弧插值
fn interp_angle_deg(from: f64, to: f64, s: f64) -> f64 {
    normalize_angle_deg(from + shortest_arc_deg(from, to) * s)
}

/// 位姿分量参与掩码
///
/// Bit 0-5 对应 (x, y, z, rx, ry, rz)。被掩掉的分量不计入误差范数，
/// 也不参与雅可比行，用于仅位置求解等部分位姿场景。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisMask(pub u8);

impl AxisMask {
    /// 完整 6 自由度位姿
    pub const FULL_POSE: Self = AxisMask(0b111111);
    /// 仅位置（x, y, z）
    pub const POSITION_ONLY: Self = AxisMask(0b000111);

    /// 第 `axis` 个位姿分量是否参与匹配
    pub fn includes(&self, axis: usize) -> bool {
        axis < 6 && (self.0 >> axis) & 1 == 1
    }

    /// 参与匹配的分量数
    pub fn active_count(&self) -> u32 {
        (self.0 & 0b111111).count_ones()
    }
}

impl Default for AxisMask {
    fn default() -> Self {
        AxisMask::FULL_POSE
    }
}
