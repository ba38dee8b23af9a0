//! 几何模型 - DH 参数链、关节限位与正运动学
//!
//! 模型由六行标准 DH 参数 + 可配置的 TCP 偏移组成。正运动学是闭式的、
//! 确定性的：同一组关节角永远得到同一个位姿。
//!
//! # DH 约定
//!
//! 每行变换为 `Rz(θ+offset) · Tz(d) · Tx(a) · Rx(α)`，长度单位毫米，
//! 角度单位度（内部换算为弧度）。

use nalgebra::{Isometry3, UnitQuaternion, Vector3};
use smallvec::SmallVec;

use crate::error::KinematicsError;
use crate::types::{CartesianPose, JOINT_COUNT, JointAngles};

/// 一行 DH 参数
#[derive(Debug, Clone, Copy)]
pub struct DhRow {
    /// 连杆长度 a（mm）
    pub a_mm: f64,
    /// 连杆扭角 α（度）
    pub alpha_deg: f64,
    /// 连杆偏距 d（mm）
    pub d_mm: f64,
    /// 关节角偏置 θ_offset（度），叠加在指令角上
    pub theta_offset_deg: f64,
}

/// 单关节限位与速率参数
#[derive(Debug, Clone, Copy)]
pub struct JointLimit {
    /// 下限（度）
    pub min_deg: f64,
    /// 上限（度）
    pub max_deg: f64,
    /// 最大角速度（度/秒），速度百分比的 100% 基准
    pub max_velocity_dps: f64,
    /// 最大角加速度（度/秒²），加速度百分比的 100% 基准
    pub max_accel_dps2: f64,
}

impl JointLimit {
    pub fn contains(&self, angle_deg: f64) -> bool {
        angle_deg >= self.min_deg && angle_deg <= self.max_deg
    }

    pub fn clamp(&self, angle_deg: f64) -> f64 {
        angle_deg.clamp(self.min_deg, self.max_deg)
    }
}

/// LYRA-6 几何模型
///
/// 持有 DH 链、TCP 偏移、限位表和伸展参数。构建后不可变，
/// 可以放进 `Arc` 被执行器、规划器和离线查询方共享。
#[derive(Debug, Clone)]
pub struct ArmModel {
    dh: [DhRow; 6],
    tcp_offset: Isometry3<f64>,
    limits: [JointLimit; 6],
    home: JointAngles,
    /// 标称最大伸展（mm），由臂展实验标定
    base_max_reach_mm: f64,
    /// J5 接近 ±90° 时的伸展缩减量（mm）
    reach_reduction_mm: f64,
}

impl ArmModel {
    /// 从完整参数构建模型，校验限位表
    pub fn new(
        dh: [DhRow; 6],
        tcp_offset: CartesianPose,
        limits: [JointLimit; 6],
        home: JointAngles,
        base_max_reach_mm: f64,
        reach_reduction_mm: f64,
    ) -> Result<Self, KinematicsError> {
        for (i, limit) in limits.iter().enumerate() {
            if limit.min_deg >= limit.max_deg {
                return Err(KinematicsError::InvertedLimit {
                    joint: i + 1,
                    min_deg: limit.min_deg,
                    max_deg: limit.max_deg,
                });
            }
            if limit.max_velocity_dps <= 0.0 {
                return Err(KinematicsError::NonPositiveRate {
                    joint: i + 1,
                    value: limit.max_velocity_dps,
                });
            }
            if limit.max_accel_dps2 <= 0.0 {
                return Err(KinematicsError::NonPositiveRate {
                    joint: i + 1,
                    value: limit.max_accel_dps2,
                });
            }
        }

        Ok(ArmModel {
            dh,
            tcp_offset: pose_to_isometry(&tcp_offset),
            limits,
            home,
            base_max_reach_mm,
            reach_reduction_mm,
        })
    }

    /// LYRA-6 出厂 DH 参数表
    ///
    /// 连杆几何是机械本体的固有属性，不进配置文件；TCP 偏移、限位
    /// 等标定量才允许覆盖。
    pub fn lyra6_dh() -> [DhRow; 6] {
        [
            DhRow { a_mm: 25.0, alpha_deg: -90.0, d_mm: 110.0, theta_offset_deg: 0.0 },
            DhRow { a_mm: 180.0, alpha_deg: 0.0, d_mm: 0.0, theta_offset_deg: -90.0 },
            DhRow { a_mm: 45.0, alpha_deg: -90.0, d_mm: 0.0, theta_offset_deg: 0.0 },
            DhRow { a_mm: 0.0, alpha_deg: 90.0, d_mm: 175.0, theta_offset_deg: 0.0 },
            DhRow { a_mm: 0.0, alpha_deg: -90.0, d_mm: 0.0, theta_offset_deg: 0.0 },
            DhRow { a_mm: 0.0, alpha_deg: 0.0, d_mm: 65.0, theta_offset_deg: 0.0 },
        ]
    }

    /// LYRA-6 出厂几何
    ///
    /// 桌面级六轴臂，臂展约 440mm。限位与速率取自出厂标定表。
    pub fn lyra6() -> Self {
        let dh = Self::lyra6_dh();
        let limits = [
            JointLimit { min_deg: -170.0, max_deg: 170.0, max_velocity_dps: 90.0, max_accel_dps2: 300.0 },
            JointLimit { min_deg: -120.0, max_deg: 120.0, max_velocity_dps: 90.0, max_accel_dps2: 300.0 },
            JointLimit { min_deg: -150.0, max_deg: 150.0, max_velocity_dps: 120.0, max_accel_dps2: 360.0 },
            JointLimit { min_deg: -170.0, max_deg: 170.0, max_velocity_dps: 150.0, max_accel_dps2: 450.0 },
            JointLimit { min_deg: -110.0, max_deg: 110.0, max_velocity_dps: 150.0, max_accel_dps2: 450.0 },
            JointLimit { min_deg: -180.0, max_deg: 180.0, max_velocity_dps: 180.0, max_accel_dps2: 600.0 },
        ];
        let home = JointAngles::new([0.0, -60.0, 60.0, 0.0, 30.0, 0.0]);

        ArmModel::new(dh, CartesianPose::default(), limits, home, 440.0, 45.0)
            .expect("factory geometry is valid")
    }

    pub fn limits(&self) -> &[JointLimit; 6] {
        &self.limits
    }

    pub fn home(&self) -> JointAngles {
        self.home
    }

    /// 正运动学：关节角 → TCP 位姿
    pub fn forward_kinematics(&self, q: &JointAngles) -> CartesianPose {
        isometry_to_pose(&self.forward_isometry(q))
    }

    /// 正运动学的齐次变换形式（内部与求解器使用）
    pub fn forward_isometry(&self, q: &JointAngles) -> Isometry3<f64> {
        let mut t = Isometry3::identity();
        for (row, angle) in self.dh.iter().zip(q.iter()) {
            let theta = (angle + row.theta_offset_deg).to_radians();
            let alpha = row.alpha_deg.to_radians();
            t *= Isometry3::rotation(Vector3::z() * theta)
                * Isometry3::translation(0.0, 0.0, row.d_mm)
                * Isometry3::translation(row.a_mm, 0.0, 0.0)
                * Isometry3::rotation(Vector3::x() * alpha);
        }
        t * self.tcp_offset
    }

    /// 返回越限关节的下标（0-5），空表示全部在限位内
    pub fn limit_violations(&self, q: &JointAngles) -> SmallVec<[usize; 6]> {
        (0..JOINT_COUNT).filter(|&i| !self.limits[i].contains(q[i])).collect()
    }

    /// 逐关节钳位到限位
    pub fn clamp_to_limits(&self, q: &JointAngles) -> JointAngles {
        let mut out = *q;
        for i in 0..JOINT_COUNT {
            out[i] = self.limits[i].clamp(q[i]);
        }
        out
    }

    /// 位形相关的最大伸展（mm）
    ///
    /// J5 接近 ±90° 时腕部结构折叠，有效伸展按接近程度线性缩减，
    /// 缩减带宽为 45°。
    pub fn reach_limit(&self, q: &JointAngles) -> f64 {
        let j5 = crate::types::normalize_angle_deg(q[4]);
        let dist_from_90 = (j5.abs() - 90.0).abs();
        let reduction_band = 45.0;
        if dist_from_90 <= reduction_band {
            let proximity = 1.0 - dist_from_90 / reduction_band;
            self.base_max_reach_mm - self.reach_reduction_mm * proximity
        } else {
            self.base_max_reach_mm
        }
    }
}

/// 位姿（mm/度，XYZ 欧拉角）→ 齐次变换
pub(crate) fn pose_to_isometry(pose: &CartesianPose) -> Isometry3<f64> {
    let rotation = UnitQuaternion::from_euler_angles(
        pose.rx.to_radians(),
        pose.ry.to_radians(),
        pose.rz.to_radians(),
    );
    Isometry3::from_parts(
        nalgebra::Translation3::new(pose.x, pose.y, pose.z),
        rotation,
    )
}

/// 齐次变换 → 位姿（mm/度，XYZ 欧拉角）
pub(crate) fn isometry_to_pose(iso: &Isometry3<f64>) -> CartesianPose {
    let (roll, pitch, yaw) = iso.rotation.euler_angles();
    CartesianPose {
        x: iso.translation.vector.x,
        y: iso.translation.vector.y,
        z: iso.translation.vector.z,
        rx: roll.to_degrees(),
        ry: pitch.to_degrees(),
        rz: yaw.to_degrees(),
    }
}
