//! 关节空间规划 - 同步 PTP 插值
//!
//! 每个关节按 `speed_pct`/`accel_pct` 占各自最大速率的百分比生成
//! 梯形速度曲线（行程不足时退化为三角形），全部关节共享最慢轴的
//! 归一化时间曲线，保证同时到达。不涉及 IK，开销为微秒级。

use lyra_kinematics::{ArmModel, JointAngles};
use tracing::debug;

use crate::error::PlanError;
use crate::trajectory::{MotionKind, TICK_SECONDS, Trajectory};

/// 规划一次关节空间运动
///
/// # 参数
///
/// - `current`/`target`: 当前与目标关节角（度）
/// - `speed_pct`/`accel_pct`: 速度/加速度百分比，取值 `(0, 100]`
///
/// # 错误
///
/// - 百分比越界、目标含非有限值、目标越限 → [`PlanError::Validation`]
pub fn plan_joint_move(
    model: &ArmModel,
    current: &JointAngles,
    target: &JointAngles,
    speed_pct: f64,
    accel_pct: f64,
    request_id: u32,
    kind: MotionKind,
) -> Result<Trajectory, PlanError> {
    if !target.is_finite() {
        return Err(PlanError::Validation("target angles must be finite".into()));
    }
    for (name, pct) in [("speed_pct", speed_pct), ("accel_pct", accel_pct)] {
        if !(pct > 0.0 && pct <= 100.0) {
            return Err(PlanError::Validation(format!(
                "{name} must be in (0, 100], got {pct}"
            )));
        }
    }
    let violations = model.limit_violations(target);
    if !violations.is_empty() {
        let joints: Vec<String> = violations.iter().map(|i| format!("J{}", i + 1)).collect();
        return Err(PlanError::Validation(format!(
            "target outside joint limits: {}",
            joints.join(", ")
        )));
    }

    // 逐关节算到达时间，最慢的轴决定整体时长
    let mut slowest: Option<(usize, f64, TrapezoidProfile)> = None;
    for i in 0..6 {
        let distance = (target[i] - current[i]).abs();
        if distance < 1e-9 {
            continue;
        }
        let limit = &model.limits()[i];
        let v_max = limit.max_velocity_dps * speed_pct / 100.0;
        let a_max = limit.max_accel_dps2 * accel_pct / 100.0;
        let profile = TrapezoidProfile::new(distance, v_max, a_max);
        if slowest.as_ref().is_none_or(|(_, t, _)| profile.duration() > *t) {
            slowest = Some((i, profile.duration(), profile));
        }
    }

    // 所有关节都已在目标位置：单点轨迹，仍然走一遍执行器以产生确认
    let Some((limiting_joint, duration, profile)) = slowest else {
        return Ok(Trajectory::new(request_id, kind, vec![*target]));
    };

    debug!(
        limiting_joint = limiting_joint + 1,
        duration_s = duration,
        "joint move planned"
    );

    let ticks = (duration / TICK_SECONDS).ceil() as usize;
    let mut points = Vec::with_capacity(ticks);
    for tick in 1..=ticks {
        let t = (tick as f64 * TICK_SECONDS).min(duration);
        let s = profile.fraction(t);
        let mut q = *current;
        for i in 0..6 {
            q[i] = current[i] + (target[i] - current[i]) * s;
        }
        points.push(q);
    }
    // 数值收尾：末点精确落在目标上
    if let Some(last) = points.last_mut() {
        *last = *target;
    }

    Ok(Trajectory::new(request_id, kind, points))
}

/// 梯形速度曲线（行程不足时为三角形）
///
/// 只描述标量行程 `[0, distance]` 上的运动，方向与多关节缩放由
/// 调用方以归一化进度 `fraction` 处理。
#[derive(Debug, Clone, Copy)]
struct TrapezoidProfile {
    distance: f64,
    accel: f64,
    peak_vel: f64,
    /// 加速段时长
    t_acc: f64,
    /// 匀速段时长（三角形曲线为 0）
    t_flat: f64,
}

impl TrapezoidProfile {
    fn new(distance: f64, v_max: f64, a_max: f64) -> Self {
        let d_ramp = v_max * v_max / a_max; // 加减速两段合计的最短行程
        if distance <= d_ramp {
            // 三角形：达不到 v_max
            let t_acc = (distance / a_max).sqrt();
            TrapezoidProfile {
                distance,
                accel: a_max,
                peak_vel: a_max * t_acc,
                t_acc,
                t_flat: 0.0,
            }
        } else {
            let t_acc = v_max / a_max;
            let t_flat = (distance - d_ramp) / v_max;
            TrapezoidProfile { distance, accel: a_max, peak_vel: v_max, t_acc, t_flat }
        }
    }

    fn duration(&self) -> f64 {
        2.0 * self.t_acc + self.t_flat
    }

    /// t 时刻已完成的行程比例 `[0, 1]`
    fn fraction(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, self.duration());
        let traveled = if t <= self.t_acc {
            0.5 * self.accel * t * t
        } else if t <= self.t_acc + self.t_flat {
            0.5 * self.accel * self.t_acc * self.t_acc + self.peak_vel * (t - self.t_acc)
        } else {
            let t_dec = t - self.t_acc - self.t_flat;
            0.5 * self.accel * self.t_acc * self.t_acc
                + self.peak_vel * self.t_flat
                + self.peak_vel * t_dec
                - 0.5 * self.accel * t_dec * t_dec
        };
        (traveled / self.distance).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyra_kinematics::ArmModel;

    fn model() -> ArmModel {
        ArmModel::lyra6()
    }

    #[test]
    fn test_joint_move_endpoints_and_limits() {
        let model = model();
        let current = model.home();
        let target = JointAngles::new([30.0, -30.0, 90.0, 15.0, 60.0, -45.0]);

        let traj =
            plan_joint_move(&model, &current, &target, 50.0, 50.0, 1, MotionKind::Joint).unwrap();

        assert!(!traj.is_empty());
        assert_eq!(*traj.last().unwrap(), target);
        // 每个设定点都在限位内（本 crate 的硬性质保证）
        for point in traj.points() {
            assert!(model.limit_violations(point).is_empty());
        }
    }

    #[test]
    fn test_joint_move_velocity_stays_under_cap() {
        let model = model();
        let current = JointAngles::ZERO;
        let target = JointAngles::new([90.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let speed_pct = 50.0;

        let traj =
            plan_joint_move(&model, &current, &target, speed_pct, 100.0, 1, MotionKind::Joint)
                .unwrap();

        let v_cap = model.limits()[0].max_velocity_dps * speed_pct / 100.0;
        let mut prev = current;
        for point in traj.points() {
            let step = (point[0] - prev[0]).abs() / TICK_SECONDS;
            assert!(step <= v_cap * 1.05, "velocity {step} exceeds cap {v_cap}");
            prev = *point;
        }
    }

    #[test]
    fn test_joint_move_monotonic_single_axis() {
        let model = model();
        let current = JointAngles::ZERO;
        let target = JointAngles::new([-60.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let traj =
            plan_joint_move(&model, &current, &target, 80.0, 80.0, 1, MotionKind::Joint).unwrap();

        let mut prev = current[0];
        for point in traj.points() {
            assert!(point[0] <= prev + 1e-9, "J1 must move monotonically");
            prev = point[0];
        }
    }

    #[test]
    fn test_joint_move_zero_distance_is_single_point() {
        let model = model();
        let home = model.home();
        let traj =
            plan_joint_move(&model, &home, &home, 50.0, 50.0, 7, MotionKind::Joint).unwrap();
        assert_eq!(traj.len(), 1);
        assert_eq!(*traj.last().unwrap(), home);
    }

    #[test]
    fn test_joint_move_rejects_bad_params() {
        let model = model();
        let home = model.home();
        let target = JointAngles::new([10.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        // 百分比越界
        assert!(matches!(
            plan_joint_move(&model, &home, &target, 0.0, 50.0, 1, MotionKind::Joint),
            Err(PlanError::Validation(_))
        ));
        assert!(matches!(
            plan_joint_move(&model, &home, &target, 50.0, 120.0, 1, MotionKind::Joint),
            Err(PlanError::Validation(_))
        ));

        // 目标越限
        let out_of_limits = JointAngles::new([0.0, 200.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(matches!(
            plan_joint_move(&model, &home, &out_of_limits, 50.0, 50.0, 1, MotionKind::Joint),
            Err(PlanError::Validation(_))
        ));

        // 非有限值
        let nan_target = JointAngles::new([f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(matches!(
            plan_joint_move(&model, &home, &nan_target, 50.0, 50.0, 1, MotionKind::Joint),
            Err(PlanError::Validation(_))
        ));
    }

    #[test]
    fn test_trapezoid_profile_fraction() {
        // 长行程：标准梯形
        let p = TrapezoidProfile::new(90.0, 45.0, 300.0);
        assert!(p.t_flat > 0.0);
        assert_eq!(p.fraction(0.0), 0.0);
        assert!((p.fraction(p.duration()) - 1.0).abs() < 1e-12);

        // 短行程：三角形
        let p = TrapezoidProfile::new(1.0, 45.0, 300.0);
        assert_eq!(p.t_flat, 0.0);
        assert!((p.fraction(p.duration()) - 1.0).abs() < 1e-12);
        // 对称性：半程时间走过半行程
        assert!((p.fraction(p.t_acc) - 0.5).abs() < 1e-9);
    }
}
