//! 笛卡尔空间规划 - 路点生成 + 批量 IK
//!
//! 规划分两步：先在当前位姿与目标位姿之间生成 `floor(duration/0.01)`
//! 个中间路点（位置线性插值，姿态逐分量短弧插值），再顺序批量求解
//! 每个路点的 IK。每次求解以上一路点的收敛解为种子，保证关节空间
//! 连续性。
//!
//! 批量求解发生在实时路径之外：调用方（命令接收层）把它放到独立
//! 工作线程，通过进度回调上报 `{current, total, recoveries}`。
//! 任何一个路点用尽细分与种子扫描仍失败，整个规划失败，不产出
//! 部分轨迹。

use lyra_kinematics::solver::{IkOutcome, IkSolver};
use lyra_kinematics::{AxisMask, CartesianPose, JointAngles};
use tracing::{debug, warn};

use crate::error::PlanError;
use crate::trajectory::{MotionKind, TICK_SECONDS, Trajectory};

/// 规划进度（喂给进度回调，由上层转发到进度反馈通道）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanProgress {
    /// 已求解的路点数
    pub current: usize,
    /// 总路点数
    pub total: usize,
    /// 累计种子扫描恢复次数
    pub recoveries: u32,
}

/// 规划结果报告
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanningReport {
    /// 求解的路点数
    pub waypoints: usize,
    /// 种子扫描恢复总次数
    pub recoveries: u32,
    /// 所有路点的 IK 迭代总数
    pub total_iterations: u64,
}

/// 规划一次笛卡尔空间运动
///
/// # 错误
///
/// - `duration_s <= 0.01`（产生不了任何路点）或目标含非有限值 →
///   [`PlanError::Validation`]
/// - 任一路点不收敛 → [`PlanError::IkFailure`]，已解出的部分全部丢弃
pub fn plan_cartesian_move(
    solver: &IkSolver,
    current: &JointAngles,
    target_pose: &CartesianPose,
    duration_s: f64,
    mask: AxisMask,
    request_id: u32,
    mut on_progress: impl FnMut(PlanProgress),
) -> Result<(Trajectory, PlanningReport), PlanError> {
    if !target_pose.is_finite() {
        return Err(PlanError::Validation("target pose must be finite".into()));
    }
    if !duration_s.is_finite() || duration_s <= TICK_SECONDS {
        return Err(PlanError::Validation(format!(
            "duration_s must exceed one tick ({TICK_SECONDS}s), got {duration_s}"
        )));
    }

    let total = (duration_s / TICK_SECONDS).floor() as usize;
    let current_pose = solver.model().forward_kinematics(current);

    debug!(
        request_id,
        waypoints = total,
        target = %target_pose,
        "cartesian plan started"
    );

    let mut points = Vec::with_capacity(total);
    let mut seed = *current;
    let mut recoveries = 0u32;
    let mut total_iterations = 0u64;

    for index in 1..=total {
        let fraction = index as f64 / total as f64;
        let waypoint = current_pose.interp_toward(target_pose, fraction);

        let (outcome, recovered) = solver.solve_recovering(&waypoint, &seed, mask);
        total_iterations += outcome.iterations() as u64;
        recoveries += recovered;

        match outcome {
            IkOutcome::Converged { angles, .. } => {
                seed = angles;
                points.push(angles);
            },
            IkOutcome::Failed { reason, .. } => {
                warn!(
                    request_id,
                    waypoint = index,
                    total,
                    %reason,
                    "cartesian plan aborted: waypoint did not converge"
                );
                return Err(PlanError::IkFailure { waypoint: index, total, reason });
            },
        }

        on_progress(PlanProgress { current: index, total, recoveries });
    }

    let report = PlanningReport { waypoints: total, recoveries, total_iterations };
    debug!(request_id, ?report, "cartesian plan finished");
    Ok((
        Trajectory::new(request_id, MotionKind::Cartesian, points),
        report,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyra_kinematics::solver::SolverConfig;
    use lyra_kinematics::{ArmModel, JointAngles};
    use std::sync::Arc;

    fn solver() -> IkSolver {
        IkSolver::new(Arc::new(ArmModel::lyra6()), SolverConfig::default()).unwrap()
    }

    /// 从 home 附近构造一个必然可达的小位移目标
    fn nearby_target(solver: &IkSolver) -> (JointAngles, CartesianPose) {
        let start = solver.model().home();
        let mut goal_q = start;
        goal_q[0] += 5.0;
        goal_q[1] += 4.0;
        goal_q[4] += 5.0;
        (start, solver.model().forward_kinematics(&goal_q))
    }

    #[test]
    fn test_waypoint_count_from_duration() {
        let solver = solver();
        let (start, target) = nearby_target(&solver);

        for (duration, expected) in [(1.0, 100), (2.5, 250), (0.5, 50)] {
            let (traj, report) = plan_cartesian_move(
                &solver,
                &start,
                &target,
                duration,
                AxisMask::FULL_POSE,
                1,
                |_| {},
            )
            .unwrap();
            assert_eq!(traj.len(), expected, "duration {duration}s");
            assert_eq!(report.waypoints, expected);
        }
    }

    #[test]
    fn test_too_short_duration_rejected() {
        let solver = solver();
        let (start, target) = nearby_target(&solver);

        for duration in [0.01, 0.0, -1.0, f64::NAN] {
            let result = plan_cartesian_move(
                &solver,
                &start,
                &target,
                duration,
                AxisMask::FULL_POSE,
                1,
                |_| {},
            );
            assert!(
                matches!(result, Err(PlanError::Validation(_))),
                "duration {duration} must be rejected"
            );
        }
    }

    #[test]
    fn test_progress_reported_incrementally() {
        let solver = solver();
        let (start, target) = nearby_target(&solver);

        let mut seen = Vec::new();
        plan_cartesian_move(&solver, &start, &target, 0.5, AxisMask::FULL_POSE, 1, |p| {
            seen.push(p)
        })
        .unwrap();

        assert_eq!(seen.len(), 50);
        assert_eq!(seen.first().unwrap().current, 1);
        assert_eq!(seen.last().unwrap().current, 50);
        assert!(seen.iter().all(|p| p.total == 50));
        // current 单调递增
        assert!(seen.windows(2).all(|w| w[1].current == w[0].current + 1));
    }

    #[test]
    fn test_final_waypoint_reaches_target() {
        let solver = solver();
        let (start, target) = nearby_target(&solver);

        let (traj, _) =
            plan_cartesian_move(&solver, &start, &target, 1.0, AxisMask::FULL_POSE, 1, |_| {})
                .unwrap();

        let reached = solver.model().forward_kinematics(traj.last().unwrap());
        assert!(reached.position_distance(&target) < 1.0);
    }

    #[test]
    fn test_unreachable_target_fails_whole_plan() {
        let solver = solver();
        let start = solver.model().home();
        // 远超 440mm 臂展
        let target = CartesianPose::new(900.0, 0.0, 100.0, 0.0, 0.0, 0.0);

        let result =
            plan_cartesian_move(&solver, &start, &target, 1.0, AxisMask::FULL_POSE, 1, |_| {});
        assert!(matches!(result, Err(PlanError::IkFailure { .. })));
    }

    #[test]
    fn test_joint_space_continuity() {
        // 相邻路点的关节角不允许跳变（种子链式传递的意义所在）
        let solver = solver();
        let (start, target) = nearby_target(&solver);

        let (traj, _) =
            plan_cartesian_move(&solver, &start, &target, 1.0, AxisMask::FULL_POSE, 1, |_| {})
                .unwrap();

        let mut prev = start;
        for point in traj.points() {
            assert!(
                point.max_abs_diff(&prev) < 5.0,
                "joint jump between consecutive waypoints"
            );
            prev = *point;
        }
    }
}
