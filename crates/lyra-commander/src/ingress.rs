//! 命令接收 - 校验、规划分派与确认发射
//!
//! [`MotionCommander`] 是命令的唯一入口：网络层解出 `CommandMessage`
//! 后直接调 [`handle`](MotionCommander::handle)，进程内调用方也走同
//! 一条路。关键约束：
//!
//! - **从不阻塞执行器**。关节规划是微秒级同步操作；笛卡尔规划起
//!   独立工人线程；确认通过无界通道发射，发送端永不等待。
//! - **校验前置**。参数错误在入队前拒绝（`REJECTED` 确认），不碰
//!   任何执行状态。
//! - **最新请求总是赢**。每个新运动请求都会使在途的批量规划作废
//!   （代际计数器），并顶掉邮箱里未开始的轨迹，被顶掉的请求收到
//!   `superseded` 终态确认，保证每个 request_id 恰好一条终态。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::Sender;
use lyra_kinematics::{ArmModel, AxisMask, CartesianPose, IkSolver, JointAngles};
use lyra_motion::{MotionKind, PlanError, Trajectory, plan_cartesian_move, plan_joint_move};
use lyra_proto::{AckMessage, CommandMessage, PlanProgressMessage};
use tracing::{debug, info, warn};

use crate::context::CommanderContext;
use crate::error::CommanderError;
use crate::executor::{GripperSlot, MotionMailbox, PendingMotion};
use crate::link::GripperSetpoint;
use crate::safety::{EstopSource, SafetySupervisor};

/// 命令接收参数
#[derive(Debug, Clone)]
pub struct IngressParams {
    /// HOME 命令的速度百分比
    pub home_speed_pct: f64,
    /// HOME 命令的加速度百分比
    pub home_accel_pct: f64,
    /// 是否在轨迹开始执行时发 STARTED 确认
    pub ack_started: bool,
}

impl Default for IngressParams {
    fn default() -> Self {
        IngressParams { home_speed_pct: 30.0, home_accel_pct: 30.0, ack_started: true }
    }
}

/// 运动命令入口
///
/// `Clone` 共享同一套底层状态，可以同时交给网络层和进程内调用方。
#[derive(Clone)]
pub struct MotionCommander {
    model: Arc<ArmModel>,
    solver: IkSolver,
    ctx: Arc<CommanderContext>,
    safety: Arc<SafetySupervisor>,
    mailbox: MotionMailbox,
    gripper_slot: GripperSlot,
    ack_tx: Sender<AckMessage>,
    progress_tx: Sender<PlanProgressMessage>,
    /// 规划代际：每个新运动请求 +1，在途工人结果按代际判废
    generation: Arc<AtomicU64>,
    params: IngressParams,
}

impl MotionCommander {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        model: Arc<ArmModel>,
        solver: IkSolver,
        ctx: Arc<CommanderContext>,
        safety: Arc<SafetySupervisor>,
        mailbox: MotionMailbox,
        gripper_slot: GripperSlot,
        ack_tx: Sender<AckMessage>,
        progress_tx: Sender<PlanProgressMessage>,
        params: IngressParams,
    ) -> Self {
        MotionCommander {
            model,
            solver,
            ctx,
            safety,
            mailbox,
            gripper_slot,
            ack_tx,
            progress_tx,
            generation: Arc::new(AtomicU64::new(0)),
            params,
        }
    }

    /// 处理一条命令
    ///
    /// 总是立即返回；结果通过确认通道异步送达。
    pub fn handle(&self, msg: CommandMessage) {
        match msg {
            CommandMessage::MoveJoints {
                request_id, angles, speed_pct, accel_pct, ..
            } => self.move_joints(
                request_id,
                JointAngles::new(angles),
                speed_pct,
                accel_pct,
                MotionKind::Joint,
            ),
            CommandMessage::MoveCartesian { request_id, pose, duration_s, .. } => {
                self.move_cartesian(request_id, CartesianPose::from_vector(pose), duration_s)
            },
            CommandMessage::Estop { request_id } => self.estop(request_id),
            CommandMessage::ClearError { request_id } => self.clear_error(request_id),
            CommandMessage::Home { request_id, .. } => self.move_joints(
                request_id,
                self.model.home(),
                self.params.home_speed_pct,
                self.params.home_accel_pct,
                MotionKind::Home,
            ),
            CommandMessage::Gripper { request_id, position, speed, current } => {
                self.gripper(request_id, GripperSetpoint { position, speed, current })
            },
            // 订阅是网络层的事，进程内入口不处理
            CommandMessage::Subscribe { .. } => {},
        }
    }

    fn move_joints(
        &self,
        request_id: u32,
        target: JointAngles,
        speed_pct: f64,
        accel_pct: f64,
        kind: MotionKind,
    ) {
        let result = self.plan_joint(request_id, target, speed_pct, accel_pct, kind);
        match result {
            Ok(trajectory) => self.install_new(trajectory),
            Err(e) => self.reject(request_id, &e),
        }
    }

    fn plan_joint(
        &self,
        request_id: u32,
        target: JointAngles,
        speed_pct: f64,
        accel_pct: f64,
        kind: MotionKind,
    ) -> Result<Trajectory, CommanderError> {
        if let Some(fault) = self.safety.latched_fault() {
            return Err(CommanderError::Safety(fault));
        }
        let current = self.ctx.state().joints;
        let trajectory =
            plan_joint_move(&self.model, &current, &target, speed_pct, accel_pct, request_id, kind)?;
        Ok(trajectory)
    }

    fn move_cartesian(&self, request_id: u32, target: CartesianPose, duration_s: f64) {
        if let Some(fault) = self.safety.latched_fault() {
            return self.reject(request_id, &CommanderError::Safety(fault));
        }

        // 新请求作废所有在途规划
        let my_generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let current = self.ctx.state().joints;

        let worker = CartesianWorker {
            solver: self.solver.clone(),
            commander: self.clone(),
            request_id,
            target,
            duration_s,
            seed: current,
            generation: my_generation,
        };

        // 批量 IK 绝不在调用方线程上跑，更不在执行器线程上
        let spawned = thread::Builder::new()
            .name(format!("lyra-planner-{request_id}"))
            .spawn(move || worker.run());
        if let Err(e) = spawned {
            self.reject(
                request_id,
                &CommanderError::Validation(format!("failed to spawn planning worker: {e}")),
            );
        }
    }

    fn estop(&self, request_id: u32) {
        self.safety.assert_estop(EstopSource::Manual);
        // 作废在途规划，清掉未开始的轨迹
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(pending) = self.mailbox.lock().take() {
            let _ = self.ack_tx.send(AckMessage::rejected(
                pending.trajectory.request_id(),
                "discarded by emergency stop",
            ));
        }
        info!(request_id, "E-stop command processed");
        let _ = self.ack_tx.send(AckMessage::completed(request_id));
    }

    fn clear_error(&self, request_id: u32) {
        let io = self.ctx.state().io_inputs;
        match self.safety.try_clear(&io) {
            Ok(()) => {
                info!(request_id, "error cleared");
                let _ = self.ack_tx.send(AckMessage::completed(request_id));
            },
            Err(fault) => {
                let _ = self
                    .ack_tx
                    .send(AckMessage::rejected(request_id, fault.to_string()));
            },
        }
    }

    fn gripper(&self, request_id: u32, setpoint: GripperSetpoint) {
        if let Some(fault) = self.safety.latched_fault() {
            return self.reject(request_id, &CommanderError::Safety(fault));
        }
        *self.gripper_slot.lock() = Some(setpoint);
        self.ctx.metrics.commands_accepted.fetch_add(1, Ordering::Relaxed);
        debug!(request_id, ?setpoint, "gripper setpoint latched");
        let _ = self.ack_tx.send(AckMessage::completed(request_id));
    }

    /// 装入新请求产出的轨迹（顶掉一切在途规划与未启动轨迹）
    fn install_new(&self, trajectory: Trajectory) {
        let mut slot = self.mailbox.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.ctx.metrics.commands_accepted.fetch_add(1, Ordering::Relaxed);
        debug!(
            request_id = trajectory.request_id(),
            ticks = trajectory.len(),
            "trajectory handed to executor"
        );
        self.replace_slot(&mut slot, trajectory);
    }

    /// 工人线程装入规划结果：只有代际仍是最新时才生效
    fn install_planned(&self, trajectory: Trajectory, generation: u64) {
        let mut slot = self.mailbox.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            self.ctx.metrics.superseded.fetch_add(1, Ordering::Relaxed);
            debug!(
                request_id = trajectory.request_id(),
                "planned trajectory discarded: superseded during planning"
            );
            let _ = self.ack_tx.send(AckMessage::rejected(
                trajectory.request_id(),
                "superseded during planning",
            ));
            return;
        }
        self.ctx.metrics.commands_accepted.fetch_add(1, Ordering::Relaxed);
        self.replace_slot(&mut slot, trajectory);
    }

    fn replace_slot(
        &self,
        slot: &mut Option<PendingMotion>,
        trajectory: Trajectory,
    ) {
        let pending = PendingMotion { trajectory, notify_started: self.params.ack_started };
        if let Some(old) = slot.replace(pending) {
            self.ctx.metrics.superseded.fetch_add(1, Ordering::Relaxed);
            let _ = self.ack_tx.send(AckMessage::rejected(
                old.trajectory.request_id(),
                "superseded before start",
            ));
        }
    }

    fn reject(&self, request_id: u32, err: &CommanderError) {
        self.ctx.metrics.commands_rejected.fetch_add(1, Ordering::Relaxed);
        warn!(request_id, error = %err, "command rejected");
        let _ = self.ack_tx.send(AckMessage::rejected(request_id, err.to_string()));
    }
}

/// 笛卡尔规划工人（每请求一个线程）
struct CartesianWorker {
    solver: IkSolver,
    commander: MotionCommander,
    request_id: u32,
    target: CartesianPose,
    duration_s: f64,
    seed: JointAngles,
    generation: u64,
}

impl CartesianWorker {
    fn run(self) {
        let progress_tx = self.commander.progress_tx.clone();
        let request_id = self.request_id;

        let result = plan_cartesian_move(
            &self.solver,
            &self.seed,
            &self.target,
            self.duration_s,
            AxisMask::FULL_POSE,
            request_id,
            |p| {
                let _ = progress_tx.send(PlanProgressMessage {
                    request_id,
                    current: p.current,
                    total: p.total,
                    recoveries: p.recoveries,
                });
            },
        );

        match result {
            Ok((trajectory, report)) => {
                info!(
                    request_id,
                    waypoints = report.waypoints,
                    recoveries = report.recoveries,
                    iterations = report.total_iterations,
                    "cartesian plan ready"
                );
                self.commander.install_planned(trajectory, self.generation);
            },
            Err(e @ PlanError::Validation(_)) => {
                self.commander.reject(request_id, &CommanderError::Plan(e));
            },
            Err(e @ PlanError::IkFailure { .. }) => {
                // IK 失败：不安装任何轨迹，执行器上的旧轨迹不受影响
                self.commander.reject(request_id, &CommanderError::Plan(e));
            },
        }
    }
}
