//! 轨迹执行器 - 100Hz 定拍回路
//!
//! 整个进程里唯一的硬实时路径。每拍的工作是固定的：读反馈 →
//! 安全检查 → 取邮箱 → 校验并下发下一个设定点 → 发布状态快照 →
//! 睡到下一拍。这条路径上**永远不做 IK**，也不等待任何锁之外的
//! 资源；预算超限时先保证设定点发出去，可跳过的只有快照里的
//! 正运动学细化。
//!
//! # 状态机
//!
//! `Idle` → (装入轨迹) → `Executing` → (走完) → `Idle`；
//! 任意状态 → (安全故障/急停) → `Faulted`，同一拍内停写；
//! `Faulted` → (清错且物理急停已松开) → `Idle`。
//!
//! # 轨迹移交
//!
//! 单格邮箱（`Mutex<Option<PendingMotion>>`），最新请求总是赢。
//! 执行器每拍 `take()` 一次；命令侧 `replace()` 时被顶掉的未启动
//! 轨迹由命令侧补发终态确认，在途轨迹则由执行器在取件时补发。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use lyra_kinematics::ArmModel;
use lyra_motion::{TICK_RATE_HZ, TICK_SECONDS, Trajectory};
use lyra_proto::AckMessage;
use parking_lot::Mutex;
use spin_sleep::SpinSleeper;
use tracing::{debug, error, info, warn};

use crate::context::{CommanderContext, RobotState, system_timestamp_us};
use crate::link::{GripperSetpoint, HardwareLink, LinkFeedback};
use crate::metrics::HzEstimator;
use crate::monitor::FeedbackMonitor;
use crate::safety::{SafetyFault, SafetySupervisor};

/// 待执行运动（邮箱载荷）
#[derive(Debug)]
pub struct PendingMotion {
    pub trajectory: Trajectory,
    /// 是否在开始执行时发 STARTED 确认
    pub notify_started: bool,
}

/// 轨迹移交邮箱：单格，最新请求总是赢
pub type MotionMailbox = Arc<Mutex<Option<PendingMotion>>>;

/// 夹爪设定点插槽（直通命令 → 执行器）
pub type GripperSlot = Arc<Mutex<Option<GripperSetpoint>>>;

/// 执行器状态机
enum ExecState {
    Idle,
    Executing { trajectory: Trajectory, tick: usize },
    Faulted,
}

/// 执行器回路主函数（阻塞，在专用线程上运行）
///
/// 退出条件：`is_running` 置 false。安全故障不会退出回路，执行器
/// 停在 `Faulted` 态等清错，进程继续活着。
#[allow(clippy::too_many_arguments)]
pub fn control_loop(
    mut link: Box<dyn HardwareLink>,
    model: Arc<ArmModel>,
    ctx: Arc<CommanderContext>,
    safety: Arc<SafetySupervisor>,
    monitor: Arc<FeedbackMonitor>,
    mailbox: MotionMailbox,
    gripper_slot: GripperSlot,
    ack_tx: Sender<AckMessage>,
    is_running: Arc<AtomicBool>,
) {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::{ThreadPriority, set_current_thread_priority};
        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => info!("executor thread priority set to MAX (realtime)"),
            Err(e) => warn!(
                "failed to set executor thread priority: {e:?}. \
                 On Linux this needs CAP_SYS_NICE or rtkit."
            ),
        }
    }

    let period = Duration::from_secs_f64(TICK_SECONDS);
    // 软预算：超过它就跳过本拍的快照细化（FK），设定点照常发
    let soft_budget = period.mul_f64(0.8);
    let retry_limit = safety.params().comm_retry_limit;
    let sleeper = SpinSleeper::default();

    let mut state = ExecState::Idle;
    let mut hz = HzEstimator::new(TICK_RATE_HZ, 0.05);
    let mut consecutive_comm_failures: u32 = 0;
    let mut last_feedback: Option<LinkFeedback> = None;
    let mut last_tick = Instant::now();
    let mut next_deadline = Instant::now() + period;

    info!("executor loop started ({}Hz)", TICK_RATE_HZ);

    loop {
        // Acquire: 看到 false 时必须同时看到其他线程的收尾写入
        if !is_running.load(Ordering::Acquire) {
            break;
        }

        let tick_start = Instant::now();
        let measured_hz = hz.update((tick_start - last_tick).as_secs_f64());
        last_tick = tick_start;
        ctx.metrics.store_loop_hz(measured_hz);

        // ============================================================
        // 1. 读硬件反馈（非阻塞；None 表示本拍无新数据）
        // ============================================================
        match link.read_feedback() {
            Ok(Some(feedback)) => {
                monitor.register_feedback();
                safety.observe_io(&feedback.io_inputs);
                last_feedback = Some(feedback);
                consecutive_comm_failures = 0;
            },
            Ok(None) => {},
            Err(e) => {
                ctx.metrics.comm_errors.fetch_add(1, Ordering::Relaxed);
                consecutive_comm_failures += 1;
                warn!(error = %e, consecutive = consecutive_comm_failures, "link read failed");
            },
        }

        // 反馈失鲜按通信失败累计；瞬时抖动靠重试窗口吸收
        if !monitor.is_fresh() {
            consecutive_comm_failures += 1;
        }
        if consecutive_comm_failures > retry_limit && !safety.fault_active() {
            safety.latch_comm_fault(
                consecutive_comm_failures,
                format!("no link feedback for {:?}", monitor.time_since_last()),
            );
        }

        // ============================================================
        // 2. 故障闩锁：同一拍内停写，丢弃在途与待装轨迹
        // ============================================================
        if safety.fault_active() {
            if !matches!(state, ExecState::Faulted) {
                let fault = safety
                    .latched_fault()
                    .unwrap_or(SafetyFault::EstopActive {
                        source: crate::safety::EstopSource::Manual,
                    });
                if let ExecState::Executing { trajectory, tick } = &state {
                    warn!(
                        request_id = trajectory.request_id(),
                        tick, "in-flight trajectory aborted by safety fault"
                    );
                    let _ = ack_tx.send(AckMessage::rejected(
                        trajectory.request_id(),
                        format!("aborted: {fault}"),
                    ));
                }
                if let Some(pending) = mailbox.lock().take() {
                    let _ = ack_tx.send(AckMessage::rejected(
                        pending.trajectory.request_id(),
                        format!("discarded: {fault}"),
                    ));
                }
                info!(%fault, "executor entering Faulted state");
                state = ExecState::Faulted;
            }
        } else if matches!(state, ExecState::Faulted) {
            info!("safety fault cleared, executor back to Idle");
            consecutive_comm_failures = 0;
            state = ExecState::Idle;
        }

        // ============================================================
        // 3. 邮箱：装入新轨迹（最新请求总是赢）
        // ============================================================
        if !matches!(state, ExecState::Faulted)
            && let Some(pending) = mailbox.lock().take()
        {
            if let ExecState::Executing { trajectory, tick } = &state {
                ctx.metrics.superseded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    old_request = trajectory.request_id(),
                    at_tick = tick,
                    new_request = pending.trajectory.request_id(),
                    "in-flight trajectory superseded"
                );
                let _ = ack_tx.send(AckMessage::rejected(
                    trajectory.request_id(),
                    "superseded by a newer request",
                ));
            }
            if pending.notify_started {
                let _ = ack_tx.send(AckMessage::started(pending.trajectory.request_id()));
            }
            debug!(
                request_id = pending.trajectory.request_id(),
                ticks = pending.trajectory.len(),
                "trajectory installed"
            );
            state = ExecState::Executing { trajectory: pending.trajectory, tick: 0 };
        }

        // ============================================================
        // 4. 夹爪直通（与轨迹无关，故障态除外）
        // ============================================================
        if !matches!(state, ExecState::Faulted)
            && let Some(g) = gripper_slot.lock().take()
            && let Err(e) = link.write_gripper(&g)
        {
            warn!(error = %e, "gripper write failed");
        }

        // ============================================================
        // 5. 执行一拍
        // ============================================================
        state = match state {
            ExecState::Executing { trajectory, tick } => {
                match trajectory.point(tick) {
                    Some(setpoint) => match safety.validate_setpoint(setpoint) {
                        Ok(()) => {
                            match link.write_setpoints(setpoint) {
                                Ok(()) => {
                                    ctx.metrics
                                        .setpoints_written
                                        .fetch_add(1, Ordering::Relaxed);
                                    ExecState::Executing { trajectory, tick: tick + 1 }
                                },
                                Err(e) => {
                                    // 本拍不推进，下一拍重试；连续失败由
                                    // 重试计数器升级为安全故障
                                    ctx.metrics.comm_errors.fetch_add(1, Ordering::Relaxed);
                                    consecutive_comm_failures += 1;
                                    warn!(error = %e, tick, "setpoint write failed");
                                    ExecState::Executing { trajectory, tick }
                                },
                            }
                        },
                        Err(fault) => {
                            // 越限设定点 = 规划器 bug，拒绝并停机
                            error!(%fault, tick, "setpoint rejected by safety supervisor");
                            let _ = ack_tx.send(AckMessage::rejected(
                                trajectory.request_id(),
                                fault.to_string(),
                            ));
                            safety.latch_fault(fault);
                            ExecState::Faulted
                        },
                    },
                    None => {
                        info!(request_id = trajectory.request_id(), "trajectory completed");
                        let _ = ack_tx.send(AckMessage::completed(trajectory.request_id()));
                        ExecState::Idle
                    },
                }
            },
            other => other,
        };

        // ============================================================
        // 6. 发布状态快照
        // ============================================================
        let previous = ctx.robot_state.load();
        let joints = last_feedback.as_ref().map(|f| f.joints).unwrap_or(previous.joints);
        // 预算吃紧时跳过 FK 细化，沿用上一拍的位姿
        let pose = if tick_start.elapsed() < soft_budget {
            model.forward_kinematics(&joints)
        } else {
            previous.pose
        };
        ctx.robot_state.store(Arc::new(RobotState {
            joints,
            pose,
            io_inputs: last_feedback.as_ref().map(|f| f.io_inputs).unwrap_or(previous.io_inputs),
            gripper: last_feedback.as_ref().map(|f| f.gripper).unwrap_or(previous.gripper),
            is_stopped: !matches!(state, ExecState::Executing { .. }),
            estop_active: safety.estop_active(),
            link_connected: monitor.is_fresh(),
            loop_hz: measured_hz,
            system_timestamp_us: system_timestamp_us(),
        }));

        // ============================================================
        // 7. 节拍收尾
        // ============================================================
        ctx.metrics.ticks_total.fetch_add(1, Ordering::Relaxed);
        if tick_start.elapsed() > period {
            ctx.metrics.ticks_over_budget.fetch_add(1, Ordering::Relaxed);
        }

        next_deadline += period;
        let now = Instant::now();
        if next_deadline > now {
            sleeper.sleep(next_deadline - now);
        } else {
            // 已经落后整拍：对齐到当前时刻，不补拍
            next_deadline = now + period;
        }
    }

    info!("executor loop exited");
}
