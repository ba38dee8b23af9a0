//! Builder - 运行时装配
//!
//! 把模型、求解器、安全监督、上下文、通道和执行器线程按正确的
//! 依赖顺序接起来。调用方只需要提供配置和一条硬件链路。
//!
//! ```no_run
//! use lyra_commander::{CommanderBuilder, CommanderConfig, LoopbackLink};
//! use lyra_kinematics::JointAngles;
//!
//! let (link, _handle) = LoopbackLink::new(JointAngles::ZERO);
//! let runtime = CommanderBuilder::new(CommanderConfig::default())
//!     .with_link(Box::new(link))
//!     .build()
//!     .unwrap();
//! // runtime.commander().handle(...) 发命令
//! // runtime.shutdown() 收尾
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use lyra_kinematics::IkSolver;
use lyra_motion::TICK_SECONDS;
use lyra_proto::{AckMessage, PlanProgressMessage};
use parking_lot::Mutex;
use tracing::info;

use crate::config::CommanderConfig;
use crate::context::CommanderContext;
use crate::error::CommanderError;
use crate::executor::{GripperSlot, MotionMailbox, control_loop};
use crate::ingress::MotionCommander;
use crate::link::HardwareLink;
use crate::monitor::FeedbackMonitor;
use crate::safety::SafetySupervisor;

/// 运行时装配器
pub struct CommanderBuilder {
    config: CommanderConfig,
    link: Option<Box<dyn HardwareLink>>,
}

impl CommanderBuilder {
    pub fn new(config: CommanderConfig) -> Self {
        CommanderBuilder { config, link: None }
    }

    /// 提供硬件链路（必需）
    pub fn with_link(mut self, link: Box<dyn HardwareLink>) -> Self {
        self.link = Some(link);
        self
    }

    /// 装配并启动执行器线程
    pub fn build(self) -> Result<CommanderRuntime, CommanderError> {
        let link = self
            .link
            .ok_or_else(|| CommanderError::Config("hardware link not provided".into()))?;

        self.config.validate()?;
        let model = Arc::new(self.config.build_model()?);
        let solver = IkSolver::new(model.clone(), self.config.solver_config())
            .map_err(|e| CommanderError::Config(e.to_string()))?;

        let safety_params = self.config.safety_params();
        let stale_window =
            Duration::from_secs_f64(TICK_SECONDS * safety_params.stale_feedback_ticks as f64);

        let ctx = Arc::new(CommanderContext::new());
        let safety = Arc::new(SafetySupervisor::new(model.clone(), safety_params));
        let monitor = Arc::new(FeedbackMonitor::new(stale_window));
        let mailbox: MotionMailbox = Arc::new(Mutex::new(None));
        let gripper_slot: GripperSlot = Arc::new(Mutex::new(None));

        let (ack_tx, ack_rx) = unbounded();
        let (progress_tx, progress_rx) = unbounded();

        let commander = MotionCommander::new(
            model.clone(),
            solver,
            ctx.clone(),
            safety.clone(),
            mailbox.clone(),
            gripper_slot.clone(),
            ack_tx.clone(),
            progress_tx,
            self.config.ingress_params(),
        );

        let is_running = Arc::new(AtomicBool::new(true));
        let executor = {
            let ctx = ctx.clone();
            let safety = safety.clone();
            let monitor = monitor.clone();
            let is_running = is_running.clone();
            std::thread::Builder::new()
                .name("lyra-executor".to_string())
                .spawn(move || {
                    control_loop(
                        link,
                        model,
                        ctx,
                        safety,
                        monitor,
                        mailbox,
                        gripper_slot,
                        ack_tx,
                        is_running,
                    )
                })
                .map_err(|e| CommanderError::Config(format!("failed to spawn executor: {e}")))?
        };

        info!("commander runtime assembled");
        Ok(CommanderRuntime {
            commander,
            ctx,
            ack_rx,
            progress_rx,
            is_running,
            executor: Some(executor),
        })
    }
}

/// 已启动的运行时
///
/// 持有执行器线程；`shutdown`（或 Drop）时置停止标志并等待线程
/// 退出。
pub struct CommanderRuntime {
    commander: MotionCommander,
    ctx: Arc<CommanderContext>,
    ack_rx: Receiver<AckMessage>,
    progress_rx: Receiver<PlanProgressMessage>,
    is_running: Arc<AtomicBool>,
    executor: Option<JoinHandle<()>>,
}

impl CommanderRuntime {
    /// 命令入口（可 clone 后分发给网络层）
    pub fn commander(&self) -> &MotionCommander {
        &self.commander
    }

    /// 共享状态上下文（状态反馈、诊断读取用）
    pub fn context(&self) -> &Arc<CommanderContext> {
        &self.ctx
    }

    /// 确认通道接收端
    pub fn ack_receiver(&self) -> Receiver<AckMessage> {
        self.ack_rx.clone()
    }

    /// 规划进度通道接收端
    pub fn progress_receiver(&self) -> Receiver<PlanProgressMessage> {
        self.progress_rx.clone()
    }

    /// 停止执行器并等待线程退出
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Release: 执行器看到 false 时能看到此前的全部写入
        self.is_running.store(false, Ordering::Release);
        if let Some(handle) = self.executor.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CommanderRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
