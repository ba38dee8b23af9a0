//! 守护进程主体 - UDP 命令/确认/状态服务
//!
//! 端口布局（均可配置）：
//!
//! - **命令端口**: 接收命令数据报，fire-and-forget；发送方的 IP +
//!   配置的确认端口构成确认回传地址
//! - **确认端口**: 指挥进程 → 发送方，每个 request_id 一条终态
//! - **状态端口**: 接收 `SUBSCRIBE` 注册，按话题频率推送快照；
//!   规划进度事件也从这里推送
//!
//! 硬件链路：本进程内置回环仿真链路；真实串口驱动是外部 crate，
//! 通过 `HardwareLink` trait 接入后以同样方式装配。

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use lyra_commander::{CommanderBuilder, CommanderConfig, LoopbackLink, RobotState};
use lyra_kinematics::JointAngles;
use lyra_proto::{CommandMessage, StatusMessage, StatusTopic};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::subscribers::SubscriberRegistry;

/// socket 读超时：决定各线程对 shutdown 标志的响应延迟
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// 状态发布线程的基础节拍
const PUBLISH_TICK: Duration = Duration::from_millis(10);

/// 订阅清理周期
const PRUNE_INTERVAL: Duration = Duration::from_secs(5);

type PendingAcks = Arc<Mutex<HashMap<u32, SocketAddr>>>;

pub fn run(config: CommanderConfig, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    // 回环链路：写入的设定点即时回读，相当于完美跟踪的仿真臂
    let (link, _link_handle) = LoopbackLink::new(JointAngles::ZERO);
    info!("hardware link: loopback simulation (external serial drivers attach via the HardwareLink trait)");

    let runtime = CommanderBuilder::new(config.clone())
        .with_link(Box::new(link))
        .build()?;

    let command_socket = UdpSocket::bind(&config.network.command_bind)
        .with_context(|| format!("binding command socket {}", config.network.command_bind))?;
    command_socket
        .set_read_timeout(Some(READ_TIMEOUT))
        .context("setting command socket timeout")?;

    let status_socket = UdpSocket::bind(&config.network.status_bind)
        .with_context(|| format!("binding status socket {}", config.network.status_bind))?;
    status_socket
        .set_read_timeout(Some(READ_TIMEOUT))
        .context("setting status socket timeout")?;

    let ack_socket = UdpSocket::bind("0.0.0.0:0").context("binding ack socket")?;

    info!(
        command = %config.network.command_bind,
        status = %config.network.status_bind,
        ack_port = config.network.ack_port,
        "commander daemon listening"
    );

    let registry = Arc::new(SubscriberRegistry::new());
    let pending_acks: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
    let mut workers = Vec::new();

    // ============================================================
    // 确认转发线程
    // ============================================================
    {
        let ack_rx = runtime.ack_receiver();
        let pending_acks = pending_acks.clone();
        let shutdown = shutdown.clone();
        let ack_socket = ack_socket.try_clone().context("cloning ack socket")?;
        workers.push(
            thread::Builder::new()
                .name("ack-forwarder".into())
                .spawn(move || {
                    while !shutdown.load(Ordering::Acquire) {
                        let ack = match ack_rx.recv_timeout(READ_TIMEOUT) {
                            Ok(ack) => ack,
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        };
                        let addr = {
                            let mut pending = pending_acks.lock();
                            let addr = pending.get(&ack.request_id).copied();
                            if ack.is_terminal() {
                                pending.remove(&ack.request_id);
                            }
                            addr
                        };
                        let Some(addr) = addr else {
                            // 进程内请求或来路不明的 id，没有回传地址
                            debug!(request_id = ack.request_id, "ack without return address");
                            continue;
                        };
                        match ack.to_vec() {
                            Ok(bytes) => {
                                if let Err(e) = ack_socket.send_to(&bytes, addr) {
                                    warn!(%addr, error = %e, "ack send failed");
                                }
                            },
                            Err(e) => warn!(error = %e, "ack serialization failed"),
                        }
                    }
                })
                .context("spawning ack forwarder")?,
        );
    }

    // ============================================================
    // 规划进度转发线程
    // ============================================================
    {
        let progress_rx = runtime.progress_receiver();
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        let socket = status_socket.try_clone().context("cloning status socket")?;
        workers.push(
            thread::Builder::new()
                .name("progress-forwarder".into())
                .spawn(move || {
                    while !shutdown.load(Ordering::Acquire) {
                        let progress = match progress_rx.recv_timeout(READ_TIMEOUT) {
                            Ok(p) => p,
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        };
                        let Ok(bytes) = progress.to_vec() else { continue };
                        for addr in registry.addresses_for(StatusTopic::Progress) {
                            if let Err(e) = socket.send_to(&bytes, addr) {
                                warn!(%addr, error = %e, "progress send failed");
                            }
                        }
                    }
                })
                .context("spawning progress forwarder")?,
        );
    }

    // ============================================================
    // 状态订阅接收线程
    // ============================================================
    {
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        let socket = status_socket.try_clone().context("cloning status socket")?;
        workers.push(
            thread::Builder::new()
                .name("subscribe-listener".into())
                .spawn(move || {
                    let mut buf = [0u8; 2048];
                    while !shutdown.load(Ordering::Acquire) {
                        let (len, from) = match socket.recv_from(&mut buf) {
                            Ok(r) => r,
                            Err(e)
                                if e.kind() == ErrorKind::WouldBlock
                                    || e.kind() == ErrorKind::TimedOut =>
                            {
                                continue;
                            },
                            Err(e) => {
                                warn!(error = %e, "status socket receive failed");
                                continue;
                            },
                        };
                        match CommandMessage::from_slice(&buf[..len]) {
                            Ok(CommandMessage::Subscribe { topics }) => {
                                registry.subscribe(from, topics);
                            },
                            Ok(other) => {
                                debug!(?other, %from, "non-subscribe message on status port ignored");
                            },
                            Err(e) => {
                                warn!(%from, error = %e, "malformed datagram on status port");
                            },
                        }
                    }
                })
                .context("spawning subscribe listener")?,
        );
    }

    // ============================================================
    // 状态发布线程（按话题频率分频）
    // ============================================================
    {
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        let ctx = runtime.context().clone();
        let socket = status_socket.try_clone().context("cloning status socket")?;
        let rates = topic_rates(&config);
        workers.push(
            thread::Builder::new()
                .name("status-publisher".into())
                .spawn(move || {
                    let mut last_published: HashMap<StatusTopic, Instant> = HashMap::new();
                    let mut last_prune = Instant::now();
                    while !shutdown.load(Ordering::Acquire) {
                        thread::sleep(PUBLISH_TICK);

                        if last_prune.elapsed() > PRUNE_INTERVAL {
                            registry.prune();
                            last_prune = Instant::now();
                        }
                        if registry.is_empty() {
                            continue;
                        }

                        let state = ctx.state();
                        let now = Instant::now();
                        for (topic, rate_hz) in &rates {
                            if *rate_hz <= 0.0 {
                                continue;
                            }
                            let interval = Duration::from_secs_f64(1.0 / rate_hz);
                            let due = last_published
                                .get(topic)
                                .is_none_or(|t| now.duration_since(*t) >= interval);
                            if !due {
                                continue;
                            }
                            let Some(message) = status_message(*topic, &state) else {
                                continue;
                            };
                            let Ok(bytes) = message.to_vec() else { continue };
                            for addr in registry.addresses_for(*topic) {
                                if let Err(e) = socket.send_to(&bytes, addr) {
                                    warn!(%addr, error = %e, "status send failed");
                                }
                            }
                            last_published.insert(*topic, now);
                        }
                    }
                })
                .context("spawning status publisher")?,
        );
    }

    // ============================================================
    // 命令循环（主线程）
    // ============================================================
    let commander = runtime.commander().clone();
    let ack_port = config.network.ack_port;
    let mut buf = [0u8; 4096];
    while !shutdown.load(Ordering::Acquire) {
        let (len, from) = match command_socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            },
            Err(e) => {
                warn!(error = %e, "command socket receive failed");
                continue;
            },
        };

        let msg = match CommandMessage::from_slice(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                // 坏数据报只记日志，不影响任何在途运动
                warn!(%from, error = %e, "malformed command datagram dropped");
                continue;
            },
        };

        if let Some(request_id) = msg.request_id() {
            let ack_addr = SocketAddr::new(from.ip(), ack_port);
            pending_acks.lock().insert(request_id, ack_addr);
        }

        match msg {
            // 命令端口上也接受订阅（方便只用一个端口的简单客户端）
            CommandMessage::Subscribe { topics } => registry.subscribe(from, topics),
            other => commander.handle(other),
        }
    }

    info!("daemon shutting down");
    for worker in workers {
        let _ = worker.join();
    }
    runtime.shutdown();
    Ok(())
}

/// 各话题的发布频率（配置值钳到全局上限）
fn topic_rates(config: &CommanderConfig) -> Vec<(StatusTopic, f64)> {
    let cap = config.network.max_status_rate_hz;
    vec![
        (StatusTopic::Status, config.status_rates.status.min(cap)),
        (StatusTopic::Joints, config.status_rates.joints.min(cap)),
        (StatusTopic::Pose, config.status_rates.pose.min(cap)),
        (StatusTopic::Io, config.status_rates.io.min(cap)),
        (StatusTopic::Gripper, config.status_rates.gripper.min(cap)),
    ]
}

/// 把状态快照切成话题消息
fn status_message(topic: StatusTopic, state: &RobotState) -> Option<StatusMessage> {
    match topic {
        StatusTopic::Status => Some(StatusMessage::Status {
            connected: state.link_connected,
            estop_active: state.estop_active,
            is_stopped: state.is_stopped,
            loop_hz: state.loop_hz,
        }),
        StatusTopic::Joints => Some(StatusMessage::Joints { angles: *state.joints.as_array() }),
        StatusTopic::Pose => Some(StatusMessage::Pose { pose: state.pose.to_vector() }),
        StatusTopic::Io => Some(StatusMessage::Io { inputs: state.io_inputs }),
        StatusTopic::Gripper => Some(StatusMessage::Gripper {
            position: state.gripper.position,
            speed: state.gripper.speed,
            current: state.gripper.current,
            status_code: state.gripper.status_code,
            object_detected: state.gripper.object_detected,
        }),
        // progress 是事件驱动话题，不做周期快照
        StatusTopic::Progress => None,
    }
}
