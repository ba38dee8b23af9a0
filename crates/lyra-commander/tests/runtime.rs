//! 运行时集成测试 - 完整执行链路（回环链路）
//!
//! 这些测试启动真实的 100Hz 执行器线程，通过回环链路验证控制回路
//! 的硬性质：限位保证、急停一拍内停写、最新请求原子取代、每个
//! request_id 恰好一条终态确认、链路失联升级为安全故障。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use lyra_commander::{
    CommanderBuilder, CommanderConfig, CommanderRuntime, LoopbackLink,
};
use lyra_kinematics::{ArmModel, JointAngles};
use lyra_proto::{AckMessage, AckStatus, CommandMessage};

fn start_runtime() -> (CommanderRuntime, lyra_commander::LoopbackHandle) {
    let (link, handle) = LoopbackLink::new(JointAngles::ZERO);
    let runtime = CommanderBuilder::new(CommanderConfig::default())
        .with_link(Box::new(link))
        .build()
        .unwrap();
    (runtime, handle)
}

fn move_joints(request_id: u32, j1: f64, speed_pct: f64) -> CommandMessage {
    CommandMessage::MoveJoints {
        request_id,
        angles: [j1, 0.0, 0.0, 0.0, 0.0, 0.0],
        speed_pct,
        accel_pct: 80.0,
        wait_for_ack: true,
        timeout_s: 10.0,
    }
}

/// 等待某个 request_id 的指定确认，顺带收集路过的其他确认
fn wait_for_ack(
    rx: &Receiver<AckMessage>,
    request_id: u32,
    status: AckStatus,
    timeout: Duration,
) -> AckMessage {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(ack) = rx.recv_timeout(Duration::from_millis(100))
            && ack.request_id == request_id
            && ack.status == status
        {
            return ack;
        }
    }
    panic!("ack {status:?} for request {request_id} not received within {timeout:?}");
}

#[test]
fn test_joint_move_executes_within_limits() {
    let (runtime, handle) = start_runtime();
    let acks = runtime.ack_receiver();

    runtime.commander().handle(move_joints(1, 30.0, 80.0));
    wait_for_ack(&acks, 1, AckStatus::Started, Duration::from_secs(2));
    wait_for_ack(&acks, 1, AckStatus::Completed, Duration::from_secs(10));

    // 机械臂停在目标上
    assert!((handle.joints()[0] - 30.0).abs() < 1e-6);

    // 性质：每个已下发设定点都在限位内
    let model = ArmModel::lyra6();
    let history = handle.setpoint_history();
    assert!(!history.is_empty());
    for point in &history {
        assert!(model.limit_violations(point).is_empty());
    }

    runtime.shutdown();
}

#[test]
fn test_estop_halts_writes_until_cleared() {
    let (runtime, handle) = start_runtime();
    let acks = runtime.ack_receiver();

    // 慢速长行程，留足中途打断的时间
    runtime.commander().handle(move_joints(1, 80.0, 10.0));
    wait_for_ack(&acks, 1, AckStatus::Started, Duration::from_secs(2));
    std::thread::sleep(Duration::from_millis(200));

    runtime.commander().handle(CommandMessage::Estop { request_id: 9 });

    // 在途轨迹收到终态拒绝；急停命令自身确认完成
    let aborted = wait_for_ack(&acks, 1, AckStatus::Rejected, Duration::from_secs(2));
    assert!(aborted.reason.unwrap().contains("aborted"));
    wait_for_ack(&acks, 9, AckStatus::Completed, Duration::from_secs(2));

    // 停写：写计数在故障期间不再增长
    std::thread::sleep(Duration::from_millis(50));
    let frozen = handle.write_count();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(handle.write_count(), frozen, "setpoints written while Faulted");

    let state = runtime.context().state();
    assert!(state.estop_active);
    assert!(state.is_stopped);

    // 故障期间运动命令被拒绝
    runtime.commander().handle(move_joints(2, 10.0, 80.0));
    wait_for_ack(&acks, 2, AckStatus::Rejected, Duration::from_secs(2));

    // 清错后恢复运动
    runtime.commander().handle(CommandMessage::ClearError { request_id: 10 });
    wait_for_ack(&acks, 10, AckStatus::Completed, Duration::from_secs(2));
    runtime.commander().handle(move_joints(3, 10.0, 80.0));
    wait_for_ack(&acks, 3, AckStatus::Completed, Duration::from_secs(10));
    assert!((handle.joints()[0] - 10.0).abs() < 1e-6);

    runtime.shutdown();
}

#[test]
fn test_hardware_estop_input_faults_executor() {
    let (runtime, handle) = start_runtime();
    let acks = runtime.ack_receiver();

    // 急停输入位拉低（低有效）
    handle.set_io_input(4, 0);

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if runtime.context().state().estop_active {
            break;
        }
        assert!(Instant::now() < deadline, "hardware E-stop never observed");
        std::thread::sleep(Duration::from_millis(10));
    }

    // 输入未松开时清错必须被拒
    runtime.commander().handle(CommandMessage::ClearError { request_id: 1 });
    wait_for_ack(&acks, 1, AckStatus::Rejected, Duration::from_secs(2));

    // 松开后可清
    handle.set_io_input(4, 1);
    std::thread::sleep(Duration::from_millis(50));
    runtime.commander().handle(CommandMessage::ClearError { request_id: 2 });
    wait_for_ack(&acks, 2, AckStatus::Completed, Duration::from_secs(2));

    runtime.shutdown();
}

#[test]
fn test_new_request_supersedes_in_flight_trajectory() {
    let (runtime, handle) = start_runtime();
    let acks = runtime.ack_receiver();

    runtime.commander().handle(move_joints(1, 60.0, 20.0));
    wait_for_ack(&acks, 1, AckStatus::Started, Duration::from_secs(2));
    std::thread::sleep(Duration::from_millis(300));

    runtime.commander().handle(move_joints(2, -30.0, 80.0));

    let superseded = wait_for_ack(&acks, 1, AckStatus::Rejected, Duration::from_secs(2));
    assert!(superseded.reason.unwrap().contains("superseded"));
    wait_for_ack(&acks, 2, AckStatus::Completed, Duration::from_secs(10));
    assert!((handle.joints()[0] - (-30.0)).abs() < 1e-6);

    // 原子切换：没有哪一拍混用新旧轨迹。整条设定点历史保持
    // 速度连续（新轨迹从旧轨迹的实际位置起步）
    let model = ArmModel::lyra6();
    let max_step = model.limits()[0].max_velocity_dps * 0.01 * 1.5;
    let history = handle.setpoint_history();
    for pair in history.windows(2) {
        let step = (pair[1][0] - pair[0][0]).abs();
        assert!(step <= max_step, "joint jump {step}° between consecutive setpoints");
    }

    runtime.shutdown();
}

#[test]
fn test_exactly_one_terminal_ack_per_request() {
    let (runtime, handle) = start_runtime();
    let acks = runtime.ack_receiver();

    // 场景：一次完成(1)、一次被取代(2)、一次正常完成(3)、一次校验
    // 拒绝(4)、急停(5)与清错(6)。期间不从通道取数，结束后一次性
    // 清点，每个 request_id 必须恰好一条终态确认。
    runtime.commander().handle(move_joints(1, 20.0, 80.0));
    let deadline = Instant::now() + Duration::from_secs(10);
    while (handle.joints()[0] - 20.0).abs() > 1e-6 {
        assert!(Instant::now() < deadline, "move 1 never finished");
        std::thread::sleep(Duration::from_millis(20));
    }

    runtime.commander().handle(move_joints(2, 60.0, 10.0));
    std::thread::sleep(Duration::from_millis(300));
    runtime.commander().handle(move_joints(3, -20.0, 80.0));

    runtime.commander().handle(CommandMessage::MoveJoints {
        request_id: 4,
        angles: [0.0, 500.0, 0.0, 0.0, 0.0, 0.0],
        speed_pct: 50.0,
        accel_pct: 50.0,
        wait_for_ack: true,
        timeout_s: 5.0,
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    while (handle.joints()[0] - (-20.0)).abs() > 1e-6 {
        assert!(Instant::now() < deadline, "move 3 never finished");
        std::thread::sleep(Duration::from_millis(20));
    }

    runtime.commander().handle(CommandMessage::Estop { request_id: 5 });
    std::thread::sleep(Duration::from_millis(100));
    runtime.commander().handle(CommandMessage::ClearError { request_id: 6 });
    std::thread::sleep(Duration::from_millis(300));

    // 一次性清点全部确认
    let mut terminals: HashMap<u32, u32> = HashMap::new();
    while let Ok(ack) = acks.try_recv() {
        if ack.is_terminal() {
            *terminals.entry(ack.request_id).or_insert(0) += 1;
        }
    }
    for id in 1..=6 {
        assert_eq!(terminals.get(&id), Some(&1), "request {id} terminal ack count");
    }

    runtime.shutdown();
}

#[test]
fn test_stale_link_escalates_to_fault_and_recovers() {
    let (runtime, handle) = start_runtime();
    let acks = runtime.ack_receiver();

    handle.set_silent(true);

    // 新鲜度窗口（10 拍）失效后 link_connected 翻转
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if !runtime.context().state().link_connected {
            break;
        }
        assert!(Instant::now() < deadline, "stale link never detected");
        std::thread::sleep(Duration::from_millis(20));
    }
    // 再等重试（5 拍）耗尽，升级为安全故障
    std::thread::sleep(Duration::from_millis(300));

    // 故障期间运动被拒，原因指向链路
    runtime.commander().handle(move_joints(1, 10.0, 80.0));
    let ack = wait_for_ack(&acks, 1, AckStatus::Rejected, Duration::from_secs(2));
    assert!(ack.reason.unwrap().contains("hardware link lost"));

    // 链路恢复 + 清错 → 正常执行
    handle.set_silent(false);
    std::thread::sleep(Duration::from_millis(100));
    runtime.commander().handle(CommandMessage::ClearError { request_id: 2 });
    wait_for_ack(&acks, 2, AckStatus::Completed, Duration::from_secs(2));

    runtime.commander().handle(move_joints(3, 15.0, 80.0));
    wait_for_ack(&acks, 3, AckStatus::Completed, Duration::from_secs(10));

    runtime.shutdown();
}

#[test]
fn test_gripper_passthrough_reaches_link() {
    let (runtime, handle) = start_runtime();
    let acks = runtime.ack_receiver();

    runtime.commander().handle(CommandMessage::Gripper {
        request_id: 1,
        position: 120,
        speed: 60,
        current: 500,
    });
    wait_for_ack(&acks, 1, AckStatus::Completed, Duration::from_secs(2));

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if handle.gripper().position == 120 {
            break;
        }
        assert!(Instant::now() < deadline, "gripper setpoint never reached link");
        std::thread::sleep(Duration::from_millis(10));
    }

    runtime.shutdown();
}

#[test]
fn test_cartesian_move_end_to_end() {
    let (runtime, handle) = start_runtime();
    let acks = runtime.ack_receiver();
    let progress = runtime.progress_receiver();

    // 从零位形出发的小位移目标
    let model = ArmModel::lyra6();
    let mut goal_q = JointAngles::ZERO;
    goal_q[0] = 6.0;
    goal_q[1] = 5.0;
    let target = model.forward_kinematics(&goal_q);

    runtime.commander().handle(CommandMessage::MoveCartesian {
        request_id: 1,
        pose: target.to_vector(),
        duration_s: 0.3,
        wait_for_ack: true,
        timeout_s: 30.0,
    });

    wait_for_ack(&acks, 1, AckStatus::Started, Duration::from_secs(30));
    wait_for_ack(&acks, 1, AckStatus::Completed, Duration::from_secs(30));

    // 进度事件到达 30/30
    let mut final_progress = None;
    while let Ok(p) = progress.try_recv() {
        assert_eq!(p.total, 30);
        final_progress = Some(p);
    }
    assert_eq!(final_progress.unwrap().current, 30);

    // 终点位姿命中目标
    let reached = model.forward_kinematics(&handle.joints());
    assert!(reached.position_distance(&target) < 1.0);

    runtime.shutdown();
}
