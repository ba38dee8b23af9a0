//! 硬件链路抽象 - 设定点下发与反馈读取
//!
//! 字节级串口驱动不在本进程范围内（由外部驱动 crate 提供），这里
//! 只定义它必须暴露的原语：`write_setpoints` / `read_feedback`。
//! 执行器通过 trait 对象持有链路，每拍恰好一写一读，两个调用都
//! 必须是非阻塞的（驱动内部带超时）。
//!
//! [`LoopbackLink`] 是内存回环实现：写入的设定点立即成为反馈，
//! 模拟完美跟踪的机械臂。测试与 `--simulate` 模式都用它。

use std::collections::VecDeque;
use std::sync::Arc;

use lyra_kinematics::JointAngles;
use parking_lot::Mutex;
use thiserror::Error;

/// 链路错误
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// 本拍内没等到设备响应
    #[error("hardware link timeout")]
    Timeout,

    /// 设备级错误（驱动断开、端口消失等）
    #[error("hardware link device error: {0}")]
    Device(String),
}

/// 夹爪设定点（直通，不经规划器）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GripperSetpoint {
    /// 目标开度（0-255，设备行程单位）
    pub position: u8,
    /// 速度（0-255）
    pub speed: u8,
    /// 电流限制（mA）
    pub current: u16,
}

/// 夹爪反馈
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GripperFeedback {
    pub position: i32,
    pub speed: i32,
    pub current: i32,
    pub status_code: u8,
    pub object_detected: bool,
}

/// 一帧硬件反馈
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkFeedback {
    /// 编码器关节角（度）
    pub joints: JointAngles,
    /// 8 位数字输入（急停输入在其中，低有效）
    pub io_inputs: [u8; 8],
    pub gripper: GripperFeedback,
}

/// 硬件链路原语
///
/// 实现方约定：两个方法都必须在毫秒级内返回，绝不长阻塞：执行器
/// 的 10ms 预算里没有等待设备的余地。`read_feedback` 返回
/// `Ok(None)` 表示本拍没有新反馈（正常情况，不是错误）。
pub trait HardwareLink: Send {
    /// 下发六关节设定点
    fn write_setpoints(&mut self, joints: &JointAngles) -> Result<(), LinkError>;

    /// 下发夹爪设定点
    fn write_gripper(&mut self, setpoint: &GripperSetpoint) -> Result<(), LinkError>;

    /// 读取最新反馈（无新数据返回 `Ok(None)`）
    fn read_feedback(&mut self) -> Result<Option<LinkFeedback>, LinkError>;
}

// ============================================================================
// 回环仿真链路
// ============================================================================

#[derive(Debug)]
struct LoopbackInner {
    joints: JointAngles,
    io_inputs: [u8; 8],
    gripper: GripperFeedback,
    /// 为 true 时 read_feedback 持续返回 None（模拟链路失联）
    silent: bool,
    /// 写失败注入队列：每次 write 弹出一个错误
    write_faults: VecDeque<LinkError>,
    writes: u64,
    /// 全部已下发设定点（测试断言用）
    history: Vec<JointAngles>,
}

/// 回环仿真链路
///
/// 写入的设定点立即回读为编码器反馈（完美跟踪模型）。通过
/// [`LoopbackHandle`] 可以从测试线程注入 IO 状态、失联和写故障。
pub struct LoopbackLink {
    inner: Arc<Mutex<LoopbackInner>>,
}

/// 回环链路的旁路控制句柄（测试/仿真注入用）
#[derive(Clone)]
pub struct LoopbackHandle {
    inner: Arc<Mutex<LoopbackInner>>,
}

impl LoopbackLink {
    /// 创建回环链路，初始位形为 `initial`，IO 全高（急停松开）
    pub fn new(initial: JointAngles) -> (Self, LoopbackHandle) {
        let inner = Arc::new(Mutex::new(LoopbackInner {
            joints: initial,
            io_inputs: [1; 8],
            gripper: GripperFeedback::default(),
            silent: false,
            write_faults: VecDeque::new(),
            writes: 0,
            history: Vec::new(),
        }));
        (
            LoopbackLink { inner: inner.clone() },
            LoopbackHandle { inner },
        )
    }
}

impl HardwareLink for LoopbackLink {
    fn write_setpoints(&mut self, joints: &JointAngles) -> Result<(), LinkError> {
        let mut inner = self.inner.lock();
        if let Some(fault) = inner.write_faults.pop_front() {
            return Err(fault);
        }
        inner.joints = *joints;
        inner.writes += 1;
        inner.history.push(*joints);
        Ok(())
    }

    fn write_gripper(&mut self, setpoint: &GripperSetpoint) -> Result<(), LinkError> {
        let mut inner = self.inner.lock();
        inner.gripper.position = setpoint.position as i32;
        inner.gripper.speed = setpoint.speed as i32;
        inner.gripper.current = setpoint.current as i32;
        Ok(())
    }

    fn read_feedback(&mut self) -> Result<Option<LinkFeedback>, LinkError> {
        let inner = self.inner.lock();
        if inner.silent {
            return Ok(None);
        }
        Ok(Some(LinkFeedback {
            joints: inner.joints,
            io_inputs: inner.io_inputs,
            gripper: inner.gripper,
        }))
    }
}

impl LoopbackHandle {
    /// 当前回读的关节角
    pub fn joints(&self) -> JointAngles {
        self.inner.lock().joints
    }

    /// 已下发的设定点计数
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }

    /// 设置某一位数字输入（急停注入用）
    pub fn set_io_input(&self, bit: usize, value: u8) {
        self.inner.lock().io_inputs[bit] = value;
    }

    /// 模拟链路失联/恢复
    pub fn set_silent(&self, silent: bool) {
        self.inner.lock().silent = silent;
    }

    /// 注入接下来 `n` 次写失败
    pub fn fail_next_writes(&self, n: usize) {
        let mut inner = self.inner.lock();
        for _ in 0..n {
            inner.write_faults.push_back(LinkError::Device("injected fault".into()));
        }
    }

    pub fn gripper(&self) -> GripperFeedback {
        self.inner.lock().gripper
    }

    /// 已下发设定点的完整历史
    pub fn setpoint_history(&self) -> Vec<JointAngles> {
        self.inner.lock().history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_echoes_writes() {
        let (mut link, handle) = LoopbackLink::new(JointAngles::ZERO);
        let q = JointAngles::new([10.0, 20.0, 30.0, 0.0, 0.0, 0.0]);

        link.write_setpoints(&q).unwrap();
        let fb = link.read_feedback().unwrap().unwrap();
        assert_eq!(fb.joints, q);
        assert_eq!(handle.write_count(), 1);
    }

    #[test]
    fn test_loopback_silence() {
        let (mut link, handle) = LoopbackLink::new(JointAngles::ZERO);
        handle.set_silent(true);
        assert!(link.read_feedback().unwrap().is_none());
        handle.set_silent(false);
        assert!(link.read_feedback().unwrap().is_some());
    }

    #[test]
    fn test_loopback_write_fault_injection() {
        let (mut link, handle) = LoopbackLink::new(JointAngles::ZERO);
        handle.fail_next_writes(2);

        assert!(link.write_setpoints(&JointAngles::ZERO).is_err());
        assert!(link.write_setpoints(&JointAngles::ZERO).is_err());
        assert!(link.write_setpoints(&JointAngles::ZERO).is_ok());
    }

    #[test]
    fn test_gripper_passthrough() {
        let (mut link, handle) = LoopbackLink::new(JointAngles::ZERO);
        link.write_gripper(&GripperSetpoint { position: 120, speed: 60, current: 500 }).unwrap();
        assert_eq!(handle.gripper().position, 120);
        assert_eq!(handle.gripper().current, 500);
    }
}
