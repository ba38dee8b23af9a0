//! 回路指标 - 节拍计数与实测频率
//!
//! 全部用原子量，执行器热路径上只有 `fetch_add` 和 `store`，
//! 读取方随时取快照，互不干扰。

use std::sync::atomic::{AtomicU64, Ordering};

/// 回路与命令指标
#[derive(Debug, Default)]
pub struct LoopMetrics {
    /// 执行器总节拍数
    pub ticks_total: AtomicU64,
    /// 超出 10ms 预算的节拍数
    pub ticks_over_budget: AtomicU64,
    /// 已下发的设定点数
    pub setpoints_written: AtomicU64,
    /// 链路通信失败次数（读或写）
    pub comm_errors: AtomicU64,
    /// 接受的命令数
    pub commands_accepted: AtomicU64,
    /// 拒绝的命令数
    pub commands_rejected: AtomicU64,
    /// 被新请求顶掉的轨迹/规划数
    pub superseded: AtomicU64,
    /// 实测回路频率（Hz，f64 位模式存储）
    loop_hz_bits: AtomicU64,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行器专用：更新实测频率（指数平滑后的值）
    pub fn store_loop_hz(&self, hz: f64) {
        self.loop_hz_bits.store(hz.to_bits(), Ordering::Relaxed);
    }

    pub fn loop_hz(&self) -> f64 {
        f64::from_bits(self.loop_hz_bits.load(Ordering::Relaxed))
    }

    /// 一致性要求不高的只读快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            ticks_over_budget: self.ticks_over_budget.load(Ordering::Relaxed),
            setpoints_written: self.setpoints_written.load(Ordering::Relaxed),
            comm_errors: self.comm_errors.load(Ordering::Relaxed),
            commands_accepted: self.commands_accepted.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            loop_hz: self.loop_hz(),
        }
    }
}

/// 指标快照（普通值，可随意传递/序列化到日志）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub ticks_total: u64,
    pub ticks_over_budget: u64,
    pub setpoints_written: u64,
    pub comm_errors: u64,
    pub commands_accepted: u64,
    pub commands_rejected: u64,
    pub superseded: u64,
    pub loop_hz: f64,
}

/// 实测频率的指数平滑器（执行器线程私有，非并发）
#[derive(Debug)]
pub struct HzEstimator {
    smoothed_period_s: f64,
    alpha: f64,
}

impl HzEstimator {
    /// `nominal_hz`: 初始估计；`alpha`: 平滑系数（越小越平滑）
    pub fn new(nominal_hz: f64, alpha: f64) -> Self {
        HzEstimator { smoothed_period_s: 1.0 / nominal_hz, alpha }
    }

    /// 喂入一拍的实际周期，返回平滑后的频率
    pub fn update(&mut self, period_s: f64) -> f64 {
        self.smoothed_period_s =
            self.smoothed_period_s * (1.0 - self.alpha) + period_s * self.alpha;
        1.0 / self.smoothed_period_s
    }
}
