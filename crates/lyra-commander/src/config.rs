//! 配置 - TOML 聚合配置
//!
//! 一个文件描述整台指挥进程：臂体标定（TCP 偏移、限位、Home）、
//! 求解器参数、安全参数、命令接收参数、网络端口与状态发布频率。
//! 所有节都有出厂默认值，配置文件只需写想覆盖的字段；未知字段
//! 直接报错，拼写错误不会被静默吞掉。
//!
//! ```toml
//! [solver]
//! sweep_range_deg = 60.0
//! sweep_steps = 5
//!
//! [network]
//! command_bind = "0.0.0.0:5640"
//! ```

use std::path::Path;

use lyra_kinematics::{ArmModel, CartesianPose, JointAngles, JointLimit, SolverConfig};
use serde::{Deserialize, Serialize};

use crate::error::CommanderError;
use crate::ingress::IngressParams;
use crate::safety::SafetyParams;

/// 指挥进程聚合配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommanderConfig {
    pub arm: ArmSection,
    pub solver: SolverSection,
    pub safety: SafetySection,
    pub ingress: IngressSection,
    pub network: NetworkSection,
    pub status_rates: StatusRatesSection,
}

/// 臂体标定节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArmSection {
    /// TCP 偏移 [x, y, z, rx, ry, rz]（mm / 度）
    pub tcp_offset: [f64; 6],
    /// Home 位形 [J1..J6]（度）
    pub home: [f64; 6],
    /// 标称最大伸展（mm）
    pub base_max_reach_mm: f64,
    /// J5 接近 ±90° 时的伸展缩减（mm）
    pub reach_reduction_mm: f64,
    /// 六个关节的限位与速率，顺序 J1..J6
    pub joints: Vec<JointSection>,
}

/// 单关节标定
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JointSection {
    pub min_deg: f64,
    pub max_deg: f64,
    pub max_velocity_dps: f64,
    pub max_accel_dps2: f64,
}

impl Default for ArmSection {
    fn default() -> Self {
        let model = ArmModel::lyra6();
        ArmSection {
            tcp_offset: [0.0; 6],
            home: *model.home().as_array(),
            base_max_reach_mm: 440.0,
            reach_reduction_mm: 45.0,
            joints: model
                .limits()
                .iter()
                .map(|l| JointSection {
                    min_deg: l.min_deg,
                    max_deg: l.max_deg,
                    max_velocity_dps: l.max_velocity_dps,
                    max_accel_dps2: l.max_accel_dps2,
                })
                .collect(),
        }
    }
}

/// 求解器节（与 [`SolverConfig`] 字段一一对应）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSection {
    pub max_iterations: u32,
    pub damping: f64,
    pub strict_tol: f64,
    pub loose_tol: f64,
    pub singularity_threshold: f64,
    pub max_subdivision_depth: u32,
    pub sweep_range_deg: f64,
    pub sweep_steps: u32,
    pub position_weight: f64,
    pub orientation_weight: f64,
    pub max_step_deg: f64,
}

impl Default for SolverSection {
    fn default() -> Self {
        let c = SolverConfig::default();
        SolverSection {
            max_iterations: c.max_iterations,
            damping: c.damping,
            strict_tol: c.strict_tol,
            loose_tol: c.loose_tol,
            singularity_threshold: c.singularity_threshold,
            max_subdivision_depth: c.max_subdivision_depth,
            sweep_range_deg: c.sweep_range_deg,
            sweep_steps: c.sweep_steps,
            position_weight: c.position_weight,
            orientation_weight: c.orientation_weight,
            max_step_deg: c.max_step_deg,
        }
    }
}

/// 安全节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetySection {
    /// 急停所在数字输入位（0-7，低有效）
    pub estop_input_bit: usize,
    /// 反馈新鲜度窗口（节拍数）
    pub stale_feedback_ticks: u32,
    /// 连续通信失败升级阈值
    pub comm_retry_limit: u32,
}

impl Default for SafetySection {
    fn default() -> Self {
        let p = SafetyParams::default();
        SafetySection {
            estop_input_bit: p.estop_input_bit,
            stale_feedback_ticks: p.stale_feedback_ticks,
            comm_retry_limit: p.comm_retry_limit,
        }
    }
}

/// 命令接收节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngressSection {
    pub home_speed_pct: f64,
    pub home_accel_pct: f64,
    /// 轨迹开始执行时是否发 STARTED 确认
    pub ack_started: bool,
}

impl Default for IngressSection {
    fn default() -> Self {
        let p = IngressParams::default();
        IngressSection {
            home_speed_pct: p.home_speed_pct,
            home_accel_pct: p.home_accel_pct,
            ack_started: p.ack_started,
        }
    }
}

/// 网络节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSection {
    /// 命令通道监听地址
    pub command_bind: String,
    /// 确认发往命令来源 IP 的这个端口
    pub ack_port: u16,
    /// 状态反馈监听地址（SUBSCRIBE 也发到这里）
    pub status_bind: String,
    /// 单话题发布频率上限（Hz）
    pub max_status_rate_hz: f64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        NetworkSection {
            command_bind: "0.0.0.0:5640".to_string(),
            ack_port: 5641,
            status_bind: "0.0.0.0:5642".to_string(),
            max_status_rate_hz: 50.0,
        }
    }
}

/// 状态话题发布频率（Hz）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusRatesSection {
    pub status: f64,
    pub joints: f64,
    pub pose: f64,
    pub io: f64,
    pub gripper: f64,
}

impl Default for StatusRatesSection {
    fn default() -> Self {
        StatusRatesSection { status: 10.0, joints: 25.0, pose: 25.0, io: 10.0, gripper: 5.0 }
    }
}

impl CommanderConfig {
    /// 从 TOML 文件加载
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CommanderError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CommanderError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: CommanderConfig = toml::from_str(&text).map_err(|e| {
            CommanderError::Config(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CommanderError> {
        if self.arm.joints.len() != 6 {
            return Err(CommanderError::Config(format!(
                "arm.joints must list exactly 6 joints, got {}",
                self.arm.joints.len()
            )));
        }
        if self.safety.estop_input_bit > 7 {
            return Err(CommanderError::Config(format!(
                "safety.estop_input_bit must be 0-7, got {}",
                self.safety.estop_input_bit
            )));
        }
        if !(self.network.max_status_rate_hz > 0.0) {
            return Err(CommanderError::Config(
                "network.max_status_rate_hz must be positive".into(),
            ));
        }
        Ok(())
    }

    /// 组装臂体模型（出厂 DH 链 + 配置标定量）
    pub fn build_model(&self) -> Result<ArmModel, CommanderError> {
        let mut limits = [JointLimit {
            min_deg: 0.0,
            max_deg: 0.0,
            max_velocity_dps: 1.0,
            max_accel_dps2: 1.0,
        }; 6];
        for (i, j) in self.arm.joints.iter().enumerate().take(6) {
            limits[i] = JointLimit {
                min_deg: j.min_deg,
                max_deg: j.max_deg,
                max_velocity_dps: j.max_velocity_dps,
                max_accel_dps2: j.max_accel_dps2,
            };
        }
        ArmModel::new(
            ArmModel::lyra6_dh(),
            CartesianPose::from_vector(self.arm.tcp_offset),
            limits,
            JointAngles::new(self.arm.home),
            self.arm.base_max_reach_mm,
            self.arm.reach_reduction_mm,
        )
        .map_err(|e| CommanderError::Config(e.to_string()))
    }

    pub fn solver_config(&self) -> SolverConfig {
        SolverConfig {
            max_iterations: self.solver.max_iterations,
            damping: self.solver.damping,
            strict_tol: self.solver.strict_tol,
            loose_tol: self.solver.loose_tol,
            singularity_threshold: self.solver.singularity_threshold,
            max_subdivision_depth: self.solver.max_subdivision_depth,
            sweep_range_deg: self.solver.sweep_range_deg,
            sweep_steps: self.solver.sweep_steps,
            position_weight: self.solver.position_weight,
            orientation_weight: self.solver.orientation_weight,
            max_step_deg: self.solver.max_step_deg,
        }
    }

    pub fn safety_params(&self) -> SafetyParams {
        SafetyParams {
            estop_input_bit: self.safety.estop_input_bit,
            stale_feedback_ticks: self.safety.stale_feedback_ticks,
            comm_retry_limit: self.safety.comm_retry_limit,
        }
    }

    pub fn ingress_params(&self) -> IngressParams {
        IngressParams {
            home_speed_pct: self.ingress.home_speed_pct,
            home_accel_pct: self.ingress.home_accel_pct,
            ack_started: self.ingress.ack_started,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_builds_model() {
        let config = CommanderConfig::default();
        config.validate().unwrap();
        let model = config.build_model().unwrap();
        assert_eq!(model.home(), ArmModel::lyra6().home());
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[solver]
sweep_range_deg = 60.0
sweep_steps = 5

[safety]
stale_feedback_ticks = 20
"#
        )
        .unwrap();

        let config = CommanderConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.solver.sweep_range_deg, 60.0);
        assert_eq!(config.solver.sweep_steps, 5);
        assert_eq!(config.safety.stale_feedback_ticks, 20);
        // 未覆盖的字段保持默认
        assert_eq!(config.solver.max_iterations, 100);
        assert_eq!(config.network.ack_port, 5641);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[solver]
sweep_rnage_deg = 60.0
"#
        )
        .unwrap();

        let err = CommanderConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, CommanderError::Config(_)));
    }

    #[test]
    fn test_wrong_joint_count_rejected() {
        let mut config = CommanderConfig::default();
        config.arm.joints.pop();
        assert!(matches!(config.validate(), Err(CommanderError::Config(_))));
    }

    #[test]
    fn test_estop_bit_range_checked() {
        let mut config = CommanderConfig::default();
        config.safety.estop_input_bit = 9;
        assert!(matches!(config.validate(), Err(CommanderError::Config(_))));
    }
}
