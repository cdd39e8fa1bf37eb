//! Autopilot controller.
//!
//! Turns one [`VisionResult`] per frame into a smoothed, rate-limited,
//! safety-clamped command. A three-state machine guards the output:
//! commands flow only while `Enabled`, and three consecutive forward
//! blocks latch `Emergency`, which only an explicit re-enable clears.
//!
//! The target vehicle accepts discrete directional tokens, one at a time;
//! the smoothed velocity command is translated on egress with priority
//! vertical > lateral > yaw. Forward velocity is never transmitted.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use gnat_types::{AutopilotConfig, DroneToken, VisionResult};

/// Consecutive forward-blocked ticks before the emergency latch trips.
const EMERGENCY_STOP_COUNT: u32 = 3;
/// Yaw deadband for egress translation, deg/s.
const YAW_DEADBAND: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AutopilotState {
    Disabled,
    Enabled,
    Emergency,
}

/// What the controller decided this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Stopped,
    NoVision,
    Emergency,
    Stop,
    ForwardSlow,
    Cruise,
    Slowing,
    TooFast,
    ObstacleCaution,
    ObstacleAvoid,
    ObstacleClimb,
    ObstacleDescend,
}

impl Action {
    pub fn is_zero_command(&self) -> bool {
        matches!(
            self,
            Action::Stopped | Action::NoVision | Action::Emergency | Action::Stop
        )
    }
}

/// Raw (pre-smoothing) command for one tick. Units: m/s and deg/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub yaw: f32,
    pub action: Action,
}

impl Command {
    fn zero(action: Action) -> Self {
        Self {
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            yaw: 0.0,
            action,
        }
    }
}

/// Smoothed command ready for egress, with its discrete translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedCommand {
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub yaw: f32,
    pub action: Action,
    pub token: DroneToken,
}

/// Status snapshot for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotStatus {
    pub state: AutopilotState,
    pub consecutive_stops: u32,
    pub command_count: usize,
    pub last_action: Option<Action>,
}

pub struct AutopilotController {
    config: AutopilotConfig,
    state: AutopilotState,
    consecutive_stops: u32,
    vx_history: VecDeque<f32>,
    vy_history: VecDeque<f32>,
    vz_history: VecDeque<f32>,
    yaw_history: VecDeque<f32>,
    last_send_time: Option<f64>,
    last_action: Option<Action>,
}

impl AutopilotController {
    pub fn new(config: AutopilotConfig) -> Self {
        Self {
            config,
            state: AutopilotState::Disabled,
            consecutive_stops: 0,
            vx_history: VecDeque::new(),
            vy_history: VecDeque::new(),
            vz_history: VecDeque::new(),
            yaw_history: VecDeque::new(),
            last_send_time: None,
            last_action: None,
        }
    }

    pub fn state(&self) -> AutopilotState {
        self.state
    }

    /// Enable the autopilot. This is the only way out of `Emergency`.
    pub fn enable(&mut self) {
        self.state = AutopilotState::Enabled;
        self.consecutive_stops = 0;
        tracing::info!("autopilot enabled");
    }

    /// Disable and clear the smoothing history. The caller is responsible
    /// for sending a stop to the vehicle.
    pub fn disable(&mut self) {
        if self.state != AutopilotState::Emergency {
            self.state = AutopilotState::Disabled;
        }
        self.clear_history();
        tracing::info!("autopilot disabled");
    }

    /// Latch the emergency state.
    pub fn trigger_emergency(&mut self) {
        self.state = AutopilotState::Emergency;
        self.clear_history();
        tracing::warn!("EMERGENCY STOP triggered");
    }

    fn clear_history(&mut self) {
        self.vx_history.clear();
        self.vy_history.clear();
        self.vz_history.clear();
        self.yaw_history.clear();
    }

    /// Map an analyzer's danger level onto the controller's own scale.
    fn normalize_danger(raw: u8) -> u8 {
        match raw {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 3,
        }
    }

    /// Compute the raw command for one vision tick.
    pub fn compute_control(&mut self, vision: &VisionResult) -> Command {
        let cmd = self.compute_control_inner(vision);
        self.last_action = Some(cmd.action);
        cmd
    }

    fn compute_control_inner(&mut self, vision: &VisionResult) -> Command {
        match self.state {
            AutopilotState::Emergency => return Command::zero(Action::Emergency),
            AutopilotState::Disabled => return Command::zero(Action::Stopped),
            AutopilotState::Enabled => {}
        }

        let balance = match &vision.balance {
            Some(b) => b,
            None => return Command::zero(Action::NoVision),
        };

        let lateral_balance = balance.lateral_balance as f32;
        let flow = vision.flow_magnitude as f32;
        let danger = Self::normalize_danger(vision.danger_level);
        let safe = &vision.safe_directions;
        let cfg = &self.config;

        // Forward blocked or maximum danger: stop, and latch emergency
        // after three consecutive blocked ticks.
        if danger >= 3 || !safe.forward {
            self.consecutive_stops += 1;
            if self.consecutive_stops >= EMERGENCY_STOP_COUNT {
                self.trigger_emergency();
                return Command::zero(Action::Emergency);
            }
            return Command::zero(Action::Stop);
        }
        self.consecutive_stops = 0;

        // Lateral centering: steer away from the side with more flow.
        let mut vy = -lateral_balance * cfg.balance_gain;
        if vy.abs() < cfg.deadband {
            vy = 0.0;
        }

        // Forward speed from flow against target.
        let target = cfg.target_flow;
        let flow_error = (flow - target) / (target + 0.01);
        let (mut vx, mut action) = if flow < target * 0.5 {
            (0.2, Action::ForwardSlow)
        } else if flow < target * 1.2 {
            (0.15 - flow_error * cfg.speed_gain, Action::Cruise)
        } else if flow < target * 1.5 {
            ((0.1 - flow_error * cfg.speed_gain).max(0.0), Action::Slowing)
        } else {
            (0.0, Action::TooFast)
        };

        let mut vz = 0.0f32;

        // Obstacle modulation.
        if danger >= 1 {
            vx *= 0.5;
            action = Action::ObstacleCaution;
        }
        if danger >= 2 {
            vx = 0.0;
            vy *= 1.5;
            action = Action::ObstacleAvoid;
            if !safe.left && !safe.right {
                if safe.up {
                    vz = 0.15;
                    action = Action::ObstacleClimb;
                } else if safe.down {
                    vz = -0.10;
                    action = Action::ObstacleDescend;
                }
            }
        }

        Command {
            vx: vx.clamp(cfg.min_vx, cfg.max_vx),
            vy: vy.clamp(-cfg.max_vy, cfg.max_vy),
            vz: vz.clamp(-cfg.max_vz, cfg.max_vz),
            yaw: 0.0f32.clamp(-cfg.max_yaw, cfg.max_yaw),
            action,
        }
    }

    /// Smooth the command and translate it for egress. Returns `None` when
    /// the controller is not enabled or the rate limiter suppresses this
    /// tick. On a successful transmission the caller must invoke
    /// [`Self::mark_sent`]; the rate limiter advances only then.
    pub fn plan_emission(&mut self, cmd: &Command, now: f64) -> Option<SmoothedCommand> {
        if self.state != AutopilotState::Enabled {
            return None;
        }
        if let Some(last) = self.last_send_time {
            if now - last < self.config.rate_limit {
                return None;
            }
        }

        let window = self.config.smoothing_window.max(1);
        push_bounded(&mut self.vx_history, cmd.vx, window);
        push_bounded(&mut self.vy_history, cmd.vy, window);
        push_bounded(&mut self.vz_history, cmd.vz, window);
        push_bounded(&mut self.yaw_history, cmd.yaw, window);

        let vx = mean(&self.vx_history);
        let vy = mean(&self.vy_history);
        let vz = mean(&self.vz_history);
        let yaw = mean(&self.yaw_history);

        let token = self.translate(vz, vy, yaw);
        Some(SmoothedCommand {
            vx,
            vy,
            vz,
            yaw,
            action: cmd.action,
            token,
        })
    }

    /// Record a successful transmission at `now`.
    pub fn mark_sent(&mut self, now: f64) {
        self.last_send_time = Some(now);
    }

    /// Discrete egress translation, priority vertical > lateral > yaw.
    /// Forward velocity has no discrete equivalent and is dropped.
    fn translate(&self, vz: f32, vy: f32, yaw: f32) -> DroneToken {
        let deadband = self.config.deadband;
        if vz.abs() > deadband {
            return if vz > 0.0 {
                DroneToken::MoveUp
            } else {
                DroneToken::MoveDown
            };
        }
        if vy.abs() > deadband {
            return if vy > 0.0 {
                DroneToken::MoveLeft
            } else {
                DroneToken::MoveRight
            };
        }
        if yaw.abs() > YAW_DEADBAND {
            return if yaw > 0.0 {
                DroneToken::YawLeft
            } else {
                DroneToken::YawRight
            };
        }
        DroneToken::Stop
    }

    pub fn status(&self) -> AutopilotStatus {
        AutopilotStatus {
            state: self.state,
            consecutive_stops: self.consecutive_stops,
            command_count: self.vx_history.len(),
            last_action: self.last_action,
        }
    }
}

fn push_bounded(history: &mut VecDeque<f32>, value: f32, cap: usize) {
    history.push_back(value);
    while history.len() > cap {
        history.pop_front();
    }
}

fn mean(history: &VecDeque<f32>) -> f32 {
    if history.is_empty() {
        return 0.0;
    }
    history.iter().sum::<f32>() / history.len() as f32
}
