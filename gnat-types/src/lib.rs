//! Shared types for the gnat vision navigation pipeline.
//!
//! Result records produced by the analyzers, the configuration surface, and
//! the discrete command vocabulary of the drone endpoint live here so that
//! the analyzer crates and the autopilot do not depend on each other.

use serde::{Deserialize, Serialize};

/// Status of a single grid zone after flow analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    Clear,
    Caution,
    Warning,
    Danger,
}

impl ZoneStatus {
    pub fn is_blocking(&self) -> bool {
        matches!(self, ZoneStatus::Warning | ZoneStatus::Danger)
    }
}

/// Per-zone flow analysis. Zones tile the frame exactly: `rows x cols`
/// rectangles, rebuilt on every analyzed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub row: usize,
    pub col: usize,
    /// Pixel bounds (x1, y1, x2, y2), half-open on the right/bottom.
    pub bounds: (u32, u32, u32, u32),
    pub num_points: usize,
    pub avg_magnitude: f64,
    pub divergence: f64,
    /// `max(0, divergence)`.
    pub expansion_rate: f64,
    /// Frames-to-contact estimate in seconds; `None` when not expanding.
    pub ttc: Option<f64>,
    pub status: ZoneStatus,
}

/// Which escape directions remain open. All true until a blocking zone
/// clears one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeDirections {
    pub forward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl Default for SafeDirections {
    fn default() -> Self {
        Self {
            forward: true,
            left: true,
            right: true,
            up: true,
            down: true,
        }
    }
}

/// Output contract shared by both obstacle analyzer variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObstacleResult {
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub safe_directions: SafeDirections,
    pub warnings: Vec<String>,
    /// Raw danger level on the variant's own scale (dense 0/1/2,
    /// sparse 0/2/3). The autopilot normalizes on ingest.
    pub danger_level: u8,
    pub flow_magnitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LateralAdvice {
    Centered,
    GoLeft,
    GoRight,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedAdvice {
    Ok,
    ReduceSpeed,
    TooFast,
    TooSlow,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerticalAdvice {
    Level,
    GoUp,
    GoDown,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionAdvice {
    Continue,
    AdjustLeft,
    AdjustRight,
    SlowDown,
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendations {
    pub lateral: LateralAdvice,
    pub speed: SpeedAdvice,
    pub vertical: VerticalAdvice,
    pub action: ActionAdvice,
}

/// Corridor balance computed from a flow magnitude map.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BalanceResult {
    /// In [-1, 1]; positive means more flow on the left.
    pub lateral_balance: f64,
    pub ventral_flow: f64,
    pub dorsal_flow: f64,
    pub vertical_balance: f64,
    pub left_flow: f64,
    pub right_flow: f64,
    pub recommendations: Recommendations,
}

/// Tau danger classification per Lee's time-to-contact thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TauDanger {
    Safe,
    Caution,
    Warning,
    Danger,
}

/// Everything the autopilot consumes for one control tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionResult {
    pub balance: Option<BalanceResult>,
    pub flow_magnitude: f64,
    pub danger_level: u8,
    #[serde(default)]
    pub safe_directions: SafeDirections,
}

/// The discrete command vocabulary of the drone HTTP endpoint. The vehicle
/// accepts exactly one token at a time and has no forward/backward support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneToken {
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    YawLeft,
    YawRight,
    Stop,
}

impl DroneToken {
    /// Path under `/api/` on the drone endpoint.
    pub fn api_path(&self) -> &'static str {
        match self {
            DroneToken::MoveUp => "move/up",
            DroneToken::MoveDown => "move/down",
            DroneToken::MoveLeft => "move/left",
            DroneToken::MoveRight => "move/right",
            DroneToken::YawLeft => "yaw/left",
            DroneToken::YawRight => "yaw/right",
            DroneToken::Stop => "stop",
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration surface. All fields optional in serialized form with the
// defaults documented in the field comments.

/// Pinhole intrinsics used to normalize pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in pixels.
    pub focal_length: f64,
    /// Principal point (cx, cy).
    pub principal_point: (f64, f64),
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        // Estimated for a 1280x720 stream.
        Self {
            focal_length: 800.0,
            principal_point: (640.0, 360.0),
        }
    }
}

/// Thresholds gating whether an epipolar motion estimate updates the pose.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionGate {
    pub min_translation: f64,
    pub min_rotation: f64,
    pub min_inliers: usize,
}

impl Default for MotionGate {
    fn default() -> Self {
        Self {
            min_translation: 0.5,
            min_rotation: 0.15,
            min_inliers: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoConfig {
    pub intrinsics: CameraIntrinsics,
    pub gate: MotionGate,
    pub max_features: usize,
    pub trajectory_cap: usize,
    /// Monocular unit scale; carries no metric meaning.
    pub scale: f64,
}

impl Default for VoConfig {
    fn default() -> Self {
        Self {
            intrinsics: CameraIntrinsics::default(),
            gate: MotionGate::default(),
            max_features: 1000,
            trajectory_cap: 500,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridSize {
    pub cols: usize,
    pub rows: usize,
}

impl Default for GridSize {
    fn default() -> Self {
        Self { cols: 4, rows: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstacleConfig {
    pub grid: GridSize,
    /// Expansion threshold for the caution status. The sparse variant
    /// defaults to 1.5, the dense variant to 2.0.
    pub expansion_threshold: f64,
    pub ttc_warning: f64,
    pub ttc_danger: f64,
}

impl ObstacleConfig {
    pub fn default_sparse() -> Self {
        Self {
            grid: GridSize::default(),
            expansion_threshold: 1.5,
            ttc_warning: 2.0,
            ttc_danger: 1.0,
        }
    }

    pub fn default_dense() -> Self {
        Self {
            expansion_threshold: 2.0,
            ..Self::default_sparse()
        }
    }
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self::default_sparse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Acceptable lateral imbalance before a correction is recommended.
    pub balance_threshold: f64,
    /// Target ventral flow in pixels/frame for speed regulation.
    pub speed_target: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            balance_threshold: 0.3,
            speed_target: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TauConfig {
    /// Regions smaller than this (pixels) are ignored.
    pub min_size: f64,
    /// Expansion rates below this (pixels/second) are treated as noise.
    pub min_rate: f64,
    /// Regions idle longer than this (seconds) are swept.
    pub max_age: f64,
}

impl Default for TauConfig {
    fn default() -> Self {
        Self {
            min_size: 10.0,
            min_rate: 0.1,
            max_age: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    pub balance_gain: f32,
    pub speed_gain: f32,
    /// Target flow in pixels/frame for forward speed selection.
    pub target_flow: f32,
    pub deadband: f32,
    pub max_vx: f32,
    pub min_vx: f32,
    pub max_vy: f32,
    pub max_vz: f32,
    pub max_yaw: f32,
    /// Moving-average window for command smoothing.
    pub smoothing_window: usize,
    /// Minimum seconds between command emissions.
    pub rate_limit: f64,
    /// When set, commands are computed and surfaced but not transmitted
    /// until confirmed over the control surface.
    pub confirmation_mode: bool,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            balance_gain: 0.3,
            speed_gain: 0.2,
            target_flow: 3.0,
            deadband: 0.05,
            max_vx: 0.5,
            min_vx: -0.2,
            max_vy: 0.3,
            max_vz: 0.2,
            max_yaw: 15.0,
            smoothing_window: 5,
            rate_limit: 0.2,
            confirmation_mode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_directions_default_all_open() {
        let s = SafeDirections::default();
        assert!(s.forward && s.left && s.right && s.up && s.down);
    }

    #[test]
    fn obstacle_config_variant_defaults() {
        assert_eq!(ObstacleConfig::default_sparse().expansion_threshold, 1.5);
        assert_eq!(ObstacleConfig::default_dense().expansion_threshold, 2.0);
        assert_eq!(ObstacleConfig::default_dense().grid.cols, 4);
        assert_eq!(ObstacleConfig::default_dense().grid.rows, 3);
    }

    #[test]
    fn drone_token_paths() {
        assert_eq!(DroneToken::MoveLeft.api_path(), "move/left");
        assert_eq!(DroneToken::Stop.api_path(), "stop");
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = AutopilotConfig::default();
        let s = serde_json::to_string(&cfg).unwrap();
        let back: AutopilotConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back.smoothing_window, 5);
        assert_eq!(back.rate_limit, 0.2);
    }

    #[test]
    fn vision_result_tolerates_missing_safe_directions() {
        let v: VisionResult =
            serde_json::from_str(r#"{"balance":null,"flow_magnitude":1.0,"danger_level":0}"#)
                .unwrap();
        assert!(v.safe_directions.forward);
    }
}
