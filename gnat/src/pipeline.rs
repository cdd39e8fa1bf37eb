//! The receiver-side processing pipeline.
//!
//! Runs on one std thread: read a chunk, demux, decode, then the fixed
//! per-frame analysis order (visual odometry, obstacle analysis,
//! balance/tau, autopilot). Ordering matters: pose integration depends on
//! consecutive frames as this thread sees them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use frame_decode::FrameDecoder;
use gnat_autopilot::{AutopilotController, AutopilotStatus, SmoothedCommand};
use gnat_frame::VideoFrame;
use gnat_types::{TauDanger, VisionResult};
use mono_vo::{TrackState, VisualOdometry};
use nal_demux::Demuxer;
use obstacle_flow::{
    tau::{classify_tau, tau_map_from_divergence},
    DenseObstacleDetector, FlowBalancer, ObstacleAnalyzer, SparseObstacleDetector, TauEstimator,
};

use crate::config::{AnalyzerVariant, GnatConfig};
use crate::mailbox::{FrameMailbox, ProcessedFrame};
use crate::now_seconds;
use crate::source::MessageSource;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Source(#[from] crate::source::Error),
    #[error(transparent)]
    Decode(#[from] frame_decode::Error),
}

/// Status snapshot served by `GET /api/status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub demux_fallback_chunks: u64,
    pub fps: f64,
    pub vo_position: [f64; 3],
    pub vo_moving_frames: u64,
    pub vo_stationary_frames: u64,
    pub trajectory_len: usize,
    pub vision: Option<VisionResult>,
    /// Minimum finite tau over the zone grid, seconds.
    pub min_tau: Option<f64>,
    pub tau_danger: Option<TauDanger>,
    pub autopilot: Option<AutopilotStatus>,
}

/// State shared between the receiver thread and the HTTP surface. These
/// are the only cross-thread objects in the system, next to the running
/// flag itself.
#[derive(Clone)]
pub struct PipelineShared {
    pub mailbox: FrameMailbox,
    pub running: Arc<AtomicBool>,
    pub autopilot: Arc<Mutex<AutopilotController>>,
    pub status: Arc<Mutex<StatusSnapshot>>,
    /// Command awaiting operator confirmation, when confirmation mode is
    /// on.
    pub pending_command: Arc<Mutex<Option<SmoothedCommand>>>,
}

impl PipelineShared {
    pub fn new(autopilot: AutopilotController) -> Self {
        Self {
            mailbox: FrameMailbox::new(),
            running: Arc::new(AtomicBool::new(true)),
            autopilot: Arc::new(Mutex::new(autopilot)),
            status: Arc::new(Mutex::new(StatusSnapshot::default())),
            pending_command: Arc::new(Mutex::new(None)),
        }
    }
}

pub struct VisionPipeline {
    config: GnatConfig,
    demuxer: Demuxer,
    decoder: FrameDecoder,
    vo: VisualOdometry,
    analyzer: Box<dyn ObstacleAnalyzer + Send>,
    balancer: FlowBalancer,
    tau: TauEstimator,
    shared: PipelineShared,
    command_tx: Option<UnboundedSender<SmoothedCommand>>,
}

impl VisionPipeline {
    pub fn new(
        config: GnatConfig,
        shared: PipelineShared,
        command_tx: Option<UnboundedSender<SmoothedCommand>>,
    ) -> Self {
        let analyzer: Box<dyn ObstacleAnalyzer + Send> = match config.analyzer {
            AnalyzerVariant::Sparse => {
                Box::new(SparseObstacleDetector::new(config.obstacle.clone()))
            }
            AnalyzerVariant::Dense => Box::new(DenseObstacleDetector::new(config.obstacle.clone())),
        };
        Self {
            demuxer: Demuxer::new(),
            decoder: FrameDecoder::new(),
            vo: VisualOdometry::new(config.vo.clone()),
            analyzer,
            balancer: FlowBalancer::new(config.balance.clone()),
            tau: TauEstimator::new(config.tau.clone()),
            shared,
            command_tx,
            config,
        }
    }

    /// Receive loop. Returns `Ok(())` on a normal close (peer hangup or
    /// running flag cleared); a transport error disables the autopilot,
    /// queues a stop for the vehicle and is surfaced to the caller.
    pub fn run<S: MessageSource>(&mut self, mut source: S) -> Result<()> {
        while self.shared.running.load(Ordering::Relaxed) {
            let chunk = match source.read_next_message() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    tracing::info!("stream closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::error!("transport error: {e}");
                    self.shared.autopilot.lock().disable();
                    self.queue_stop();
                    return Err(e.into());
                }
            };
            if chunk.is_empty() {
                continue;
            }
            self.process_chunk(&chunk)?;
        }
        Ok(())
    }

    /// Demux and decode one transport chunk, analyzing every frame that
    /// falls out.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let now = now_seconds();
        let mut frames = Vec::new();
        for unit in self.demuxer.push_chunk(chunk) {
            frames.extend(self.decoder.push_unit(&unit, now)?);
        }
        for frame in frames {
            self.process_frame(frame);
        }
        Ok(())
    }

    /// The fixed per-frame analysis order.
    pub fn process_frame(&mut self, frame: VideoFrame) {
        let ts = frame.timestamp();

        let vo_result = self.vo.process_frame(&frame);
        if vo_result.state == TrackState::Moving {
            tracing::debug!(
                position = ?vo_result.position,
                matches = vo_result.num_matches,
                "pose updated"
            );
        }

        let obstacle = self.analyzer.analyze(&frame, ts);

        let balance = self
            .analyzer
            .magnitude_map()
            .map(|map| self.balancer.compute_balance(map));

        // Bulk tau over the zone grid.
        let (min_tau, tau_danger) = if obstacle.zones.is_empty() {
            (None, None)
        } else {
            let divs: Vec<f64> = obstacle.zones.iter().map(|z| z.divergence).collect();
            let mags: Vec<f32> = obstacle.zones.iter().map(|z| z.avg_magnitude as f32).collect();
            let tau_map = tau_map_from_divergence(&divs, &mags);
            let min_tau = tau_map
                .iter()
                .copied()
                .filter(|t| t.is_finite())
                .fold(f64::INFINITY, f64::min);
            if min_tau.is_finite() {
                let (danger, _urgency) = classify_tau(min_tau, None);
                (Some(min_tau), Some(danger))
            } else {
                (None, None)
            }
        };
        self.tau.sweep(ts);

        let vision = VisionResult {
            balance,
            flow_magnitude: obstacle.flow_magnitude,
            danger_level: obstacle.danger_level,
            safe_directions: obstacle.safe_directions,
        };

        // Autopilot tick.
        let plan = {
            let mut autopilot = self.shared.autopilot.lock();
            let cmd = autopilot.compute_control(&vision);
            autopilot.plan_emission(&cmd, ts)
        };
        if let Some(plan) = plan {
            if self.config.autopilot.confirmation_mode {
                *self.shared.pending_command.lock() = Some(plan);
            } else {
                self.dispatch(plan);
            }
        }

        // Publish status and the frame itself.
        {
            let decode_stats = self.decoder.stats();
            let vo_stats = self.vo.stats();
            let mut status = self.shared.status.lock();
            status.frames_decoded = decode_stats.frames_out;
            status.decode_errors = decode_stats.decode_errors;
            status.demux_fallback_chunks = self.demuxer.stats().fallback_chunks;
            status.fps = self.decoder.fps();
            let p = self.vo.position();
            status.vo_position = [p.x, p.y, p.z];
            status.vo_moving_frames = vo_stats.moving_frames;
            status.vo_stationary_frames = vo_stats.stationary_frames;
            status.trajectory_len = self.vo.trajectory_len();
            status.vision = Some(vision.clone());
            status.min_tau = min_tau;
            status.tau_danger = tau_danger;
            status.autopilot = Some(self.shared.autopilot.lock().status());
        }

        self.shared.mailbox.store(ProcessedFrame { frame, vision });
    }

    fn dispatch(&self, plan: SmoothedCommand) {
        if let Some(tx) = &self.command_tx {
            if tx.send(plan).is_err() {
                tracing::warn!("egress channel closed, dropping command");
            }
        }
    }

    fn queue_stop(&self) {
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(SmoothedCommand {
                vx: 0.0,
                vy: 0.0,
                vz: 0.0,
                yaw: 0.0,
                action: gnat_autopilot::Action::Stopped,
                token: gnat_types::DroneToken::Stop,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ReplaySource;
    use gnat_autopilot::AutopilotState;

    fn test_pipeline() -> (VisionPipeline, PipelineShared) {
        let config = GnatConfig::default();
        let shared = PipelineShared::new(AutopilotController::new(config.autopilot.clone()));
        let pipeline = VisionPipeline::new(config, shared.clone(), None);
        (pipeline, shared)
    }

    #[test]
    fn junk_stream_produces_no_frames_and_no_commands() {
        let (mut pipeline, shared) = test_pipeline();
        let source = ReplaySource::new(vec![vec![0xffu8; 100], vec![0x00u8; 50]]);
        pipeline.run(source).unwrap();
        assert!(shared.mailbox.latest().is_none());
        assert_eq!(shared.autopilot.lock().state(), AutopilotState::Disabled);
    }

    #[test]
    fn synthetic_frames_flow_through_analysis() {
        let (mut pipeline, shared) = test_pipeline();
        shared.autopilot.lock().enable();
        // Bypass the codec: feed decoded frames straight into the
        // analysis chain.
        for i in 0..3u64 {
            let frame = VideoFrame::from_rgb8(i, i as f64 * 0.033, 64, 48, vec![60; 64 * 48 * 3]);
            pipeline.process_frame(frame);
        }
        let latest = shared.mailbox.latest().expect("mailbox filled");
        assert_eq!(latest.frame.index(), 2);
        let status = shared.status.lock().clone();
        assert!(status.vision.is_some());
        assert_eq!(status.vo_position, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn running_flag_stops_the_loop() {
        let (mut pipeline, shared) = test_pipeline();
        shared.running.store(false, Ordering::Relaxed);
        // An endless source would hang if the flag were ignored.
        struct Endless;
        impl MessageSource for Endless {
            fn read_next_message(&mut self) -> crate::source::Result<Option<bytes::Bytes>> {
                Ok(Some(bytes::Bytes::new()))
            }
        }
        pipeline.run(Endless).unwrap();
    }
}
