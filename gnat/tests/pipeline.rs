//! End-to-end analysis chain tests over synthetic image sequences. The
//! codec is bypassed: decoded frames are fed straight into the pipeline.

use gnat::config::{AnalyzerVariant, GnatConfig};
use gnat::pipeline::{PipelineShared, VisionPipeline};
use gnat_autopilot::{AutopilotController, AutopilotState};
use gnat_frame::VideoFrame;
use gnat_types::ObstacleConfig;

const W: u32 = 160;
const H: u32 = 120;

/// Smooth deterministic texture sampled in continuous coordinates.
fn texture(x: f32, y: f32) -> u8 {
    let v = (0.22 * x).sin() * (0.19 * y + 0.3).sin() + 0.4 * (0.07 * x + 0.11 * y).sin();
    (127.0 + 90.0 * v.clamp(-1.0, 1.0)) as u8
}

/// Frame looking at the texture under a center zoom of `scale` (scale > 1
/// means everything has grown: a looming surface).
fn zoom_frame(index: u64, scale: f32) -> VideoFrame {
    let cx = W as f32 / 2.0;
    let cy = H as f32 / 2.0;
    let mut rgb = Vec::with_capacity((W * H * 3) as usize);
    for y in 0..H {
        for x in 0..W {
            let sx = (x as f32 - cx) / scale + cx;
            let sy = (y as f32 - cy) / scale + cy;
            let v = texture(sx, sy);
            rgb.extend_from_slice(&[v, v, v]);
        }
    }
    VideoFrame::from_rgb8(index, index as f64 * 0.033, W, H, rgb)
}

fn shifted_frame(index: u64, shift: f32) -> VideoFrame {
    let mut rgb = Vec::with_capacity((W * H * 3) as usize);
    for y in 0..H {
        for x in 0..W {
            let v = texture(x as f32 - shift, y as f32);
            rgb.extend_from_slice(&[v, v, v]);
        }
    }
    VideoFrame::from_rgb8(index, index as f64 * 0.033, W, H, rgb)
}

fn dense_pipeline() -> (VisionPipeline, PipelineShared) {
    let config = GnatConfig {
        analyzer: AnalyzerVariant::Dense,
        obstacle: ObstacleConfig::default_dense(),
        ..GnatConfig::default()
    };
    let shared = PipelineShared::new(AutopilotController::new(config.autopilot.clone()));
    let pipeline = VisionPipeline::new(config, shared.clone(), None);
    (pipeline, shared)
}

#[test]
fn looming_surface_blocks_forward_and_latches_emergency() {
    let (mut pipeline, shared) = dense_pipeline();
    shared.autopilot.lock().enable();

    // A surface zooming 10% per frame fills the view: every zone expands.
    let mut scale = 1.0f32;
    for i in 0..6u64 {
        pipeline.process_frame(zoom_frame(i, scale));
        scale *= 1.10;
    }

    let status = shared.status.lock().clone();
    let vision = status.vision.expect("analysis ran");
    assert!(
        vision.flow_magnitude > 0.5,
        "flow = {}",
        vision.flow_magnitude
    );
    assert!(vision.danger_level >= 1, "danger = {}", vision.danger_level);
    assert!(!vision.safe_directions.forward, "forward should be blocked");

    // Three consecutive forward-blocked ticks latch the emergency state.
    assert_eq!(shared.autopilot.lock().state(), AutopilotState::Emergency);
    assert!(status.min_tau.is_some(), "expanding zones produce a tau");
}

#[test]
fn static_scene_keeps_autopilot_calm() {
    let (mut pipeline, shared) = dense_pipeline();
    shared.autopilot.lock().enable();

    for i in 0..5u64 {
        pipeline.process_frame(zoom_frame(i, 1.0));
    }

    let status = shared.status.lock().clone();
    let vision = status.vision.expect("analysis ran");
    assert_eq!(vision.danger_level, 0);
    assert!(vision.safe_directions.forward);
    assert_eq!(shared.autopilot.lock().state(), AutopilotState::Enabled);
    assert_eq!(status.vo_position, [0.0, 0.0, 0.0]);
}

#[test]
fn lateral_pan_balances_but_does_not_stop() {
    let (mut pipeline, shared) = dense_pipeline();
    shared.autopilot.lock().enable();

    for i in 0..5u64 {
        pipeline.process_frame(shifted_frame(i, i as f32 * 2.0));
    }

    let status = shared.status.lock().clone();
    let vision = status.vision.expect("analysis ran");
    assert!(
        vision.flow_magnitude > 0.5,
        "flow = {}",
        vision.flow_magnitude
    );
    // Uniform translation does not radiate from zone centers.
    assert_eq!(vision.danger_level, 0);
    assert_eq!(shared.autopilot.lock().state(), AutopilotState::Enabled);
    let balance = vision.balance.expect("magnitude map present");
    assert!(balance.lateral_balance.abs() <= 1.0);
}

#[test]
fn identical_sessions_yield_identical_state() {
    // Feeding the same frames through two fresh pipelines must produce
    // identical decode counts, poses and analysis snapshots.
    let run = || {
        let (mut pipeline, shared) = dense_pipeline();
        let mut scale = 1.0f32;
        for i in 0..4u64 {
            pipeline.process_frame(zoom_frame(i, scale));
            scale *= 1.05;
        }
        let status = shared.status.lock().clone();
        (
            status.vo_position,
            status.trajectory_len,
            serde_json::to_string(&status.vision).unwrap(),
        )
    };

    let a = run();
    let b = run();
    assert_eq!(a.0, b.0);
    assert_eq!(a.1, b.1);
    assert_eq!(a.2, b.2);
}
