//! HTTP surface: MJPEG viewer, status JSON and autopilot control.

use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use gnat_autopilot::SmoothedCommand;

use crate::pipeline::PipelineShared;

const MJPEG_BOUNDARY: &str = "gnatframe";
const JPEG_QUALITY: u8 = 85;
/// ~30 fps viewer tick.
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Clone)]
pub struct AppState {
    pub shared: PipelineShared,
    pub command_tx: Option<UnboundedSender<SmoothedCommand>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream.mjpeg", get(stream_mjpeg))
        .route("/api/status", get(status))
        .route("/api/autopilot/enable", post(enable))
        .route("/api/autopilot/disable", post(disable))
        .route("/api/autopilot/emergency", post(emergency))
        .route("/api/autopilot/confirm", post(confirm))
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.shared.status.lock().clone();
    Json(snapshot)
}

async fn enable(State(state): State<AppState>) -> impl IntoResponse {
    state.shared.autopilot.lock().enable();
    StatusCode::OK
}

async fn disable(State(state): State<AppState>) -> impl IntoResponse {
    state.shared.autopilot.lock().disable();
    send_stop(&state);
    StatusCode::OK
}

async fn emergency(State(state): State<AppState>) -> impl IntoResponse {
    state.shared.autopilot.lock().trigger_emergency();
    send_stop(&state);
    StatusCode::OK
}

/// Release the command held back by confirmation mode, if any.
async fn confirm(State(state): State<AppState>) -> impl IntoResponse {
    let pending = state.shared.pending_command.lock().take();
    match pending {
        Some(plan) => {
            if let Some(tx) = &state.command_tx {
                let _ = tx.send(plan);
            }
            StatusCode::OK
        }
        None => StatusCode::NO_CONTENT,
    }
}

fn send_stop(state: &AppState) {
    if let Some(tx) = &state.command_tx {
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

/// `multipart/x-mixed-replace` stream of JPEG frames at ~30 fps,
/// latest-frame semantics against the mailbox.
async fn stream_mjpeg(State(state): State<AppState>) -> Response {
    let stream = futures::stream::unfold(state, |state| async move {
        loop {
            tokio::time::sleep(FRAME_INTERVAL).await;
            if !state.shared.running.load(Ordering::Relaxed) {
                return None;
            }
            match encode_latest(&state) {
                Some(part) => return Some((Ok::<Bytes, Infallible>(part), state)),
                None => continue,
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
        )
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn encode_latest(state: &AppState) -> Option<Bytes> {
    let processed = state.shared.mailbox.latest()?;
    let frame = &processed.frame;

    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    if let Err(e) = encoder.encode(
        frame.rgb_data(),
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    ) {
        tracing::warn!("JPEG encode failed: {e}");
        return None;
    }

    let mut part = Vec::with_capacity(jpeg.len() + 128);
    part.extend_from_slice(
        format!(
            "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            jpeg.len()
        )
        .as_bytes(),
    );
    part.extend_from_slice(&jpeg);
    part.extend_from_slice(b"\r\n");
    Some(Bytes::from(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnat_autopilot::{AutopilotController, AutopilotState};
    use gnat_frame::VideoFrame;
    use gnat_types::{AutopilotConfig, SafeDirections, VisionResult};

    fn test_state() -> AppState {
        AppState {
            shared: PipelineShared::new(AutopilotController::new(AutopilotConfig::default())),
            command_tx: None,
        }
    }

    #[test]
    fn encode_latest_yields_multipart_jpeg() {
        let state = test_state();
        state.shared.mailbox.store(crate::mailbox::ProcessedFrame {
            frame: VideoFrame::from_rgb8(0, 0.0, 8, 8, vec![128; 8 * 8 * 3]),
            vision: VisionResult {
                balance: None,
                flow_magnitude: 0.0,
                danger_level: 0,
                safe_directions: SafeDirections::default(),
            },
        });
        let part = encode_latest(&state).expect("frame encodes");
        let text = String::from_utf8_lossy(&part[..64]);
        assert!(text.starts_with("--gnatframe\r\n"));
        assert!(text.contains("image/jpeg"));
    }

    #[test]
    fn encode_latest_without_frame_is_none() {
        let state = test_state();
        assert!(encode_latest(&state).is_none());
    }

    #[tokio::test]
    async fn enable_endpoint_flips_state() {
        let state = test_state();
        enable(State(state.clone())).await;
        assert_eq!(state.shared.autopilot.lock().state(), AutopilotState::Enabled);
        disable(State(state.clone())).await;
        assert_eq!(
            state.shared.autopilot.lock().state(),
            AutopilotState::Disabled
        );
    }
}
