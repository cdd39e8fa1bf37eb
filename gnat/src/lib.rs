//! The gnat vision navigation pipeline.
//!
//! A receiver thread owns the stream connection and runs demux, decode and
//! the per-frame analysis chain (visual odometry, obstacle analysis,
//! balance/tau, autopilot) in a fixed order. The most recent processed
//! frame lands in a single-slot mailbox that the HTTP surface reads
//! without ever blocking the receiver.

pub mod config;
pub mod egress;
pub mod http;
pub mod mailbox;
pub mod pipeline;
pub mod source;

/// Wall-clock time in seconds, used for frame timestamps, tau samples and
/// the command rate limiter.
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}
