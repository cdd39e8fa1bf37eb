//! Optical-flow based obstacle analysis.
//!
//! Two interchangeable analyzers share one output contract
//! ([`gnat_types::ObstacleResult`]): a dense variant that samples a full
//! flow field and a sparse variant that tracks a pool of corners. The
//! autopilot is polymorphic over [`ObstacleAnalyzer`] and never sees which
//! variant produced a result.
//!
//! The same crate carries the bee-inspired corridor balancer and the
//! tau-based time-to-contact estimator; all three consume the decoded
//! frame's grayscale plane and a monotonic timestamp, nothing else.

use flowops::GrayMap;
use gnat_frame::VideoFrame;
use gnat_types::ObstacleResult;

pub mod balance;
pub mod dense;
pub mod sparse;
pub mod tau;
mod zones;

pub use balance::FlowBalancer;
pub use dense::DenseObstacleDetector;
pub use sparse::SparseObstacleDetector;
pub use tau::{TauEstimator, TauSample};

/// Capability shared by the obstacle analyzer variants.
pub trait ObstacleAnalyzer {
    /// Analyze one frame. `now` is the frame timestamp in seconds.
    fn analyze(&mut self, frame: &VideoFrame, now: f64) -> ObstacleResult {
        let gray = GrayMap::copy_from(&frame.mono_view());
        self.analyze_gray(&gray, now)
    }

    /// Grayscale entry point, which the tests drive directly.
    fn analyze_gray(&mut self, gray: &GrayMap, now: f64) -> ObstacleResult;

    /// Most recent flow magnitude map, if a frame pair has been analyzed.
    fn magnitude_map(&self) -> Option<&flowops::MagnitudeMap>;
}
