//! Zone bookkeeping shared by the dense and sparse analyzers.

use gnat_types::{GridSize, ObstacleConfig, SafeDirections, Zone, ZoneStatus};

/// Pixel bounds of grid cell (row, col), tiling the frame exactly.
pub(crate) fn zone_bounds(
    grid: &GridSize,
    width: u32,
    height: u32,
    row: usize,
    col: usize,
) -> (u32, u32, u32, u32) {
    let x1 = (col as u64 * width as u64 / grid.cols as u64) as u32;
    let x2 = ((col as u64 + 1) * width as u64 / grid.cols as u64) as u32;
    let y1 = (row as u64 * height as u64 / grid.rows as u64) as u32;
    let y2 = ((row as u64 + 1) * height as u64 / grid.rows as u64) as u32;
    (x1, y1, x2, y2)
}

/// Nominal frame rate assumed by the frames-to-contact heuristic.
pub(crate) const NOMINAL_FPS: f64 = 30.0;

/// Status from the unified threshold rule.
pub(crate) fn classify(cfg: &ObstacleConfig, expansion: f64, ttc: Option<f64>) -> ZoneStatus {
    if let Some(ttc) = ttc {
        if ttc < cfg.ttc_danger {
            return ZoneStatus::Danger;
        }
        if ttc < cfg.ttc_warning {
            return ZoneStatus::Warning;
        }
    }
    if expansion > cfg.expansion_threshold {
        ZoneStatus::Caution
    } else {
        ZoneStatus::Clear
    }
}

/// Clear escape directions blocked by warning/danger zones. Forward is
/// blocked by any interior zone (non-edge row and non-edge column).
pub(crate) fn safe_directions(grid: &GridSize, zones: &[Zone]) -> SafeDirections {
    let mut safe = SafeDirections::default();
    for zone in zones {
        if !zone.status.is_blocking() {
            continue;
        }
        if zone.row == 0 {
            safe.up = false;
        }
        if zone.row == grid.rows - 1 {
            safe.down = false;
        }
        if zone.col == 0 {
            safe.left = false;
        }
        if zone.col == grid.cols - 1 {
            safe.right = false;
        }
        let interior_row = zone.row > 0 && zone.row < grid.rows - 1;
        let interior_col = zone.col > 0 && zone.col < grid.cols - 1;
        if interior_row && interior_col {
            safe.forward = false;
        }
    }
    safe
}

/// Human-readable warnings for blocking zones, worst first.
pub(crate) fn warnings(zones: &[Zone]) -> Vec<String> {
    let mut out = Vec::new();
    for zone in zones {
        match zone.status {
            ZoneStatus::Danger => {
                let ttc = zone.ttc.unwrap_or(f64::INFINITY);
                out.push(format!(
                    "DANGER: zone [{},{}] TTC={:.1}s",
                    zone.row, zone.col, ttc
                ));
            }
            ZoneStatus::Warning => {
                out.push(format!("WARNING: zone [{},{}] approaching", zone.row, zone.col));
            }
            _ => {}
        }
    }
    out
}
