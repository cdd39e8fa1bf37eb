//! Runtime configuration: a TOML file with every section optional, plus
//! command-line overrides in `main`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use gnat_types::{AutopilotConfig, BalanceConfig, ObstacleConfig, TauConfig, VoConfig};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which obstacle analyzer variant runs on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerVariant {
    Sparse,
    Dense,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GnatConfig {
    /// Address of the framed H.264 stream.
    pub stream_addr: String,
    /// Listen address of the HTTP surface.
    pub http_addr: String,
    /// Base URL of the drone command endpoint.
    pub drone_api: String,
    pub analyzer: AnalyzerVariant,
    pub vo: VoConfig,
    pub obstacle: ObstacleConfig,
    pub balance: BalanceConfig,
    pub tau: TauConfig,
    pub autopilot: AutopilotConfig,
}

impl Default for GnatConfig {
    fn default() -> Self {
        Self {
            stream_addr: "127.0.0.1:9000".to_string(),
            http_addr: "127.0.0.1:8080".to_string(),
            drone_api: "http://127.0.0.1:9000".to_string(),
            analyzer: AnalyzerVariant::Sparse,
            vo: VoConfig::default(),
            obstacle: ObstacleConfig::default_sparse(),
            balance: BalanceConfig::default(),
            tau: TauConfig::default(),
            autopilot: AutopilotConfig::default(),
        }
    }
}

impl GnatConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: GnatConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.analyzer, AnalyzerVariant::Sparse);
        assert_eq!(cfg.autopilot.smoothing_window, 5);
    }

    #[test]
    fn partial_config_overrides_one_section() {
        let cfg: GnatConfig = toml::from_str(
            r#"
            analyzer = "dense"

            [autopilot]
            target_flow = 4.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.analyzer, AnalyzerVariant::Dense);
        assert_eq!(cfg.autopilot.target_flow, 4.5);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.autopilot.balance_gain, 0.3);
        assert_eq!(cfg.vo.max_features, 1000);
    }
}
