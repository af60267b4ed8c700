//! Every tunable of the well reader in one place.

use std::path::Path;

use plate_math::{IcpConfig, ParticleFilterConfig, ParticleState};
use serde::{Deserialize, Serialize};

use crate::background::BackgroundConfig;
use crate::error::Result;
use crate::grid::assignment::AssignerConfig;
use crate::grid::estimation::GridEstimatorConfig;
use crate::image_proc::detection::spots::SpotDetectionConfig;
use crate::image_proc::well::WellLocatorConfig;

/// Configuration for a whole run, built once and shared by reference.
///
/// Missing fields in a JSON file take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub well: WellLocatorConfig,
    pub spots: SpotDetectionConfig,
    pub estimator: GridEstimatorConfig,
    pub icp: IcpConfig,
    pub particle_filter: ParticleFilterConfig,
    /// Std of the Gaussian priors around the estimated grid pose
    pub prior_spread: ParticleState,
    pub assigner: AssignerConfig,
    /// Regions farther than this fraction of the smaller pitch from every
    /// registered cell are left unassigned
    pub assign_distance: f64,
    pub background: BackgroundConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            well: WellLocatorConfig::default(),
            spots: SpotDetectionConfig::default(),
            estimator: GridEstimatorConfig::default(),
            icp: IcpConfig::default(),
            particle_filter: ParticleFilterConfig::default(),
            prior_spread: ParticleState::new(5.0, 5.0, 0.5f64.to_radians(), 0.1),
            assigner: AssignerConfig::default(),
            assign_distance: 0.5,
            background: BackgroundConfig::default(),
        }
    }
}

impl ReaderConfig {
    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
