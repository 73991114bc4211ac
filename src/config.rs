use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregate::DEFAULT_LOWER_BOUNDS;
use crate::error::{ProfileError, Result};

/// Limits used by the traffic analyzer. Missing fields in a threshold file
/// fall back to these defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionThresholds {
    /// Distinct (destination, port) pairs one source may touch.
    pub port_scan_ports: usize,
    pub large_transfer_bytes: u64,
    pub dns_query_count: usize,
    pub rare_port_hits: usize,
    pub common_ports: Vec<u16>,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        DetectionThresholds {
            port_scan_ports: 50,
            large_transfer_bytes: 1_000_000,
            dns_query_count: 100,
            rare_port_hits: 5,
            common_ports: vec![22, 53, 80, 443, 3306],
        }
    }
}

impl DetectionThresholds {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let thresholds: DetectionThresholds = serde_json::from_str(&raw)?;
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_scan_ports == 0 {
            return Err(ProfileError::InvalidConfig("port_scan_ports must be greater than 0".into()));
        }
        if self.large_transfer_bytes == 0 {
            return Err(ProfileError::InvalidConfig("large_transfer_bytes must be greater than 0".into()));
        }
        if self.dns_query_count == 0 {
            return Err(ProfileError::InvalidConfig("dns_query_count must be greater than 0".into()));
        }
        if self.rare_port_hits == 0 {
            return Err(ProfileError::InvalidConfig("rare_port_hits must be greater than 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Minimum received records before a destination's details are exported.
    pub lower_bounds: usize,
    pub max_records: Option<usize>,
    pub thresholds: DetectionThresholds,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            lower_bounds: DEFAULT_LOWER_BOUNDS,
            max_records: None,
            thresholds: DetectionThresholds::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lower_bounds == 0 {
            return Err(ProfileError::InvalidConfig("lower bounds must be greater than 0".into()));
        }
        if self.max_records == Some(0) {
            return Err(ProfileError::InvalidConfig("number of records must be greater than 0".into()));
        }
        self.thresholds.validate()
    }
}
