//! Mutable context threaded through every detector state handler.
//!
//! The context is single-owner: each [`EventDetector`] holds its own, and
//! evaluation takes `&mut self`, so two cycles can never interleave on the
//! same debounce counters.
//!
//! [`EventDetector`]: crate::detector::EventDetector

use crate::config::DetectorConfig;
use crate::records::SwitchState;

#[derive(Debug, Clone)]
pub struct DetectorContext {
    // -- Inputs --
    /// PM2.5 of the sample under evaluation (µg/m³).
    pub sample: Option<f64>,
    /// Current baseline, `None` until one has been adopted.
    pub baseline: Option<f64>,

    // -- Debounce --
    /// Consecutive samples at or above the rise threshold (while Quiet).
    pub rise_count: u32,
    /// Consecutive samples at or below the return threshold (while Alert).
    pub return_count: u32,

    // -- Output --
    /// Signal produced by the last transition; cleared by the caller.
    pub emitted: Option<SwitchState>,

    // -- Configuration --
    pub config: DetectorConfig,
}

impl DetectorContext {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            sample: None,
            baseline: None,
            rise_count: 0,
            return_count: 0,
            emitted: None,
            config,
        }
    }

    pub fn reset_counters(&mut self) {
        self.rise_count = 0;
        self.return_count = 0;
    }

    /// `baseline + rise_threshold`, or `None` without a baseline.
    pub fn rise_level(&self) -> Option<f64> {
        self.baseline.map(|b| b + self.config.rise_threshold)
    }

    /// `baseline + return_threshold`, or `None` without a baseline.
    pub fn return_level(&self) -> Option<f64> {
        self.baseline.map(|b| b + self.config.return_threshold)
    }
}
