//! Rolling PM2.5 baseline estimator.
//!
//! A run takes the reading window, throws away implausible samples, and
//! proposes the window median as the new baseline.  The median ignores short
//! spikes that would drag a mean upward.  Before the candidate is adopted it
//! is compared against the previous baseline: a jump larger than
//! `outlier_sigma` standard deviations of the baseline history is either
//! discarded or clamped, depending on [`OutlierPolicy`].
//!
//! A discarded candidate appends nothing, so the history and its bound
//! cannot move on their own.  [`BaselineEstimator::confirm_shift`] lets a
//! run of `shift_confirm_runs` discarded candidates that agree with each
//! other replace the baseline, so a lasting change in the ambient level is
//! eventually adopted.
//!
//! ```text
//!  window ──▶ sanity filter ──▶ count >= min? ──▶ median ──▶ deviation check ──▶ outcome
//!                                  │ no                          │ too far
//!                                  ▼                             ▼
//!                          InsufficientData              Rejected / Clamped
//! ```

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::config::{BaselineConfig, OutlierPolicy};
use crate::records::{Baseline, Reading};

/// Result of one estimation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaselineOutcome {
    /// Candidate accepted; append it.
    Adopted(Baseline),
    /// Candidate was too far from the previous value and was pulled back to
    /// the edge of the deviation bound; append the clamped value.
    Clamped { candidate: f64, baseline: Baseline },
    /// Candidate discarded; the previous baseline stays current.
    Rejected { candidate: f64, previous: f64 },
    /// Enough consecutive discarded candidates agreed on a new level; append
    /// their median.
    Shifted { runs: usize, baseline: Baseline },
    /// Not enough plausible samples yet.  Not an error.
    InsufficientData { have: usize, need: usize },
    /// The filter ran recently, so the window does not show the normal level.
    Frozen,
}

impl BaselineOutcome {
    /// The record to append, if this outcome produces one.
    pub fn baseline(&self) -> Option<Baseline> {
        match self {
            Self::Adopted(b)
            | Self::Clamped { baseline: b, .. }
            | Self::Shifted { baseline: b, .. } => Some(*b),
            _ => None,
        }
    }
}

/// Stateless estimator; all history comes in through the arguments.
pub struct BaselineEstimator {
    config: BaselineConfig,
}

impl BaselineEstimator {
    pub fn new(config: BaselineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Estimate a new baseline.
    ///
    /// `history` is the recent baseline sequence, oldest first; its last
    /// element is the current baseline.
    pub fn estimate(
        &self,
        window: &[Reading],
        history: &[Baseline],
        now: DateTime<Utc>,
    ) -> BaselineOutcome {
        let cfg = &self.config;

        let mut samples: Vec<f64> = window
            .iter()
            .map(|r| r.pm25)
            .filter(|v| self.is_plausible(*v))
            .collect();

        let dropped = window.len() - samples.len();
        if dropped > 0 {
            debug!("baseline: dropped {} implausible samples", dropped);
        }

        if samples.len() < cfg.min_samples {
            info!(
                "baseline: {} of {} samples, skipping run",
                samples.len(),
                cfg.min_samples
            );
            return BaselineOutcome::InsufficientData {
                have: samples.len(),
                need: cfg.min_samples,
            };
        }

        let candidate = median(&mut samples);
        let previous = history.last().map(|b| b.value);

        if let (Some(prev), Some(bound)) = (previous, self.deviation_bound(history)) {
            let delta = candidate - prev;
            if delta.abs() > bound {
                return match cfg.outlier_policy {
                    OutlierPolicy::Discard => {
                        warn!(
                            "baseline: candidate {:.2} deviates {:.2} from {:.2} (bound {:.2}), rejected",
                            candidate,
                            delta.abs(),
                            prev,
                            bound
                        );
                        BaselineOutcome::Rejected {
                            candidate,
                            previous: prev,
                        }
                    }
                    OutlierPolicy::Clamp => {
                        let value = prev + bound.copysign(delta);
                        warn!(
                            "baseline: candidate {:.2} clamped to {:.2} (bound {:.2})",
                            candidate, value, bound
                        );
                        BaselineOutcome::Clamped {
                            candidate,
                            baseline: Baseline {
                                timestamp: now,
                                value,
                            },
                        }
                    }
                };
            }
        }

        info!("baseline: adopted {:.2} from {} samples", candidate, samples.len());
        BaselineOutcome::Adopted(Baseline {
            timestamp: now,
            value: candidate,
        })
    }

    /// Adopt a new level once the newest `shift_confirm_runs` discarded
    /// candidates lie within one deviation bound of each other.
    ///
    /// `rejected` holds the discarded candidates of consecutive runs, oldest
    /// first.  Returns `None` while the trailing agreeing run is too short,
    /// or when the escape hatch is disabled (`shift_confirm_runs == 0`).
    pub fn confirm_shift(
        &self,
        rejected: &[f64],
        history: &[Baseline],
        now: DateTime<Utc>,
    ) -> Option<BaselineOutcome> {
        let need = self.config.shift_confirm_runs;
        let bound = self.deviation_bound(history)?;
        if need == 0 || rejected.len() < need {
            return None;
        }

        let mut tail = rejected[rejected.len() - need..].to_vec();
        let lo = tail.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = tail.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if hi - lo > bound {
            debug!(
                "baseline: last {} rejected candidates spread {:.2} > {:.2}, no shift",
                need,
                hi - lo,
                bound
            );
            return None;
        }

        let value = median(&mut tail);
        info!(
            "baseline: {} consecutive candidates agree on {:.2}, adopting level shift",
            need, value
        );
        Some(BaselineOutcome::Shifted {
            runs: need,
            baseline: Baseline {
                timestamp: now,
                value,
            },
        })
    }

    /// Maximum allowed move from the previous baseline, or `None` while the
    /// history is too short to have a spread.
    fn deviation_bound(&self, history: &[Baseline]) -> Option<f64> {
        if history.len() < 2 {
            return None;
        }
        let values: Vec<f64> = history.iter().map(|b| b.value).collect();
        let spread = std_dev(&values).max(self.config.min_stddev);
        Some(self.config.outlier_sigma * spread)
    }

    fn is_plausible(&self, pm25: f64) -> bool {
        pm25.is_finite() && pm25 >= 0.0 && pm25 <= self.config.max_plausible_pm25
    }
}

/// Median of a non-empty slice (reorders it).
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Sample standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}
