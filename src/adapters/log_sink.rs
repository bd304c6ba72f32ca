//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the `log` facade (stderr through `env_logger` in the daemon).
//! A dashboard push adapter would implement the same trait.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::baseline::BaselineOutcome;

/// Adapter that logs every [`AppEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started(state) => {
                info!("START | system_signal={}", state);
            }
            AppEvent::BaselineEvaluated(outcome) => match outcome {
                BaselineOutcome::Adopted(b) => {
                    info!("BASELINE | adopted {:.2} at {}", b.value, b.timestamp);
                }
                BaselineOutcome::Clamped { candidate, baseline } => {
                    warn!(
                        "BASELINE | candidate {:.2} clamped to {:.2}",
                        candidate, baseline.value
                    );
                }
                BaselineOutcome::Rejected { candidate, previous } => {
                    warn!(
                        "BASELINE | candidate {:.2} rejected, keeping {:.2}",
                        candidate, previous
                    );
                }
                BaselineOutcome::Shifted { runs, baseline } => {
                    warn!(
                        "BASELINE | level shift to {:.2} after {} rejected runs",
                        baseline.value, runs
                    );
                }
                BaselineOutcome::InsufficientData { have, need } => {
                    info!("BASELINE | insufficient data ({}/{})", have, need);
                }
                BaselineOutcome::Frozen => {
                    info!("BASELINE | frozen while filter active");
                }
            },
            AppEvent::SystemSignal(s) => {
                info!("SYSTEM | {} at {}", s.state, s.timestamp);
            }
            AppEvent::UserControl(s) => {
                info!("USER | {} at {}", s.state, s.timestamp);
            }
            AppEvent::FilterCommand(s) => {
                info!("FILTER | {} at {}", s.state, s.timestamp);
            }
            AppEvent::Published { state, retained } => {
                info!("PUBLISH | {} retained={}", state, retained);
            }
            AppEvent::PublishFailed(detail) => {
                warn!("PUBLISH | failed: {}", detail);
            }
            AppEvent::StoreUnavailable { cycle, detail } => {
                warn!("STORE | {:?} cycle skipped: {}", cycle, detail);
            }
        }
    }
}
