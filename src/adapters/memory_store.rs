//! In-memory record store.
//!
//! Implements [`RecordStore`] over plain vectors.  Used by the test suite
//! and by simulation runs.  `set_available(false)` makes every call fail
//! with [`StoreError::Unavailable`] and `set_writable(false)` fails only the
//! appends, so callers can exercise the persistence-failure paths.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::app::ports::{RecordStore, StoreError};
use crate::records::{Baseline, Reading, Signal, SignalLog, Source};

#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: Vec<Reading>,
    baselines: Vec<Baseline>,
    signals: HashMap<SignalLog, Vec<Signal>>,
    unavailable: bool,
    read_only: bool,
    /// Appends refused while offline or read-only.
    refused_writes: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away (`false`) or coming back (`true`).
    pub fn set_available(&mut self, available: bool) {
        self.unavailable = !available;
    }

    /// Keep serving reads but refuse appends (`false`).
    pub fn set_writable(&mut self, writable: bool) {
        self.read_only = !writable;
    }

    pub fn refused_writes(&self) -> u32 {
        self.refused_writes
    }

    /// Every entry of a control log, oldest first.
    pub fn signals(&self, log: SignalLog) -> &[Signal] {
        self.signals.get(&log).map_or(&[], Vec::as_slice)
    }

    pub fn baselines(&self) -> &[Baseline] {
        &self.baselines
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable {
            Err(StoreError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }

    fn check_write(&mut self) -> Result<(), StoreError> {
        let res = self.check().and_then(|()| {
            if self.read_only {
                Err(StoreError::Unavailable("memory store read-only".into()))
            } else {
                Ok(())
            }
        });
        if res.is_err() {
            self.refused_writes += 1;
        }
        res
    }
}

impl RecordStore for MemoryStore {
    fn insert_reading(&mut self, reading: &Reading) -> Result<(), StoreError> {
        self.check_write()?;
        self.readings.push(*reading);
        Ok(())
    }

    fn readings_since(
        &self,
        source: Source,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError> {
        self.check()?;
        let mut out: Vec<Reading> = self
            .readings
            .iter()
            .filter(|r| r.source == source && r.timestamp >= since)
            .copied()
            .collect();
        out.sort_by_key(|r| r.timestamp);
        Ok(out)
    }

    fn insert_baseline(&mut self, baseline: &Baseline) -> Result<(), StoreError> {
        self.check_write()?;
        self.baselines.push(*baseline);
        Ok(())
    }

    fn latest_baseline(&self) -> Result<Option<Baseline>, StoreError> {
        self.check()?;
        Ok(self.baselines.last().copied())
    }

    fn recent_baselines(&self, limit: usize) -> Result<Vec<Baseline>, StoreError> {
        self.check()?;
        let start = self.baselines.len().saturating_sub(limit);
        Ok(self.baselines[start..].to_vec())
    }

    fn append_signal(&mut self, log: SignalLog, signal: &Signal) -> Result<(), StoreError> {
        self.check_write()?;
        self.signals.entry(log).or_default().push(*signal);
        Ok(())
    }

    fn latest_signal(&self, log: SignalLog) -> Result<Option<Signal>, StoreError> {
        self.check()?;
        Ok(self.signals(log).last().copied())
    }

    fn signals_since(
        &self,
        log: SignalLog,
        since: DateTime<Utc>,
    ) -> Result<Vec<Signal>, StoreError> {
        self.check()?;
        Ok(self
            .signals(log)
            .iter()
            .filter(|s| s.timestamp >= since)
            .copied()
            .collect())
    }
}
