use crate::hal::HalStats;
use arrayvec::ArrayString;
use core::fmt;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const MAX_FAULT_HISTORY: usize = 64;
const SOURCE_LEN: usize = 32;
const MESSAGE_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    Hardware,
    Command,
    /// A subsystem hook could not run.
    Subsystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: u32,
    pub kind: FaultKind,
    pub cycle: u64,
    pub source: ArrayString<SOURCE_LEN>,
    pub message: ArrayString<MESSAGE_LEN>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCounts {
    pub hardware: u32,
    pub command: u32,
    pub subsystem: u32,
    pub conflicts: u32,
}

/// Bounded fault history; the oldest record is evicted when full.
#[derive(Debug)]
pub struct FaultLog {
    history: Vec<FaultRecord, MAX_FAULT_HISTORY>,
    counts: FaultCounts,
    next_fault_id: u32,
}

impl FaultLog {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            counts: FaultCounts::default(),
            next_fault_id: 1,
        }
    }

    pub fn record(&mut self, kind: FaultKind, cycle: u64, source: &str, message: &dyn fmt::Display) -> u32 {
        self.record_many(kind, cycle, source, message, 1)
    }

    /// One history entry standing for `occurrences` faults of the same kind.
    pub fn record_many(
        &mut self,
        kind: FaultKind,
        cycle: u64,
        source: &str,
        message: &dyn fmt::Display,
        occurrences: u32,
    ) -> u32 {
        let fault_id = self.next_fault_id;
        self.next_fault_id = self.next_fault_id.wrapping_add(1);

        let message = message.to_string();
        warn!(cycle, ?kind, source, occurrences, "{}", message);

        let count = match kind {
            FaultKind::Hardware => &mut self.counts.hardware,
            FaultKind::Command => &mut self.counts.command,
            FaultKind::Subsystem => &mut self.counts.subsystem,
        };
        *count = count.saturating_add(occurrences);

        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(FaultRecord {
            id: fault_id,
            kind,
            cycle,
            source: truncated(source),
            message: truncated(&message),
        });
        fault_id
    }

    pub fn record_conflict(&mut self) {
        self.counts.conflicts = self.counts.conflicts.saturating_add(1);
    }

    pub fn counts(&self) -> FaultCounts {
        self.counts
    }

    pub fn last(&self) -> Option<&FaultRecord> {
        self.history.last()
    }

    pub fn history(&self) -> &[FaultRecord] {
        &self.history
    }
}

impl Default for FaultLog {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn truncated<const N: usize>(text: &str) -> ArrayString<N> {
    let mut out = ArrayString::new();
    for c in text.chars() {
        if out.try_push(c).is_err() {
            break;
        }
    }
    out
}

/// Read-only diagnostic state for an external telemetry collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub cycle: u64,
    pub running_commands: u8,
    pub pending_commands: u8,
    pub faults: FaultCounts,
    pub last_fault: Option<FaultRecord>,
    pub hal: HalStats,
}
