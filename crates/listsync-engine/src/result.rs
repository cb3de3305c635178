//! Run result aggregates.
//!
//! These are transient values derived from what a pass did; the durable
//! record of a run is the history log, not these structs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{EntityKind, RunStatus};

/// Outcome of one entity within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
    Skipped,
}

/// Per-entity detail, in processing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityOutcome {
    pub kind: EntityKind,
    pub entity_id: i64,
    pub status: OutcomeStatus,
    /// Remote member id on success.
    pub remote_id: Option<String>,
    /// Error or skip reason; empty on success.
    pub detail: String,
}

impl EntityOutcome {
    pub fn success(kind: EntityKind, entity_id: i64, remote_id: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id,
            status: OutcomeStatus::Success,
            remote_id: Some(remote_id.into()),
            detail: String::new(),
        }
    }

    pub fn error(kind: EntityKind, entity_id: i64, detail: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id,
            status: OutcomeStatus::Error,
            remote_id: None,
            detail: detail.into(),
        }
    }

    pub fn skipped(kind: EntityKind, entity_id: i64, detail: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id,
            status: OutcomeStatus::Skipped,
            remote_id: None,
            detail: detail.into(),
        }
    }
}

/// Aggregate result of one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRunResult {
    pub success: u64,
    pub errors: u64,
    pub skipped: u64,
    /// Per-entity outcomes in processing order.
    pub outcomes: Vec<EntityOutcome>,
}

impl SyncRunResult {
    pub fn record(&mut self, outcome: EntityOutcome) {
        match outcome.status {
            OutcomeStatus::Success => self.success += 1,
            OutcomeStatus::Error => self.errors += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        if self.errors > 0 {
            RunStatus::Error
        } else {
            RunStatus::Success
        }
    }
}

/// What happened to one kind within a multi-kind run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindReport {
    Ran(SyncRunResult),
    /// The kind is disabled in settings.
    Skipped,
    /// Configuration problem fatal to this kind only.
    Failed { message: String },
}

/// Composite result of a manual run, keyed by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub kinds: BTreeMap<EntityKind, KindReport>,
}

impl RunReport {
    pub fn insert(&mut self, kind: EntityKind, report: KindReport) {
        self.kinds.insert(kind, report);
    }

    /// Totals across every kind that ran.
    #[must_use]
    pub fn totals(&self) -> SyncRunResult {
        let mut totals = SyncRunResult::default();
        for report in self.kinds.values() {
            if let KindReport::Ran(result) = report {
                totals.success += result.success;
                totals.errors += result.errors;
                totals.skipped += result.skipped;
                totals.outcomes.extend(result.outcomes.iter().cloned());
            }
        }
        totals
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        let any_failed = self
            .kinds
            .values()
            .any(|r| matches!(r, KindReport::Failed { .. }));
        if any_failed || self.totals().errors > 0 {
            RunStatus::Error
        } else {
            RunStatus::Success
        }
    }
}

/// Result of a bidirectional run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidirectionalReport {
    pub outward: RunReport,
    pub inward: SyncRunResult,
}

/// Result of a scheduled invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledOutcome {
    Ran(RunReport),
    /// Synchronization or auto-sync is switched off.
    Disabled,
    /// Within the minimum interval since the last activity; nothing was
    /// touched.
    Skipped,
}

/// Result of a real-time single-entity sync. Never an `Err`: the trigger
/// boundary is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleSyncOutcome {
    pub status: RunStatus,
    pub message: String,
}

impl SingleSyncOutcome {
    pub fn new(status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}
