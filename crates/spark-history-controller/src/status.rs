//! Status conditions of a SparkHistoryServer
//!
//! Conditions are held as a small map keyed by type. A pass reads the stored
//! conditions, transforms the map, and the caller writes the result back in
//! one status patch, only when something changed.
//!
//! Conditions computed for an older `metadata.generation` are stale. Reading
//! a stale set resets every stale condition to `Unknown` except `Available`,
//! which is sticky and keeps its last value until a pass converges again.

use std::collections::BTreeMap;

use chrono::Utc;

use spark_history_common::crd::SparkHistoryServerStatus;
use spark_history_common::{Condition, ConditionStatus, Error, ErrorCategory};

use crate::resource::ResourceFamily;
use crate::store::ApplyOutcome;

/// Reconcile progress of the current pass
pub const PROGRESSING: &str = "Progressing";
/// Every dependent resource converged
pub const AVAILABLE: &str = "Available";
/// Reconciliation is suspended by the administrator
pub const RECONCILIATION_PAUSED: &str = "ReconciliationPaused";
/// Workloads are scaled to zero by the administrator
pub const STOPPED: &str = "Stopped";

/// Condition reasons
pub mod reasons {
    /// A pass is underway or waiting on a dependency
    pub const RECONCILING: &str = "Reconciling";
    /// A dependency is not there yet
    pub const WAITING: &str = "WaitingForDependency";
    /// The last pass converged
    pub const CONVERGED: &str = "Converged";
    /// Every role group and the disruption budget were applied in one pass
    pub const ALL_APPLIED: &str = "AllResourcesApplied";
    /// The spec cannot be reconciled as written
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// A referenced object does not exist
    pub const REFERENCE_NOT_FOUND: &str = "ReferenceNotFound";
    /// Repeated transient failures
    pub const TRANSIENT_FAILURE: &str = "TransientFailure";
    /// The resources of a family were applied
    pub const APPLIED: &str = "Applied";
    /// The family has nothing to apply with the current spec
    pub const NOT_REQUIRED: &str = "NotRequired";
    /// Reset after a spec change
    pub const REINITIALIZED: &str = "Reinitialized";
    /// Administrative flag set
    pub const REQUESTED: &str = "RequestedByAdministrator";
    /// Administrative flag clear
    pub const NOT_REQUESTED: &str = "NotRequested";
}

/// Per-family tally of the upserts of one pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FamilyTally {
    /// Objects created
    pub created: u32,
    /// Objects patched
    pub updated: u32,
    /// Objects already up to date
    pub unchanged: u32,
}

impl FamilyTally {
    /// Objects applied, whatever the outcome
    pub fn total(&self) -> u32 {
        self.created + self.updated + self.unchanged
    }

    // Outcome counts differ between the first and later passes, so they stay
    // out of the condition to keep converged status stable.
    fn message(&self) -> String {
        format!("{} resources up to date", self.total())
    }
}

/// What one pass applied, and where it stopped if it failed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassProgress {
    /// Upserts per family
    pub families: BTreeMap<ResourceFamily, FamilyTally>,
    /// Family whose upsert failed
    pub failed: Option<ResourceFamily>,
}

impl PassProgress {
    /// Record one upsert
    pub fn record(&mut self, family: ResourceFamily, outcome: ApplyOutcome) {
        let tally = self.families.entry(family).or_default();
        match outcome {
            ApplyOutcome::Created => tally.created += 1,
            ApplyOutcome::Updated => tally.updated += 1,
            ApplyOutcome::Unchanged => tally.unchanged += 1,
        }
    }

    /// Number of objects created or patched
    pub fn writes(&self) -> u32 {
        self.families
            .values()
            .map(|t| t.created + t.updated)
            .sum()
    }
}

/// Conditions keyed by type, all computed for one generation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConditionSet {
    generation: Option<i64>,
    conditions: BTreeMap<String, Condition>,
}

/// Whether a condition was computed for an older generation
pub fn is_stale(condition: &Condition, generation: Option<i64>) -> bool {
    match (condition.observed_generation, generation) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(observed), Some(current)) => observed < current,
    }
}

impl ConditionSet {
    /// Read stored conditions for the current generation
    pub fn observe(conditions: &[Condition], generation: Option<i64>) -> Self {
        let mut set = Self {
            generation,
            conditions: BTreeMap::new(),
        };
        for condition in conditions {
            let mut condition = condition.clone();
            if is_stale(&condition, generation) && condition.type_ != AVAILABLE {
                condition = Condition::new(
                    condition.type_.clone(),
                    ConditionStatus::Unknown,
                    reasons::REINITIALIZED,
                    "the spec changed since this condition was computed",
                )
                .with_generation(generation);
            }
            set.conditions.insert(condition.type_.clone(), condition);
        }
        set
    }

    /// Condition of the given type
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.conditions.get(type_)
    }

    /// Whether a condition of the given type is `True`
    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Upsert a condition stamped with the current generation
    ///
    /// The transition time moves only when the status changes.
    pub fn set(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) {
        let mut next =
            Condition::new(type_, status, reason, message).with_generation(self.generation);
        if let Some(previous) = self.conditions.get(type_) {
            next.last_transition_time = if previous.status == next.status {
                previous.last_transition_time
            } else {
                Utc::now()
            };
        }
        self.conditions.insert(type_.to_string(), next);
    }

    /// Record the administrative flags
    pub fn set_operation_flags(&mut self, paused: bool, stopped: bool) {
        let flag = |on: bool| {
            if on {
                (ConditionStatus::True, reasons::REQUESTED)
            } else {
                (ConditionStatus::False, reasons::NOT_REQUESTED)
            }
        };
        let (status, reason) = flag(paused);
        self.set(
            RECONCILIATION_PAUSED,
            status,
            reason,
            if paused {
                "dependent resources are left untouched"
            } else {
                ""
            },
        );
        if !paused {
            let (status, reason) = flag(stopped);
            self.set(
                STOPPED,
                status,
                reason,
                if stopped { "workloads are scaled to zero" } else { "" },
            );
        }
    }

    /// Mark every family touched by this pass as applied
    ///
    /// With `complete`, families with nothing to apply are reported too.
    pub fn record_progress(&mut self, progress: &PassProgress, complete: bool) {
        for family in ResourceFamily::ALL {
            match progress.families.get(&family) {
                Some(tally) => self.set(
                    family.condition_type(),
                    ConditionStatus::True,
                    reasons::APPLIED,
                    tally.message(),
                ),
                None if complete && progress.failed != Some(family) => self.set(
                    family.condition_type(),
                    ConditionStatus::True,
                    reasons::NOT_REQUIRED,
                    "nothing to apply",
                ),
                None => {}
            }
        }
    }

    /// Every role group and the disruption budget converged
    pub fn converged(&mut self, progress: &PassProgress) {
        self.record_progress(progress, true);
        self.set(
            PROGRESSING,
            ConditionStatus::False,
            reasons::CONVERGED,
            "all dependent resources are up to date",
        );
        self.set(
            AVAILABLE,
            ConditionStatus::True,
            reasons::ALL_APPLIED,
            "every role group converged",
        );
    }

    /// The pass stopped early waiting on a dependency
    pub fn waiting(&mut self, progress: &PassProgress, reason: &str) {
        self.record_progress(progress, false);
        self.set(PROGRESSING, ConditionStatus::True, reasons::WAITING, reason);
    }

    /// The pass failed with a durable error
    ///
    /// Transient errors are not recorded here; see [`ConditionSet::escalate`].
    pub fn failed(&mut self, progress: &PassProgress, error: &Error) {
        let reason = match error.category() {
            ErrorCategory::Validation => reasons::VALIDATION_FAILED,
            ErrorCategory::Reference => reasons::REFERENCE_NOT_FOUND,
            ErrorCategory::Transient => return,
        };
        self.record_progress(progress, false);
        if let Some(family) = progress.failed {
            self.set(
                family.condition_type(),
                ConditionStatus::False,
                reason,
                error.to_string(),
            );
        }
        self.set(PROGRESSING, ConditionStatus::False, reason, error.to_string());
    }

    /// Transient failures reached the escalation threshold
    ///
    /// The failure count lives in `status.transientFailures` only, so repeated
    /// escalation with the same error leaves the condition as it was.
    pub fn escalate(&mut self, error: &Error) {
        self.set(
            PROGRESSING,
            ConditionStatus::False,
            reasons::TRANSIENT_FAILURE,
            format!("repeated transient failures, last: {error}"),
        );
    }

    /// Conditions in type order
    pub fn into_conditions(self) -> Vec<Condition> {
        self.conditions.into_values().collect()
    }
}

/// Status after a pass
pub fn next_status(conditions: ConditionSet, transient_failures: u32) -> SparkHistoryServerStatus {
    SparkHistoryServerStatus {
        conditions: conditions.into_conditions(),
        transient_failures,
    }
}
