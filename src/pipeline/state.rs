//! Item state machine and job status derivation.
//!
//! Everything here is pure so the legal-transition table and the job
//! aggregation rules can be tested without a queue or a store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::model::{ImportItem, ImportJob, ItemStatus, JobStatus};

/// A unit of queued work for one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Extract,
    Match,
    Create,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::Extract => "extract",
            Stage::Match => "match",
            Stage::Create => "create",
        }
    }

    /// Status an item carries while this stage runs
    pub fn working_status(&self) -> ItemStatus {
        match self {
            Stage::Parse => ItemStatus::Parsing,
            Stage::Extract => ItemStatus::Extracting,
            Stage::Match => ItemStatus::Matching,
            Stage::Create => ItemStatus::Approved,
        }
    }

    /// Status the item must hold for the stage to pick it up
    pub fn entry_status(&self) -> ItemStatus {
        match self {
            Stage::Parse => ItemStatus::Pending,
            Stage::Extract => ItemStatus::Parsing,
            Stage::Match => ItemStatus::Extracting,
            Stage::Create => ItemStatus::Approved,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `from -> to` is a legal item transition.
pub fn can_transition(from: ItemStatus, to: ItemStatus) -> bool {
    use ItemStatus::*;
    matches!(
        (from, to),
        (Pending, Parsing)
            | (Parsing, Extracting)
            | (Extracting, Matching)
            | (Matching, AwaitingReview)
            // all ingredients matched confidently
            | (Matching, Approved)
            | (AwaitingReview, Approved)
            | (Approved, Completed)
            | (Parsing | Extracting | Matching | Approved, Failed)
            | (Pending | Parsing | Extracting | Matching | AwaitingReview, Skipped)
            // manual retry
            | (Failed, Pending)
    )
}

/// Move `item` to `to`, rejecting illegal transitions.
pub fn transition(item: &mut ImportItem, to: ItemStatus) -> Result<(), ImportError> {
    if !can_transition(item.status, to) {
        return Err(ImportError::InvalidTransition {
            from: item.status,
            to,
        });
    }
    item.status = to;
    item.updated_at = Utc::now();
    Ok(())
}

/// Per-status item counts for one job, plus the summed item cost
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusCounts {
    by_status: BTreeMap<ItemStatus, usize>,
    pub ai_cost_cents: f64,
}

impl StatusCounts {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a ImportItem>) -> Self {
        let mut counts = StatusCounts::default();
        for item in items {
            *counts.by_status.entry(item.status).or_default() += 1;
            counts.ai_cost_cents += item.ai_cost_cents;
        }
        counts
    }

    pub fn get(&self, status: ItemStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.by_status.values().sum()
    }

    /// Items that have left automated processing
    pub fn processed(&self) -> usize {
        [
            ItemStatus::AwaitingReview,
            ItemStatus::Approved,
            ItemStatus::Completed,
            ItemStatus::Failed,
            ItemStatus::Skipped,
        ]
        .iter()
        .map(|s| self.get(*s))
        .sum()
    }
}

/// Job status as a function of its items.
///
/// `Cancelled` and `Failed` are sticky; everything else is recomputed.
pub fn derive_job_status(current: JobStatus, total_items: usize, counts: &StatusCounts) -> JobStatus {
    if matches!(current, JobStatus::Cancelled | JobStatus::Failed) {
        return current;
    }

    let finished = counts.get(ItemStatus::Completed)
        + counts.get(ItemStatus::Failed)
        + counts.get(ItemStatus::Skipped);
    if finished >= total_items {
        return JobStatus::Completed;
    }
    if counts.get(ItemStatus::AwaitingReview) > 0 {
        return JobStatus::AwaitingReview;
    }
    if counts.get(ItemStatus::Pending) == total_items {
        return JobStatus::Pending;
    }
    JobStatus::Processing
}

/// Rewrite the job's counters and status from its item counts.
pub fn apply_counts(job: &mut ImportJob, counts: &StatusCounts) {
    job.succeeded_items = counts.get(ItemStatus::Completed);
    job.failed_items = counts.get(ItemStatus::Failed);
    job.pending_review_items = counts.get(ItemStatus::AwaitingReview);
    job.skipped_items = counts.get(ItemStatus::Skipped);
    job.processed_items = counts.processed();
    job.total_ai_cost_cents = counts.ai_cost_cents;

    let status = derive_job_status(job.status, job.total_items, counts);
    let now = Utc::now();
    if status != JobStatus::Pending && job.started_at.is_none() {
        job.started_at = Some(now);
    }
    match status {
        JobStatus::Completed if job.completed_at.is_none() => job.completed_at = Some(now),
        // a retried item reopens the job
        JobStatus::Processing | JobStatus::AwaitingReview | JobStatus::Pending => {
            job.completed_at = None
        }
        _ => {}
    }
    job.status = status;
}
