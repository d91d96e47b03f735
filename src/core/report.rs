use serde::{Deserialize, Serialize};

use crate::core::{ActionResult, Classification, Disposition, ResourceDescriptor};

/// One resource's trip through the pass: discovered, classified, and (when
/// classified ACT) the outcome of its single action attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub resource: ResourceDescriptor,
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: u64,
    pub kept: u64,
    pub flagged: u64,
    pub acted: u64,
    pub succeeded: u64,
    pub skipped_dry_run: u64,
    pub failed: u64,
    pub notes: Vec<String>,
}

impl ReportSummary {
    pub fn tally(records: &[ScanRecord], notes: Vec<String>) -> Self {
        let mut summary = Self {
            total: records.len() as u64,
            kept: 0,
            flagged: 0,
            acted: 0,
            succeeded: 0,
            skipped_dry_run: 0,
            failed: 0,
            notes,
        };
        for record in records {
            match record.classification.disposition {
                Disposition::Keep => summary.kept += 1,
                Disposition::Flag => summary.flagged += 1,
                Disposition::Act => summary.acted += 1,
            }
            match record.action {
                Some(ActionResult::Success) => summary.succeeded += 1,
                Some(ActionResult::SkippedDryRun) => summary.skipped_dry_run += 1,
                Some(ActionResult::Failed { .. }) => summary.failed += 1,
                None => {}
            }
        }
        summary
    }
}

/// Aggregated result of one scan pass, in discovery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub schema_version: String,
    pub tool_version: String,
    pub generated_at: String,
    pub dry_run: bool,
    pub scope: String,
    pub summary: ReportSummary,
    pub records: Vec<ScanRecord>,
}
