use std::collections::BTreeMap;

use opsweep::core::{
    ActionResult, Classification, Disposition, ReportSummary, ResourceDescriptor, ResourceKind,
    ResourceStatus, ScanRecord, ScanReport,
};
use time::macros::datetime;

#[test]
fn report_json_matches_golden() {
    let mut tags = BTreeMap::new();
    tags.insert("image/dangling".to_string(), "true".to_string());
    tags.insert("image/reference".to_string(), "<none>:<none>".to_string());

    let report = ScanReport {
        schema_version: "1".to_string(),
        tool_version: "0.1.0".to_string(),
        generated_at: "2026-01-01T00:00:00Z".to_string(),
        dry_run: true,
        scope: "docker images (local daemon)".to_string(),
        summary: ReportSummary {
            total: 1,
            kept: 0,
            flagged: 0,
            acted: 1,
            succeeded: 0,
            skipped_dry_run: 1,
            failed: 0,
            notes: vec![
                "dry run: 1 action(s) skipped, re-run with --apply to execute".to_string(),
            ],
        },
        records: vec![ScanRecord {
            resource: ResourceDescriptor {
                id: "sha256:0abc".to_string(),
                kind: ResourceKind::Image,
                created: Some(datetime!(2025-11-01 00:00:00 UTC)),
                last_used: None,
                tags,
                status: ResourceStatus::Unknown,
                details: "dangling, 45MB".to_string(),
            },
            classification: Classification {
                disposition: Disposition::Act,
                reason: "dangling image".to_string(),
                rule_id: Some("dangling".to_string()),
            },
            action: Some(ActionResult::SkippedDryRun),
        }],
    };

    let actual = serde_json::to_value(&report).expect("serialize report");
    let expected: serde_json::Value =
        serde_json::from_str(include_str!("golden/report.json")).expect("parse golden json");

    assert_eq!(actual, expected);
}
