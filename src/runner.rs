use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use indicatif::{ProgressBar, ProgressStyle};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::actions::ActionExecutor;
use crate::core::{
    Action, ActionResult, Disposition, ReportSummary, ResourceDescriptor, ScanRecord, ScanReport,
};
use crate::policy::PolicyEvaluator;
use crate::source::{ResourceSource, SourceUnavailable};

pub const REPORT_SCHEMA_VERSION: &str = "1";

pub struct RunOptions<'a> {
    pub dry_run: bool,
    /// The effect applied to ACT-classified resources this pass.
    pub action: Action,
    pub concurrency: usize,
    pub cancel: &'a AtomicBool,
    pub show_progress: bool,
}

/// One full pass: list every page, classify each descriptor against a single
/// reference instant, then run actions for the ACT set through a bounded
/// worker pool. Listing failures abort the pass; action failures are recorded
/// per resource and never stop the rest of the pass.
pub fn run(
    source: &mut dyn ResourceSource,
    policy: &PolicyEvaluator,
    executor: &dyn ActionExecutor,
    opts: &RunOptions<'_>,
) -> Result<ScanReport, SourceUnavailable> {
    let now = OffsetDateTime::now_utc();
    let scope = source.describe();

    let spinner = if opts.show_progress {
        let bar = ProgressBar::new_spinner().with_message(format!("listing {scope}"));
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Some(bar)
    } else {
        None
    };

    let mut records = Vec::new();
    let mut listing = Ok(());
    while let Some(page) = match source.next_page() {
        Ok(page) => page,
        Err(err) => {
            listing = Err(err);
            None
        }
    } {
        for resource in page {
            let classification = policy.classify(&resource, now);
            records.push(ScanRecord {
                resource,
                classification,
                action: None,
            });
        }
        if let Some(bar) = &spinner {
            bar.set_message(format!("listing {scope} ({} found)", records.len()));
        }
    }
    if let Some(bar) = &spinner {
        bar.finish_and_clear();
    }
    listing?;

    let jobs: Vec<(usize, ResourceDescriptor)> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.classification.disposition == Disposition::Act)
        .map(|(slot, r)| (slot, r.resource.clone()))
        .collect();

    let mut cancelled = false;
    if opts.dry_run {
        for (slot, _) in &jobs {
            records[*slot].action = Some(ActionResult::SkippedDryRun);
        }
    } else if !jobs.is_empty() {
        for (slot, result) in execute_jobs(&jobs, executor, opts) {
            records[slot].action = Some(result);
        }
        cancelled = opts.cancel.load(Ordering::SeqCst);
    }

    let mut notes = Vec::new();
    if opts.dry_run && !jobs.is_empty() {
        notes.push(format!(
            "dry run: {} action(s) skipped, re-run with --apply to execute",
            jobs.len()
        ));
    }
    if cancelled {
        notes.push("pass cancelled: in-flight actions finished, the rest were not attempted".to_string());
    }

    let generated_at = now
        .format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());

    let summary = ReportSummary::tally(&records, notes);
    Ok(ScanReport {
        schema_version: REPORT_SCHEMA_VERSION.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at,
        dry_run: opts.dry_run,
        scope,
        summary,
        records,
    })
}

/// Partition the ACT jobs across at most `concurrency` scoped workers. Each
/// worker pulls the next job off a shared cursor, collects its outcomes
/// locally, and the results are merged back by slot after the pool joins, so
/// report order stays discovery order.
fn execute_jobs(
    jobs: &[(usize, ResourceDescriptor)],
    executor: &dyn ActionExecutor,
    opts: &RunOptions<'_>,
) -> Vec<(usize, ActionResult)> {
    let workers = opts.concurrency.clamp(1, jobs.len());
    let cursor = AtomicUsize::new(0);

    let mut merged = Vec::with_capacity(jobs.len());
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let cursor = &cursor;
            handles.push(scope.spawn(move || {
                let mut local = Vec::new();
                loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some((slot, resource)) = jobs.get(index) else {
                        break;
                    };
                    // Cancellation stops new work; the action below, once
                    // started, always runs to completion.
                    let result = if opts.cancel.load(Ordering::SeqCst) {
                        ActionResult::failed("pass cancelled before the action was attempted")
                    } else {
                        match executor.apply(resource, opts.action) {
                            Ok(()) => ActionResult::Success,
                            Err(err) => ActionResult::failed(format!("{err:#}")),
                        }
                    };
                    local.push((*slot, result));
                }
                local
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(local) => merged.extend(local),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ResourceKind, ResourceStatus};
    use crate::policy::{Predicate, PolicyRule, RuleEffect};
    use anyhow::{Result, bail};
    use std::collections::BTreeMap;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeSource {
        pages: Vec<Vec<ResourceDescriptor>>,
        fail: bool,
    }

    impl FakeSource {
        fn new(pages: Vec<Vec<ResourceDescriptor>>) -> Self {
            Self { pages, fail: false }
        }
    }

    impl ResourceSource for FakeSource {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Volume
        }

        fn describe(&self) -> String {
            "fake volumes".to_string()
        }

        fn next_page(&mut self) -> Result<Option<Vec<ResourceDescriptor>>, SourceUnavailable> {
            if self.fail {
                return Err(SourceUnavailable::new("fake", "listing denied"));
            }
            if self.pages.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.pages.remove(0)))
            }
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        applied: Mutex<Vec<String>>,
        fail_ids: HashSet<String>,
    }

    impl ActionExecutor for RecordingExecutor {
        fn apply(&self, resource: &ResourceDescriptor, _action: Action) -> Result<()> {
            self.applied
                .lock()
                .expect("lock")
                .push(resource.id.clone());
            if self.fail_ids.contains(&resource.id) {
                bail!("provider rejected {}", resource.id);
            }
            Ok(())
        }
    }

    fn stopped_volume(id: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            id: id.to_string(),
            kind: ResourceKind::Volume,
            created: None,
            last_used: None,
            tags: BTreeMap::new(),
            status: ResourceStatus::Stopped,
            details: String::new(),
        }
    }

    fn active_volume(id: &str) -> ResourceDescriptor {
        let mut v = stopped_volume(id);
        v.status = ResourceStatus::Active;
        v
    }

    fn act_on_stopped() -> PolicyEvaluator {
        PolicyEvaluator::new(vec![PolicyRule::new(
            "stopped",
            Predicate::StatusIs {
                status: ResourceStatus::Stopped,
            },
            RuleEffect::Act,
            "volume is unattached",
        )])
        .expect("valid rules")
    }

    fn options<'a>(dry_run: bool, cancel: &'a AtomicBool) -> RunOptions<'a> {
        RunOptions {
            dry_run,
            action: Action::Delete,
            concurrency: 4,
            cancel,
            show_progress: false,
        }
    }

    #[test]
    fn dry_run_skips_every_action_and_never_touches_the_executor() {
        let mut source = FakeSource::new(vec![
            vec![stopped_volume("vol-1"), active_volume("vol-2")],
            vec![stopped_volume("vol-3")],
        ]);
        let executor = RecordingExecutor::default();
        let cancel = AtomicBool::new(false);

        let report = run(&mut source, &act_on_stopped(), &executor, &options(true, &cancel))
            .expect("pass completes");

        assert!(report.dry_run);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.acted, 2);
        assert_eq!(report.summary.skipped_dry_run, 2);
        assert_eq!(report.summary.succeeded, 0);
        assert!(executor.applied.lock().expect("lock").is_empty());
        assert_eq!(
            report.records[0].action,
            Some(ActionResult::SkippedDryRun)
        );
        assert_eq!(report.records[1].action, None);
    }

    #[test]
    fn keep_and_flag_resources_never_reach_the_executor() {
        let flag_policy = PolicyEvaluator::new(vec![PolicyRule::new(
            "stopped",
            Predicate::StatusIs {
                status: ResourceStatus::Stopped,
            },
            RuleEffect::Flag,
            "flag only",
        )])
        .expect("valid rules");
        let mut source = FakeSource::new(vec![vec![
            stopped_volume("vol-1"),
            active_volume("vol-2"),
        ]]);
        let executor = RecordingExecutor::default();
        let cancel = AtomicBool::new(false);

        let report = run(&mut source, &flag_policy, &executor, &options(false, &cancel))
            .expect("pass completes");

        assert_eq!(report.summary.flagged, 1);
        assert_eq!(report.summary.kept, 1);
        assert!(executor.applied.lock().expect("lock").is_empty());
        assert!(report.records.iter().all(|r| r.action.is_none()));
    }

    #[test]
    fn one_failed_action_does_not_stop_the_rest() {
        let resources: Vec<_> = (0..100).map(|i| stopped_volume(&format!("vol-{i}"))).collect();
        let mut source = FakeSource::new(vec![resources]);
        let executor = RecordingExecutor {
            fail_ids: HashSet::from(["vol-42".to_string()]),
            ..RecordingExecutor::default()
        };
        let cancel = AtomicBool::new(false);

        let report = run(&mut source, &act_on_stopped(), &executor, &options(false, &cancel))
            .expect("pass completes");

        assert_eq!(report.summary.total, 100);
        assert_eq!(report.summary.succeeded, 99);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(executor.applied.lock().expect("lock").len(), 100);

        let failed = report
            .records
            .iter()
            .find(|r| r.resource.id == "vol-42")
            .expect("record present");
        assert!(matches!(
            failed.action,
            Some(ActionResult::Failed { ref reason }) if reason.contains("vol-42")
        ));
    }

    #[test]
    fn listing_failure_aborts_the_pass() {
        let mut source = FakeSource::new(vec![]);
        source.fail = true;
        let executor = RecordingExecutor::default();
        let cancel = AtomicBool::new(false);

        let err = run(&mut source, &act_on_stopped(), &executor, &options(false, &cancel))
            .expect_err("listing failure is fatal");
        assert_eq!(err.source, "fake");
    }

    #[test]
    fn cancelled_pass_records_unstarted_jobs_as_failed() {
        let resources: Vec<_> = (0..10).map(|i| stopped_volume(&format!("vol-{i}"))).collect();
        let mut source = FakeSource::new(vec![resources]);
        let executor = RecordingExecutor::default();
        let cancel = AtomicBool::new(true);

        let report = run(&mut source, &act_on_stopped(), &executor, &options(false, &cancel))
            .expect("pass completes");

        assert_eq!(report.summary.failed, 10);
        assert_eq!(report.summary.succeeded, 0);
        assert!(executor.applied.lock().expect("lock").is_empty());
        assert!(report
            .summary
            .notes
            .iter()
            .any(|n| n.contains("cancelled")));
    }

    #[test]
    fn classifications_are_stable_across_repeated_dry_runs() {
        let cancel = AtomicBool::new(false);
        let executor = RecordingExecutor::default();

        let mut first_dispositions = Vec::new();
        for _ in 0..2 {
            let mut source = FakeSource::new(vec![vec![
                stopped_volume("vol-1"),
                active_volume("vol-2"),
            ]]);
            let report = run(
                &mut source,
                &act_on_stopped(),
                &executor,
                &options(true, &cancel),
            )
            .expect("pass completes");
            let dispositions: Vec<_> = report
                .records
                .iter()
                .map(|r| r.classification.disposition)
                .collect();
            if first_dispositions.is_empty() {
                first_dispositions = dispositions;
            } else {
                assert_eq!(first_dispositions, dispositions);
            }
        }
        assert!(executor.applied.lock().expect("lock").is_empty());
    }
}
