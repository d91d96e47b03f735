use anyhow::Error;
use std::io::{self, Write};
use time::OffsetDateTime;
use unicode_width::UnicodeWidthChar;

use crate::core::{ActionResult, Disposition, ScanRecord, ScanReport};

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdin_is_tty: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "next:");
    let _ = writeln!(stderr, "  - see `opsweep --help` for commands and options");
}

pub fn print_report(report: &ScanReport, cfg: &UiConfig, now: OffsetDateTime) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let s = &report.summary;
    let mode = if report.dry_run { "dry run" } else { "apply" };
    let _ = writeln!(out, "scan: {} ({mode})", report.scope);
    let _ = writeln!(
        out,
        "summary: total={} kept={} flagged={} acted={} succeeded={} skipped={} failed={}",
        s.total, s.kept, s.flagged, s.acted, s.succeeded, s.skipped_dry_run, s.failed
    );
    for note in &s.notes {
        let _ = writeln!(out, "- {note}");
    }

    // KEEP rows are noise unless asked for.
    let interesting: Vec<&ScanRecord> = report
        .records
        .iter()
        .filter(|r| cfg.verbose || r.classification.disposition != Disposition::Keep)
        .collect();
    if interesting.is_empty() {
        let _ = writeln!(out, "\nnothing to show (all resources kept)");
        return;
    }

    let rows = cfg.max_table_rows.max(1).min(interesting.len());
    let _ = writeln!(out);
    if interesting.len() > rows {
        let _ = writeln!(out, "resources ({rows} shown / {} total):", interesting.len());
    } else {
        let _ = writeln!(out, "resources ({rows} shown):");
    }
    print_records_table(&mut out, &interesting, rows, cfg.color, now);
}

fn print_records_table(
    out: &mut dyn Write,
    records: &[&ScanRecord],
    rows: usize,
    color: bool,
    now: OffsetDateTime,
) {
    let label_resource = "RESOURCE";
    let label_kind = "KIND";
    let label_age = "AGE";
    let label_verdict = "VERDICT";
    let label_action = "ACTION";
    let label_reason = "REASON";

    let resource_w = records
        .iter()
        .take(rows)
        .map(|r| visible_width_ansi(&r.resource.id))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_resource));
    let kind_w = records
        .iter()
        .take(rows)
        .map(|r| visible_width_ansi(r.resource.kind.as_str()))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_kind));
    let age_w = visible_width_ansi(label_age).max(4);
    let verdict_w = visible_width_ansi(label_verdict).max(4);
    let action_w = records
        .iter()
        .take(rows)
        .map(|r| visible_width_ansi(&format_action(r.action.as_ref(), false)))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_action));

    let _ = writeln!(
        out,
        "{}  {}  {}  {}  {}  {}",
        pad_end_display(label_resource, resource_w),
        pad_end_display(label_kind, kind_w),
        pad_start_display(label_age, age_w),
        pad_end_display(label_verdict, verdict_w),
        pad_end_display(label_action, action_w),
        label_reason
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}  {}  {}",
        "-".repeat(resource_w),
        "-".repeat(kind_w),
        "-".repeat(age_w),
        "-".repeat(verdict_w),
        "-".repeat(action_w),
        "-".repeat(visible_width_ansi(label_reason))
    );

    for record in records.iter().take(rows) {
        let resource = pad_end_display(&record.resource.id, resource_w);
        let kind = pad_end_display(record.resource.kind.as_str(), kind_w);
        let age = pad_start_display(&format_age(record.resource.age_days(now)), age_w);
        let verdict = pad_end_ansi(
            &format_disposition(record.classification.disposition, color),
            verdict_w,
        );
        let action = pad_end_ansi(&format_action(record.action.as_ref(), color), action_w);
        let _ = writeln!(
            out,
            "{resource}  {kind}  {age}  {verdict}  {action}  {}",
            record.classification.reason
        );
    }
}

pub fn format_age(age_days: Option<f64>) -> String {
    match age_days {
        Some(days) if days >= 1.0 => format!("{}d", days as u64),
        Some(_) => "<1d".to_string(),
        None => "-".to_string(),
    }
}

fn format_disposition(disposition: Disposition, color: bool) -> String {
    let s = disposition.as_str();
    if !color {
        return s.to_string();
    }
    let code = match disposition {
        Disposition::Keep => "32",
        Disposition::Flag => "33",
        Disposition::Act => "31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn format_action(action: Option<&ActionResult>, color: bool) -> String {
    let Some(action) = action else {
        return "-".to_string();
    };
    let s = match action {
        ActionResult::Success => "SUCCESS",
        ActionResult::SkippedDryRun => "SKIPPED_DRY_RUN",
        ActionResult::Failed { .. } => "FAILED",
    };
    if !color {
        return s.to_string();
    }
    let code = if action.is_failed() { "31" } else { "32" };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if chars.peek() == Some(&'[') {
                let _ = chars.next();
                while let Some(ch2) = chars.next() {
                    if ch2 == 'm' {
                        break;
                    }
                }
                continue;
            }
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
