//! Human-readable output for outcomes and summaries.

use console::style;
use orchestrator::{AggregateSummary, ExecutionOutcome, LogLevel};
use std::fmt::Write;

pub fn outcome(outcome: &ExecutionOutcome) -> String {
    let mut out = String::new();
    let header = if outcome.success {
        style("✓ success").green().bold()
    } else if outcome.timed_out {
        style("⏱ timeout").yellow().bold()
    } else {
        style("✗ failed").red().bold()
    };
    let _ = writeln!(
        out,
        "{} {} {}",
        header,
        style(&outcome.request_id).dim(),
        style(format!(
            "({} ms, {} attempt{})",
            outcome.duration_ms,
            outcome.attempt_count,
            if outcome.attempt_count == 1 { "" } else { "s" }
        ))
        .dim()
    );

    for log in &outcome.logs {
        let line = match log.level {
            LogLevel::Error => style(&log.message).red(),
            LogLevel::Warn => style(&log.message).yellow(),
            LogLevel::Info | LogLevel::Debug => style(&log.message),
        };
        let _ = writeln!(out, "  │ {line}");
    }

    if let Some(value) = &outcome.value {
        let _ = writeln!(out, "  = {value}");
    }

    if let Some(error) = &outcome.error {
        let _ = writeln!(out, "  {}: {}", style(&error.name).red(), error.message);
    }

    if let Some(classification) = &outcome.classification {
        let _ = writeln!(
            out,
            "  type: {} ({:?}, {:?}){}",
            style(classification.error_type.as_str()).cyan(),
            classification.category,
            classification.severity,
            if classification.is_fallback() {
                style(" unclassified").magenta().to_string()
            } else {
                String::new()
            }
        );
    }

    if let Some(hints) = &outcome.recovery {
        for (kind, ids) in &hints.valid_entities {
            let _ = writeln!(out, "  valid {kind}: {}", ids.join(", "));
        }
        for (kind, ids) in &hints.removed_traces {
            let _ = writeln!(out, "  removed {kind}: {}", ids.join(", "));
        }
        for suggestion in &hints.suggestions {
            let _ = writeln!(out, "  hint: {suggestion}");
        }
    }

    out
}

pub fn summary(summary: &AggregateSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", style("Summary").bold());
    let _ = writeln!(
        out,
        "  total {}  ok {}  failed {}  timeouts {}  retries {}  success {:.0}%",
        summary.total,
        style(summary.successful).green(),
        style(summary.failed).red(),
        summary.timeouts,
        summary.retries,
        summary.success_rate * 100.0
    );
    if summary.duration_ms.count > 0 {
        let _ = writeln!(
            out,
            "  duration mean {:.0} ms  p95 {:.0} ms  max {:.0} ms",
            summary.duration_ms.mean, summary.duration_ms.p95, summary.duration_ms.max
        );
    }
    for (error_type, count) in &summary.errors_by_type {
        let _ = writeln!(out, "  {}: {count}", style(error_type.as_str()).cyan());
    }
    out
}
