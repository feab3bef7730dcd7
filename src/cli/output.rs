//! CLI output formatting

use crate::{
    core::{Pipeline, PipelineRun, RunStatus},
    execution::{ExecutionEvent, StepPreview},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏰ ", "@ ");

/// Create a progress bar over the steps of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(bar_style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Horizontal rule as wide as the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    "─".repeat(width)
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// One line per stored pipeline
pub fn format_pipeline(pipeline: &Pipeline) -> String {
    let last_run = pipeline
        .last_run
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "{} - {} step(s) - {} - last triggered {}",
        style(&pipeline.name).bold(),
        style(pipeline.steps.len()).cyan(),
        style(pipeline.schedule.to_string()).dim(),
        style(last_run).dim()
    )
}

/// One line per run
pub fn format_run_summary(run: &PipelineRun) -> String {
    let status_icon = match run.status {
        RunStatus::Completed => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Pending => INFO,
    };

    let duration = run
        .duration()
        .and_then(|d| d.to_std().ok())
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{} {} - {} - {} - {}",
        status_icon,
        style(short_id(&run.id)).dim(),
        style(run.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        format_status(run.status),
        style(duration).cyan()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            total_steps,
        } => Some(format!(
            "{} Starting pipeline {} ({}, {} steps)",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(run_id)).dim(),
            total_steps
        )),
        ExecutionEvent::StepStarted {
            order,
            name,
            step_type,
            ..
        } => Some(format!(
            "{} [{}] {} {}",
            SPINNER,
            order,
            style(name).cyan(),
            style(format!("({})", step_type)).dim()
        )),
        ExecutionEvent::StepCompleted { order, name, .. } => {
            Some(format!("{} [{}] {}", CHECK, order, style(name).green()))
        }
        ExecutionEvent::StepFailed {
            order, name, error, ..
        } => Some(format!(
            "{} [{}] {}: {}",
            CROSS,
            order,
            style(name).red(),
            style(error).dim()
        )),
        // Log lines are echoed only in verbose mode
        ExecutionEvent::Log { .. } => None,
        ExecutionEvent::RunFinished { run_id, status } => Some(format!(
            "{} Run {} {}",
            INFO,
            style(short_id(run_id)).dim(),
            format_status(*status)
        )),
    }
}

/// Render a step preview for the terminal
pub fn format_preview(preview: &StepPreview) -> String {
    match preview {
        StepPreview::Table { rows, columns, data } => {
            let mut out = format!(
                "{} {} rows x {} columns\n",
                INFO,
                style(rows).cyan(),
                style(columns.len()).cyan()
            );
            out.push_str(&format!("  {}\n", style(columns.join(" | ")).bold()));
            for record in data {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|c| format_cell(record.get(c).unwrap_or(&Value::Null)))
                    .collect();
                out.push_str(&format!("  {}\n", cells.join(" | ")));
            }
            if *rows > data.len() {
                out.push_str(&format!("  {}\n", style(format!("... ({} more rows)", rows - data.len())).dim()));
            }
            out
        }
        StepPreview::Summary {
            message,
            run_id,
            model_type,
        } => format!(
            "{} {}\n  Model: {}\n  Run ID: {}\n",
            CHECK,
            message,
            style(model_type).bold(),
            style(run_id.as_deref().unwrap_or("-")).dim()
        ),
        StepPreview::Text { message } => format!("{} {}\n", CHECK, message),
    }
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
