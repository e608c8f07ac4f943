//! CLI output formatting
//!
//! Everything here goes to stderr; stdout is reserved for the response JSON.

use crate::{core::ExecutionStatus, execution::ExecutionEvent};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a spinner shown while the toolkit runs
pub fn create_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let template = "{spinner:.green} [{elapsed_precise}] {msg}";
    if let Ok(style) = ProgressStyle::default_spinner().template(template) {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a run status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::PartiallyCompleted => style("PARTIALLY COMPLETED").yellow().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            format,
            subjects,
        } => format!(
            "{} Preprocessing {} {} subject(s) ({})",
            ROCKET,
            style(subjects).bold(),
            style(format).cyan(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::SubjectStarted { subject, index, total } => format!(
            "{} [{}/{}] {}",
            SPINNER,
            style(index + 1).cyan(),
            style(total).dim(),
            style(subject).bold()
        ),
        ExecutionEvent::ToolkitStarted { subject } => {
            format!("{} Running SPM12 for {}", INFO, style(subject).cyan())
        }
        ExecutionEvent::SubjectCompleted { subject, mean_fd } => format!(
            "{} {} (mean FD {} mm)",
            CHECK,
            style(subject).green(),
            style(format!("{:.3}", mean_fd)).dim()
        ),
        ExecutionEvent::SubjectFailed { subject, error } => {
            format!("{} {}: {}", CROSS, style(subject).red(), style(error).dim())
        }
        ExecutionEvent::RunCompleted { run_id, status } => format!(
            "{} Run ({}) {}",
            if *status == ExecutionStatus::Completed { INFO } else { WARN },
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    }
}

/// Renders engine events on stderr, with a spinner while SPM runs
#[derive(Default)]
pub struct EventRenderer {
    spinner: Mutex<Option<ProgressBar>>,
}

impl EventRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, event: &ExecutionEvent) {
        let Ok(mut spinner) = self.spinner.lock() else {
            return;
        };
        if let Some(active) = spinner.take() {
            active.finish_and_clear();
        }

        match event {
            ExecutionEvent::ToolkitStarted { subject } => {
                *spinner = Some(create_spinner(format!("SPM12 preprocessing {}", subject)));
            }
            _ => eprintln!("{}", format_execution_event(event)),
        }
    }
}
