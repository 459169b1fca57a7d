//! Terminal rendering of a run's progress stream.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use trove_core::{EventKind, LogSource, ProgressEvent};

/// Spinner with completed stages and container logs printed above it
pub struct ProgressView {
    bar: ProgressBar,
    show_logs: bool,
}

impl ProgressView {
    /// New view; container logs are echoed when `show_logs`
    pub fn new(show_logs: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        let spinner = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");
        bar.set_style(spinner);
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar, show_logs }
    }

    /// Render one event
    pub fn show(&self, event: &ProgressEvent) {
        match &event.kind {
            EventKind::StageStarted { .. } => self.bar.set_message(event.to_string()),
            EventKind::StageCompleted { state } => {
                self.bar.println(format!("{} {state}", style("✓").green()));
            }
            EventKind::Log { source, line } if self.show_logs => {
                let tag = match source {
                    LogSource::Build => "build",
                    LogSource::Run => "run",
                };
                self.bar
                    .println(format!("{} {}", style(format!("[{tag}]")).dim(), line));
            }
            EventKind::Log { .. } => {}
            EventKind::Note { message } => self.bar.println(style(message).dim().to_string()),
            EventKind::Completed { .. } => {
                self.bar.finish_and_clear();
                println!("{}", style(event.to_string()).green().bold());
            }
            EventKind::Failed { .. } => {
                self.bar.finish_and_clear();
                eprintln!("{}", style(event.to_string()).red().bold());
            }
        }
    }
}
