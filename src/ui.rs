//! Terminal output for the CLI: a spinner while waiting on a job, and
//! colored one-line summaries.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use jobrelay::api::StatusResponse;
use jobrelay::state_machine::JobState;

/// Spinner shown by `jobrelay wait` while it polls a job.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    pub fn start(job_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("waiting for {job_id}"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Show the latest polled status.
    pub fn update(&self, status: &StatusResponse) {
        self.pb.set_message(format!(
            "{} {}",
            self.yellow.apply_to(status.state),
            status.status
        ));
    }

    /// Stop the spinner and print the terminal outcome.
    pub fn complete(&self, status: &StatusResponse) {
        self.pb.finish_and_clear();
        match status.state {
            JobState::Success => {
                println!("  {} {}", self.green.apply_to("✓"), status.status);
                if let Some(url) = &status.result_file {
                    println!("    result: {url}");
                }
            }
            JobState::Failure => println!("  {} Job failed: {}", self.red.apply_to("✗"), status.status),
            other => println!("  {} {other}: {}", self.yellow.apply_to("…"), status.status),
        }
    }
}

/// Pretty JSON for anything the CLI prints on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A styled warning on stderr.
pub fn warn(message: &str) {
    eprintln!("{} {message}", Style::new().yellow().bold().apply_to("warning:"));
}
