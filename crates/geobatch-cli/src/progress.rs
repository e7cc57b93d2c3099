use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner for indeterminate progress
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Finish a progress bar with success message
pub fn finish_success(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✓ {}", message));
}

/// Finish a progress bar with error message
pub fn finish_error(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✗ {}", message));
}

/// Progress tracker for batch runs; hidden in JSON mode
pub struct RunProgress {
    _multi: MultiProgress,
    pub load: ProgressBar,
    pub layers: ProgressBar,
    pub batch: ProgressBar,
}

impl RunProgress {
    pub fn new(hidden: bool) -> Self {
        let multi = MultiProgress::new();
        let spinner = |message: &str| {
            if hidden {
                ProgressBar::hidden()
            } else {
                multi.add(create_spinner(message))
            }
        };

        let load = spinner("Loading plots...");
        let layers = spinner("Composing layers...");
        let batch = spinner("Waiting to start batch...");

        Self { _multi: multi, load, layers, batch }
    }

    pub fn finish_load(&self, plots: usize, file_size_mb: f64) {
        finish_success(&self.load, &format!("Loaded {} plots ({:.2} MB)", plots, file_size_mb));
    }

    pub fn finish_layers(&self, bands: usize, failures: usize) {
        if failures == 0 {
            finish_success(&self.layers, &format!("Composed {} bands", bands));
        } else {
            finish_success(
                &self.layers,
                &format!("Composed {} bands ({} layers skipped)", bands, failures),
            );
        }
    }

    pub fn start_batch(&self, mode: &str) {
        self.batch.set_message(format!("Running batch in {} mode...", mode));
    }

    pub fn finish_batch(&self, succeeded: usize, total: usize) {
        finish_success(&self.batch, &format!("{} of {} plots have statistics", succeeded, total));
    }

    pub fn fail_batch(&self, reason: &str) {
        finish_error(&self.batch, reason);
    }
}
