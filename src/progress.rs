//! Terminal progress for the client CLI
//!
//! Uploads know their file count up front and get a bar; downloads do not
//! and get a spinner. Both print a one-line summary when done.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

use crate::protocol::timeouts::PROGRESS_TICK_MS;

pub struct UploadProgress {
    bar: ProgressBar,
    start_time: Instant,
}

impl UploadProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(PROGRESS_TICK_MS));
        Self {
            bar,
            start_time: Instant::now(),
        }
    }

    /// Matches the upload callback: `(index from 1, count, relative path)`
    pub fn file(&self, index: usize, count: usize, path: &str) {
        self.bar.set_length(count as u64);
        self.bar.set_position(index.saturating_sub(1) as u64);
        self.bar.set_message(path.to_string());
    }

    pub fn finish(&self, files: u64, bytes: u64) {
        self.bar.set_position(files);
        self.bar
            .finish_with_message(summary(files, bytes, self.start_time.elapsed()));
    }

    pub fn abandon(&self, msg: &str) {
        self.bar.abandon_with_message(format!("failed: {msg}"));
    }
}

pub struct DownloadSpinner {
    spinner: ProgressBar,
    files: u64,
    start_time: Instant,
}

impl DownloadSpinner {
    pub fn new(quiet: bool) -> Self {
        let spinner = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {pos} files {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(PROGRESS_TICK_MS));
        Self {
            spinner,
            files: 0,
            start_time: Instant::now(),
        }
    }

    pub fn file(&mut self, path: &str) {
        self.files += 1;
        self.spinner.set_position(self.files);
        self.spinner.set_message(path.to_string());
    }

    pub fn files(&self) -> u64 {
        self.files
    }

    pub fn finish(&self, msg: &str) {
        self.spinner.finish_with_message(format!(
            "{} files into {msg} in {:.1}s",
            self.files,
            self.start_time.elapsed().as_secs_f64()
        ));
    }

    pub fn abandon(&self, msg: &str) {
        self.spinner.abandon_with_message(format!("failed: {msg}"));
    }
}

/// Human-readable size, binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn summary(files: u64, bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.1 {
        format!(" ({}/s)", format_bytes((bytes as f64 / secs) as u64))
    } else {
        String::new()
    };
    format!("{files} files, {} in {secs:.1}s{rate}", format_bytes(bytes))
}
