//! Terminal progress for a single upload or download
//!
//! The transfer layer reports integer percentages; this turns them into an
//! indicatif bar with a crossterm-styled summary line at the end.

use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

use crate::model::format_size;

pub struct TransferProgress {
    bar: ProgressBar,
    start_time: Instant,
    last: u8,
}

impl TransferProgress {
    pub fn new(verb: &str, name: &str) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.green.bold} {msg} [{bar:30.cyan/blue}] {pos:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix(verb.to_string());
        bar.set_message(name.to_string());
        Self {
            bar,
            start_time: Instant::now(),
            last: 0,
        }
    }

    /// No terminal output; for scripts and `--quiet`.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            start_time: Instant::now(),
            last: 0,
        }
    }

    pub fn update(&mut self, percent: u8) {
        let percent = percent.min(100);
        if percent != self.last {
            self.last = percent;
            self.bar.set_position(u64::from(percent));
        }
    }

    pub fn percent(&self) -> u8 {
        self.last
    }

    pub fn finish_success(&self, bytes: u64) {
        let secs = self.start_time.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            format!(" ({}/s)", format_size((bytes as f64 / secs) as u64))
        } else {
            String::new()
        };
        self.bar.finish_and_clear();
        if !self.bar.is_hidden() {
            println!(
                "{} {} in {:.1}s{}",
                "Done".with(Color::Green).bold(),
                format_size(bytes),
                secs,
                rate
            );
        }
    }

    pub fn finish_error(&self, msg: &str) {
        self.bar.abandon();
        eprintln!("{} {}", "Failed".with(Color::Red).bold(), msg);
    }
}
