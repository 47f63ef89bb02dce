//! Terminal rendering for the CLI: progress bar and status lines.

use crate::audio::{AudioFormat, AudioSignal};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

/// Progress display for one shift, scaled 0–100.
///
/// The bar is cleared on drop so an aborted run never leaves a stale
/// "processing" line behind.
pub struct ShiftProgress {
    bar: ProgressBar,
}

impl ShiftProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr())
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:10} [{bar:40.cyan/blue}] {pos:>3}%")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message("studying");
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// Moves the bar to `value` (0–100).
    pub fn update(&self, value: f32) {
        let position = value.clamp(0.0, 100.0).round() as u64;
        if position >= 50 {
            self.bar.set_message("processing");
        }
        self.bar.set_position(position);
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}

impl Drop for ShiftProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

/// Human-readable duration such as `1:02.500`.
pub fn format_duration(secs: f64) -> String {
    let secs = secs.max(0.0);
    let minutes = (secs / 60.0).floor() as u64;
    format!("{}:{:06.3}", minutes, secs - minutes as f64 * 60.0)
}

pub fn render_signal_info(label: &str, format: AudioFormat, signal: &AudioSignal) {
    println!("{}", label.bold());
    println!("  {}    {}", "Format:".dimmed(), format);
    println!("  {}  {}", "Channels:".dimmed(), signal.channel_count());
    println!("  {}      {} Hz", "Rate:".dimmed(), signal.sample_rate());
    println!(
        "  {}  {} ({} frames)",
        "Duration:".dimmed(),
        format_duration(signal.duration_secs()),
        signal.frames()
    );
    println!("  {}      {:.3}", "Peak:".dimmed(), signal.peak());
}

pub fn render_success(message: &str) {
    eprintln!("{} {}", "✓".green(), message);
}

pub fn render_warning(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message);
}

pub fn render_error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}
