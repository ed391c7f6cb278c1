//! Terminal progress display for the CLI.

use indicatif::{ProgressBar, ProgressStyle};

/// Percent-driven progress bar for one transfer.
///
/// The transfer layer reports whole percentages rather than byte counts, so
/// the bar runs 0..=100 and the byte size goes in the message.
#[derive(Clone)]
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    pub fn new(verb: &str, filename: &str, size: u64) -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(format!("{verb} {filename} ({})", format_bytes(size)));
        Self { bar }
    }

    /// Bar for an incoming file. Zero-byte transfers never complete on the
    /// receiving side, so they get no bar.
    pub fn receiving(filename: &str, size: u64) -> Option<Self> {
        (size > 0).then(|| Self::new("Receiving", filename, size))
    }

    pub fn set_percent(&self, percent: u8) {
        self.bar.set_position(u64::from(percent.min(100)));
    }

    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Leave the bar where it stopped (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}
