//! Resource transfer progress display with progress bars.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use peerwire_core::{ResourceProgress, ResourceStatus};
use std::time::Duration;
use tokio::sync::watch;

const BAR_TEMPLATE: &str = "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Progress bar following one outgoing resource transfer
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Add a bar for `snapshot`'s transfer to `bars`
    #[must_use]
    pub fn new(bars: &MultiProgress, snapshot: &ResourceProgress) -> Self {
        let bar = bars.add(ProgressBar::new(snapshot.bytes_total));

        bar.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message(format!(
            "Sending {} to {}",
            snapshot.resource_name, snapshot.peer
        ));

        Self { bar }
    }

    /// Follow `progress` until the transfer finishes; returns the final status
    pub async fn track(&self, mut progress: watch::Receiver<ResourceProgress>) -> ResourceStatus {
        loop {
            let snapshot = progress.borrow_and_update().clone();
            self.bar.set_length(snapshot.bytes_total);
            self.bar.set_position(snapshot.bytes_done);

            if snapshot.is_finished() {
                match snapshot.status {
                    ResourceStatus::Complete => self.bar.finish_with_message(format!(
                        "Sent {} ({}) to {}",
                        snapshot.resource_name,
                        format_bytes(snapshot.bytes_total),
                        snapshot.peer
                    )),
                    _ => self.bar.abandon_with_message(format!(
                        "Failed to send {} to {}",
                        snapshot.resource_name, snapshot.peer
                    )),
                }
                return snapshot.status;
            }

            if progress.changed().await.is_err() {
                self.bar.abandon();
                return snapshot.status;
            }
        }
    }
}

/// Format bytes in human-readable format
///
/// # Example
///
/// ```ignore
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();

    if secs == 0 {
        format!("{millis}ms")
    } else if secs < 60 {
        format!("{}.{:01}s", secs, duration.subsec_millis() / 100)
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
