//! Formatting helpers for CLI output.

use olm_oci_core::event::{EventEmitter, TransferAction};
use tokio::task::JoinHandle;

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Print one line per transfer event until every emitter clone is dropped.
///
/// With `quiet` only tag events are printed.
pub fn spawn_progress(events: &EventEmitter, quiet: bool) -> JoinHandle<()> {
    let mut stream = events.subscribe_filtered(move |e| !quiet || e.action == TransferAction::Tagged);
    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            println!("{event}");
        }
    })
}
