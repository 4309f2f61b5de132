//! Byte-size parsing/formatting and free disk space queries.
//!
//! Sizes use binary multiples: `1 KB = 1024 B`.

use std::io;
use std::path::Path;
use std::time::Duration;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Placeholder shown when no ETA can be computed.
pub const ETA_UNKNOWN: &str = "--:--:--";

/// Parses a human-entered size such as `"2 GB"`, `"1.5GiB"` or `"1024"`.
///
/// Returns `None` when the text is empty, negative or uses an unknown unit.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" | "BYTES" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        _ => return None,
    };

    let bytes = value * multiplier as f64;
    if bytes > u64::MAX as f64 {
        return None;
    }
    Some(bytes.round() as u64)
}

/// Formats a byte count, e.g. `1536` → `"1.50 KB"`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Formats a throughput in bytes per second.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_speed(bytes_per_second: f64) -> String {
    if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
        return format_bytes(0) + "/s";
    }
    format!("{}/s", format_bytes(bytes_per_second.round() as u64))
}

/// Formats a remaining time as `HH:MM:SS`, or [`ETA_UNKNOWN`].
#[must_use]
pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return ETA_UNKNOWN.to_string();
    };
    let secs = eta.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Free-space probe for the destination volume.
pub trait DiskSpace: Send + Sync {
    /// Bytes available to the current user on the volume holding `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when the volume cannot be queried.
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// [`DiskSpace`] backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiskSpace;

impl DiskSpace for SystemDiskSpace {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}
