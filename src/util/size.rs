//! Size helper functions.
//!
//! Device memory is addressed with `u64`, so these work in `u64` too.

/// Convert kilobytes to bytes.
#[inline]
pub const fn kb(n: u64) -> u64 {
    n * 1024
}

/// Convert megabytes to bytes.
#[inline]
pub const fn mb(n: u64) -> u64 {
    n * 1024 * 1024
}

/// Convert gigabytes to bytes.
#[inline]
pub const fn gb(n: u64) -> u64 {
    n * 1024 * 1024 * 1024
}

/// Format bytes as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
