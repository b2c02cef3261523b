// SPDX-License-Identifier: GPL-3.0-only

//! Common utility types shared across models

use num_format::{Locale, ToFormattedString};

/// Absolute sector offset or sector count on a device.
pub type Sector = u64;

pub const KIBIBYTE: u64 = 1024;
pub const MEBIBYTE: u64 = 1024 * KIBIBYTE;
pub const GIBIBYTE: u64 = 1024 * MEBIBYTE;
pub const TEBIBYTE: u64 = 1024 * GIBIBYTE;

/// Number of whole sectors needed to hold `bytes` (rounded up).
pub fn sectors_for_bytes(bytes: u64, sector_size: u64) -> Sector {
    if sector_size == 0 {
        return 0;
    }
    bytes.div_ceil(sector_size)
}

/// Convert bytes to human-readable format (e.g., "1.50 GiB")
pub fn format_bytes(bytes: u64) -> String {
    let mut steps = 0;
    let mut val: f64 = bytes as f64;

    while val >= 1024. && steps < 5 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => return format!("{} B", bytes),
        1 => "KiB",
        2 => "MiB",
        3 => "GiB",
        4 => "TiB",
        _ => "PiB",
    };

    format!("{:.2} {}", val, unit)
}

/// Exact byte count with thousands separators (e.g., "1,048,576 B")
pub fn format_bytes_exact(bytes: u64) -> String {
    format!("{} B", bytes.to_formatted_string(&Locale::en))
}

/// Human-readable size of a sector count.
pub fn format_size(sectors: Sector, sector_size: u64) -> String {
    format_bytes(sectors.saturating_mul(sector_size))
}
