//! Utility functions

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Directory name of slice `index` inside a dataset directory
pub fn slice_dir_name(index: usize) -> String {
    format!("slice{:06}", index)
}

/// Slice index of a slice directory name, `None` for anything else
pub fn parse_slice_dir_name(name: &str) -> Option<usize> {
    name.strip_prefix("slice")
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
}

/// Path of one tile file relative to its slice directory
pub fn tile_path(band: usize, row: usize, col: usize) -> String {
    format!("tiles/b{}/r{:05}_c{:05}.tile", band, row, col)
}
