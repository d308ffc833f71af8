//! Emulated driver version identity

/// Numeric driver version reported by VERSION (8.02)
pub const DRIVER_VERSION: u64 = 802;

/// Capacity of the version string field, including the terminating NUL
pub const VERSION_STRING_LEN: usize = 128;

/// Identifying string reported by VERSION
pub fn version_string() -> String {
    format!("wdshim {}", env!("CARGO_PKG_VERSION"))
}

/// Copy `text` into a fixed-size C string field, truncating and NUL-terminating
pub fn fill_c_string(field: &mut [u8], text: &str) {
    field.fill(0);
    if field.is_empty() {
        return;
    }
    let len = text.len().min(field.len() - 1);
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
}

/// Read a NUL-terminated string out of a fixed-size field
pub fn read_c_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
