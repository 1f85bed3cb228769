//! Output formatting for CLI commands.

use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Output format selection.
#[derive(Clone, Copy)]
pub enum Format {
    Table,
    Json,
}

impl From<crate::OutputFormat> for Format {
    fn from(f: crate::OutputFormat) -> Self {
        match f {
            crate::OutputFormat::Table => Format::Table,
            crate::OutputFormat::Json => Format::Json,
        }
    }
}

/// Print data as pretty JSON.
pub fn print_json<T: Serialize>(data: &T, quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("{}", serde_json::to_string_pretty(data)?);
    }
    Ok(())
}

/// Create a styled table with consistent formatting.
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
    table
}

/// Add a header row to a table.
pub fn add_header(table: &mut Table, headers: &[&str]) {
    table.set_header(
        headers
            .iter()
            .map(|h| Cell::new(h).fg(Color::Cyan))
            .collect::<Vec<_>>(),
    );
}

/// Print a key-value table (for summary displays).
pub fn print_key_value_table(items: &[(&str, String)], quiet: bool) {
    if quiet {
        return;
    }
    let mut table = create_table();
    add_header(&mut table, &["Property", "Value"]);
    for (key, value) in items {
        table.add_row(vec![Cell::new(key).fg(Color::Green), Cell::new(value)]);
    }
    println!("{table}");
}

/// Format bytes as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes == u64::MAX {
        "unlimited".to_string()
    } else if bytes >= GB {
        format!("{:.2} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

/// Print a status message (respects quiet mode).
pub fn status(msg: &str, quiet: bool) {
    if !quiet {
        println!("{msg}");
    }
}

/// Print a success message.
pub fn success(msg: &str, quiet: bool) {
    if !quiet {
        println!("✓ {msg}");
    }
}

/// Print a warning message.
pub fn warning(msg: &str) {
    eprintln!("✗ {msg}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(32 << 20), "32.00 MiB");
        assert_eq!(format_bytes(3 << 30), "3.00 GiB");
        assert_eq!(format_bytes(u64::MAX), "unlimited");
    }
}
