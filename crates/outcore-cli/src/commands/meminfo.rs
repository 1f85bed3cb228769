//! System memory command.

use anyhow::Result;
use outcore::{MemInfo, MemoryMonitor, SystemMemoryMonitor};
use serde::Serialize;

use crate::OutputFormat;
use crate::output::{self, Format};

/// Memory figures as seen by the eviction policies.
#[derive(Serialize)]
struct MeminfoOutput {
    monitor: &'static str,
    total_bytes: u64,
    free_estimate_bytes: u64,
    kernel: Option<MemInfo>,
}

/// Run the meminfo command.
pub fn run(format: OutputFormat, quiet: bool) -> Result<()> {
    let monitor = SystemMemoryMonitor::new();
    let output = MeminfoOutput {
        monitor: monitor.name(),
        total_bytes: monitor.total_memory(),
        free_estimate_bytes: monitor.free_memory(0),
        kernel: monitor.snapshot(),
    };

    match Format::from(format) {
        Format::Json => output::print_json(&output, quiet)?,
        Format::Table => {
            let mut items = vec![
                ("Monitor", output.monitor.to_string()),
                ("Total", output::format_bytes(output.total_bytes)),
                ("Free (estimate)", output::format_bytes(output.free_estimate_bytes)),
            ];
            match &output.kernel {
                Some(info) => items.extend([
                    ("MemFree", output::format_bytes(info.free)),
                    (
                        "MemAvailable",
                        info.available
                            .map_or_else(|| "(not reported)".to_string(), output::format_bytes),
                    ),
                    ("Cached", output::format_bytes(info.cached)),
                    ("Buffers", output::format_bytes(info.buffers)),
                    ("SwapTotal", output::format_bytes(info.swap_total)),
                    ("SwapFree", output::format_bytes(info.swap_free)),
                ]),
                None => output::warning(
                    "kernel memory counters unavailable; pressure-driven policies will not dump",
                ),
            }
            output::print_key_value_table(&items, quiet);
        }
    }

    Ok(())
}
