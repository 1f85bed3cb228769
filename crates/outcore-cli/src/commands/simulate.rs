//! Simulated allocation workload.
//!
//! Allocates buffers against a [`SimulatedMemoryMonitor`], fills each with a
//! distinct byte, reads everything back (restoring what the policy dumped)
//! and reports what the manager did.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use comfy_table::Cell;
use indicatif::{ProgressBar, ProgressStyle};
use outcore::{
    AllocationPolicy, BufferInfo, BufferManager, BufferManagerConfig, BufferObject, BufferStats,
    SimulatedMemoryMonitor, SweepReport,
};
use serde::Serialize;

use crate::output::{self, Format};
use crate::{OutputFormat, SimulateArgs};

/// Simulation result output.
#[derive(Serialize)]
struct SimulateOutput {
    config: BufferManagerConfig,
    policy_params: Vec<(&'static str, String)>,
    capacity_bytes: u64,
    buffer_count: usize,
    buffer_size_bytes: u64,
    verified: usize,
    mismatched: usize,
    elapsed_ms: u128,
    stats: BufferStats,
    last_sweep: Option<SweepReport>,
    buffers: Vec<BufferInfo>,
}

fn fill_byte(index: usize) -> u8 {
    (index as u8) ^ 0x5A
}

fn progress(len: usize, quiet: bool, prefix: &'static str) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(len as u64);
    bar.set_style(ProgressStyle::with_template(
        "{prefix:>9} [{bar:40}] {pos}/{len} ({elapsed})",
    )?);
    bar.set_prefix(prefix);
    Ok(bar)
}

/// Run the simulate command.
pub fn run(
    mut config: BufferManagerConfig,
    args: SimulateArgs,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if let Some(dir) = args.dump_dir {
        config.dump_dir = Some(dir);
    }
    let size = usize::try_from(args.size.as_u64()).context("buffer size does not fit in memory")?;
    let policy = if args.aligned {
        AllocationPolicy::PageAligned
    } else {
        AllocationPolicy::Heap
    };

    let monitor = Arc::new(SimulatedMemoryMonitor::new(args.capacity.as_u64()));
    let manager = BufferManager::new(config, monitor)?;
    for param in &args.params {
        let Some((name, value)) = param.split_once('=') else {
            bail!("expected NAME=VALUE, got {param:?}");
        };
        manager.set_policy_param(name.trim(), value.trim())?;
    }
    output::status(
        &format!(
            "Simulating {} x {} against {} with the {} policy",
            args.count,
            output::format_bytes(args.size.as_u64()),
            output::format_bytes(args.capacity.as_u64()),
            manager.policy_name()
        ),
        quiet || matches!(format, OutputFormat::Json),
    );

    let start = Instant::now();
    let bar = progress(args.count, quiet, "allocate")?;
    let mut buffers = Vec::with_capacity(args.count);
    for index in 0..args.count {
        let buffer = BufferObject::new(&manager);
        buffer.allocate(size, policy)?;
        buffer.write()?.fill(fill_byte(index));
        buffers.push(buffer);
        bar.inc(1);
    }
    bar.finish_and_clear();

    let bar = progress(args.count, quiet, "verify")?;
    let mut verified = 0;
    for (index, buffer) in buffers.iter().enumerate() {
        let guard = buffer.read()?;
        if guard.iter().all(|&b| b == fill_byte(index)) {
            verified += 1;
        } else {
            output::warning(&format!("buffer {} content mismatch", buffer.id()));
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    let elapsed = start.elapsed();

    let result = SimulateOutput {
        policy_params: manager.policy_params(),
        capacity_bytes: args.capacity.as_u64(),
        buffer_count: args.count,
        buffer_size_bytes: args.size.as_u64(),
        verified,
        mismatched: args.count - verified,
        elapsed_ms: elapsed.as_millis(),
        stats: manager.stats(),
        last_sweep: manager.last_sweep(),
        buffers: manager.buffer_infos(),
        config: manager.config(),
    };
    drop(buffers);
    manager.shutdown();

    match Format::from(format) {
        Format::Json => output::print_json(&result, quiet)?,
        Format::Table => print_tables(&result, quiet),
    }

    if result.mismatched > 0 {
        bail!("{} buffer(s) failed verification", result.mismatched);
    }
    output::success(
        &format!("Verified {} buffer(s) in {:.2?}", result.verified, elapsed),
        quiet || matches!(format, OutputFormat::Json),
    );
    Ok(())
}

fn print_tables(result: &SimulateOutput, quiet: bool) {
    if quiet {
        return;
    }
    let mut table = output::create_table();
    output::add_header(
        &mut table,
        &["Id", "Size", "State", "Policy", "Evictable", "Last access"],
    );
    for info in &result.buffers {
        table.add_row(vec![
            Cell::new(info.id),
            Cell::new(output::format_bytes(info.size as u64)),
            Cell::new(info.state),
            Cell::new(info.policy),
            Cell::new(info.evictable),
            Cell::new(info.last_access),
        ]);
    }
    println!("{table}");

    let stats = &result.stats;
    let mut items = vec![
        ("Policy", result.config.policy.to_string()),
        ("Managed", output::format_bytes(stats.managed_bytes)),
        ("Resident", output::format_bytes(stats.resident_bytes)),
        ("Dumped", output::format_bytes(stats.dumped_bytes)),
        ("Dumps", stats.dump_count.to_string()),
        ("Restores", stats.restore_count.to_string()),
        ("Dump failures", stats.dump_failures.to_string()),
    ];
    for (name, value) in &result.policy_params {
        items.push((*name, value.clone()));
    }
    if let Some(sweep) = &result.last_sweep {
        items.push(("Last sweep", sweep.trigger.to_string()));
        items.push(("Last sweep freed", output::format_bytes(sweep.freed_bytes)));
    }
    output::print_key_value_table(&items, quiet);
}
