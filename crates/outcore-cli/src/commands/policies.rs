//! Eviction policy listing.

use anyhow::Result;
use comfy_table::Cell;
use outcore::{BufferManagerConfig, POLICY_NAMES, Trigger, policy_from_name};
use serde::Serialize;

use crate::OutputFormat;
use crate::output::{self, Format};

const AUTOMATIC_TRIGGERS: [Trigger; 4] = [
    Trigger::Allocate,
    Trigger::Reallocate,
    Trigger::Restore,
    Trigger::Unlock,
];

/// One policy, with parameters as configured.
#[derive(Serialize)]
struct PolicyOutput {
    name: &'static str,
    active: bool,
    reacts_to: Vec<Trigger>,
    params: Vec<ParamOutput>,
}

#[derive(Serialize)]
struct ParamOutput {
    name: &'static str,
    value: String,
}

/// Run the policies command.
pub fn run(config: &BufferManagerConfig, format: OutputFormat, quiet: bool) -> Result<()> {
    let policies = POLICY_NAMES
        .iter()
        .map(|&name| {
            let policy = policy_from_name(name, config)?;
            let params = policy
                .param_names()
                .iter()
                .map(|&param| ParamOutput {
                    name: param,
                    value: policy.param(param).unwrap_or_default(),
                })
                .collect();
            Ok(PolicyOutput {
                name: policy.name(),
                active: config.policy.as_str() == name,
                reacts_to: AUTOMATIC_TRIGGERS
                    .into_iter()
                    .filter(|&trigger| policy.reacts_to(trigger))
                    .collect(),
                params,
            })
        })
        .collect::<outcore::Result<Vec<_>>>()?;

    match Format::from(format) {
        Format::Json => output::print_json(&policies, quiet)?,
        Format::Table => {
            if quiet {
                return Ok(());
            }
            let mut table = output::create_table();
            output::add_header(&mut table, &["Policy", "Active", "Reacts to", "Parameters"]);
            for policy in &policies {
                let triggers: Vec<&str> = policy.reacts_to.iter().map(|t| t.as_str()).collect();
                let params: Vec<String> = policy
                    .params
                    .iter()
                    .map(|p| format!("{}={}", p.name, p.value))
                    .collect();
                table.add_row(vec![
                    Cell::new(policy.name),
                    Cell::new(if policy.active { "*" } else { "" }),
                    Cell::new(triggers.join(", ")),
                    Cell::new(params.join("\n")),
                ]);
            }
            println!("{table}");
        }
    }

    Ok(())
}
