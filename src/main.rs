//! storage-proposal - plans the storage layout of a fresh installation
//!
//! Reads a scenario (probed disks, system facts and proposal settings) and
//! prints the proposed devicegraph, the actions on existing devices and the
//! issues found on the way.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeSet;
use storage_proposal::devicegraph::device::{Device, Sid};
use storage_proposal::space::PlannedAction;
use storage_proposal::{DeviceGraph, ProposalResult, Scenario};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "storage-proposal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a storage proposal for a scenario
    Propose {
        /// Path to the scenario file
        scenario: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a scenario file
    Validate {
        /// Path to the scenario file
        scenario: String,
    },

    /// Generate a sample scenario file
    GenerateConfig {
        /// Output path for the scenario file
        #[arg(short, long, default_value = "storage-proposal.toml")]
        output: String,
    },

    /// Show the probed devices of a scenario
    Show {
        /// Path to the scenario file
        scenario: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Propose { scenario, json } => {
            cmd_propose(&scenario, json)?;
        }
        Commands::Validate { scenario } => {
            cmd_validate(&scenario)?;
        }
        Commands::GenerateConfig { output } => {
            cmd_generate_config(&output)?;
        }
        Commands::Show { scenario } => {
            cmd_show(&scenario)?;
        }
    }

    Ok(())
}

fn cmd_propose(path: &str, json: bool) -> Result<()> {
    let scenario = Scenario::from_file(path)?;
    scenario.validate()?;

    let result = scenario.propose()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result_json(&result))?);
    } else {
        print_result(&result);
    }

    if result.failed {
        anyhow::bail!("no valid storage proposal found after {} attempt(s)", result.attempts);
    }
    Ok(())
}

fn cmd_validate(path: &str) -> Result<()> {
    let scenario = Scenario::from_file(path)?;
    scenario.validate()?;
    println!("✓ Scenario is valid");
    Ok(())
}

fn cmd_generate_config(output: &str) -> Result<()> {
    Scenario::sample().save(output)?;
    println!("✓ Sample scenario written to {}", output);
    Ok(())
}

fn cmd_show(path: &str) -> Result<()> {
    let scenario = Scenario::from_file(path)?;
    let probed = scenario.probed()?;
    info!("{} device(s) probed", probed.len());
    print_tree(&probed);
    Ok(())
}

fn result_json(result: &ProposalResult) -> serde_json::Value {
    serde_json::json!({
        "failed": result.failed,
        "attempts": result.attempts,
        "variant": result.variant,
        "target": result.target,
        "actions": result.actions,
        "issues": result.issues,
        "devices": result.devices.as_ref().map(|g| g.description()),
    })
}

fn print_result(result: &ProposalResult) {
    if let Some(graph) = &result.devices {
        println!(
            "{} after {} attempt(s)",
            "✓ Proposal found".green().bold(),
            result.attempts
        );
        if let (Some(variant), Some(target)) = (&result.variant, result.target) {
            println!("  settings: {}, {} sizes", variant, target);
        }
        println!();
        print_tree(graph);
    } else {
        println!("{}", "✗ No proposal found".red().bold());
    }

    if !result.actions.is_empty() {
        println!();
        println!("{}", "Actions on existing devices:".bold());
        for action in &result.actions {
            match action {
                PlannedAction::Delete { name, .. } => println!("  {} {}", "delete".red(), name),
                PlannedAction::Shrink {
                    name,
                    old_size,
                    new_size,
                    ..
                } => println!("  {} {} from {} to {}", "shrink".yellow(), name, old_size, new_size),
                PlannedAction::Keep { name, .. } => println!("  {} {}", "keep".green(), name),
            }
        }
    }

    if !result.issues.is_empty() {
        println!();
        println!("{}", "Issues:".bold());
        for issue in result.issues.iter() {
            println!("  {}", issue);
        }
    }
}

fn print_tree(graph: &DeviceGraph) {
    let mut seen = BTreeSet::new();
    for disk in graph.disks() {
        print_device(graph, disk, 0, &mut seen);
    }
}

fn print_device(graph: &DeviceGraph, sid: Sid, depth: usize, seen: &mut BTreeSet<Sid>) {
    let Some(device) = graph.device(sid) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let repeated = !seen.insert(sid);

    let line = match device {
        Device::Filesystem(fs) => {
            let mount = graph
                .mount_point_of(sid)
                .and_then(|m| match graph.device(m) {
                    Some(Device::MountPoint(mp)) => Some(format!(" on {} (by {})", mp.path, mp.mount_by)),
                    _ => None,
                })
                .unwrap_or_default();
            format!("{}{}", fs.fs_type.to_string().cyan(), mount)
        }
        Device::MountPoint(_) => return,
        _ => format!(
            "{:<24} {:>12}  {}",
            graph.display_name(sid).bold(),
            graph.blk_size(sid).to_string(),
            kind_label(device)
        ),
    };
    if repeated {
        println!("{}{} {}", indent, line, "(see above)".dimmed());
        return;
    }
    println!("{}{}", indent, line);

    for child in graph.children(sid) {
        print_device(graph, child, depth + 1, seen);
    }
}

fn kind_label(device: &Device) -> String {
    match device {
        Device::Disk(d) => match d.ptable {
            Some(ptable) => format!("disk, {}", ptable),
            None => "disk".to_string(),
        },
        Device::Partition(p) => format!("partition, {:?}", p.id),
        Device::Md(md) => format!("md, {:?}", md.level),
        Device::LvmPv(_) => "lvm pv".to_string(),
        Device::LvmVg(_) => "volume group".to_string(),
        Device::LvmLv(_) => "logical volume".to_string(),
        Device::Bcache(_) => "bcache".to_string(),
        Device::Encryption(enc) => format!("encryption, {}", enc.method),
        Device::Filesystem(_) | Device::MountPoint(_) => String::new(),
    }
}
