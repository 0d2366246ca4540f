//! valkey-groups CLI
//!
//! Registers every group from a groups file, bootstraps the registry and
//! checks each selected group with a leased PING.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use valkey_groups::client::PoolStats;
use valkey_groups::config::{CliArgs, GroupsFile, TopologyKind};
use valkey_groups::{CommandsExt, ProviderRegistry};

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // RUST_LOG wins over the flags when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_ascii_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

#[derive(Debug, Serialize)]
struct GroupReport {
    requested: String,
    group: String,
    kind: TopologyKind,
    endpoints: Vec<String>,
    is_default: bool,
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    pool: PoolStats,
}

fn print_report(report: &GroupReport) {
    let status = if report.reachable { "OK" } else { "FAILED" };
    let alias = if report.requested != report.group {
        format!(" (requested '{}')", report.requested)
    } else {
        String::new()
    };

    println!(
        "[{}] {}{}{} - {}",
        status,
        report.group,
        if report.is_default { " [default]" } else { "" },
        alias,
        report.kind
    );
    println!("    endpoints: {}", report.endpoints.join(", "));
    if let Some(ref e) = report.error {
        println!("    error:     {}", e);
    }
    println!(
        "    pool:      {} idle / {} active / {} max, {} created, {} destroyed",
        report.pool.idle,
        report.pool.active,
        report.pool.max_total,
        report.pool.created,
        report.pool.destroyed
    );
}

fn run() -> Result<()> {
    let args = CliArgs::parse_args();
    setup_logging(args.verbose, args.quiet);

    let file = GroupsFile::load(&args.config)
        .with_context(|| format!("Failed to load groups from {}", args.config.display()))?;
    if file.groups.is_empty() {
        bail!("No groups defined in {}", args.config.display());
    }

    let registry = ProviderRegistry::global();
    for settings in file.groups {
        registry
            .register_settings(settings)
            .context("Invalid group configuration")?;
    }
    registry.finalize_and_ready();

    let default_name = registry
        .default_provider()
        .context("Bootstrap failed")?
        .group_name()
        .to_string();

    let selected = if args.groups.is_empty() {
        registry.group_names()?
    } else {
        args.groups.clone()
    };

    let mut reports = Vec::with_capacity(selected.len());
    for requested in selected {
        let provider = registry.resolve(&requested)?;
        let ping = provider.with_connection(|conn| conn.ping());

        let (reachable, error) = match ping {
            Ok(true) => (true, None),
            Ok(false) => (false, Some("unexpected PING reply".to_string())),
            Err(e) => {
                warn!(group = %provider.group_name(), error = %e, "Group check failed");
                (false, Some(e.to_string()))
            }
        };

        reports.push(GroupReport {
            requested,
            group: provider.group_name().to_string(),
            kind: provider.topology_kind(),
            endpoints: provider
                .config()
                .endpoints()
                .iter()
                .map(|e| e.to_string())
                .collect(),
            is_default: provider.group_name() == default_name,
            reachable,
            error,
            pool: provider.pool_stats(),
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    registry.shutdown();

    let failed = reports.iter().filter(|r| !r.reachable).count();
    if failed > 0 {
        bail!("{} of {} groups unreachable", failed, reports.len());
    }

    info!(groups = reports.len(), "All groups reachable");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
