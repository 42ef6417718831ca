//! SimVar CLI Application
//!
//! Command-line front end for the simvar-sync library. It adds:
//! - TOML configuration and command-line overrides
//! - Binding of the simulator client library (or an in-memory simulation)
//! - Printing of tracked values after every batch
//! - Ctrl-C handling and a final JSON snapshot

use anyhow::{Context, Result};
use clap::Parser;
use simvar_sync::{
    stop_signal, CallbackListener, LoopbackSession, ReissuePolicy, Scheduler, Session,
    SyncConfig, VariableRegistry, VariableSpec,
};
use std::path::PathBuf;
use std::sync::Arc;

mod config;
mod native;

use config::AppConfig;
use native::NativeSession;

/// SimVar CLI - Mirror simulation variables from a running simulator
#[derive(Parser, Debug)]
#[command(name = "simvar-cli")]
#[command(about = "Poll simulation variables from a running simulator", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Extra directory searched first for SimConnect.dll
    #[arg(long, value_name = "DIR")]
    library_path: Option<PathBuf>,

    /// Client name announced to the simulator
    #[arg(short, long)]
    name: Option<String>,

    /// Variable to track (can be repeated), e.g. "PLANE ALTITUDE,feet,float64"
    #[arg(long = "var", value_name = "NAME,UNIT,TYPE", value_parser = config::parse_variable)]
    vars: Vec<VariableSpec>,

    /// Value to write once connected (can be repeated), e.g. "PLANE ALTITUDE,feet,float64=4500"
    #[arg(long = "set", value_name = "NAME,UNIT,TYPE=VALUE", value_parser = config::parse_assignment)]
    sets: Vec<config::Assignment>,

    /// Request cadence in milliseconds
    #[arg(long, value_name = "MS")]
    request_interval_ms: Option<u64>,

    /// Drain cadence in milliseconds
    #[arg(long, value_name = "MS")]
    drain_interval_ms: Option<u64>,

    /// Reissue requests still unanswered after this many milliseconds
    #[arg(long, value_name = "MS", conflicts_with = "no_reissue")]
    pending_timeout_ms: Option<u64>,

    /// Never reissue an unanswered request
    #[arg(long)]
    no_reissue: bool,

    /// Run against an in-memory simulation instead of the simulator
    #[arg(long)]
    simulate: bool,

    /// Print the final registry snapshot as JSON
    #[arg(long)]
    snapshot_json: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("SimVar CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using sync library v{}", simvar_sync::VERSION);

    let app_config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    let sync = build_sync_config(&args, &app_config)?;
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| app_config.session.name.clone());

    let session: Box<dyn Session> = if args.simulate {
        log::info!("Simulating: no simulator will be contacted");
        Box::new(LoopbackSession::new())
    } else {
        let library_dir = args
            .library_path
            .clone()
            .or_else(|| app_config.session.library_path.clone());
        let native = NativeSession::load(library_dir.as_deref())
            .context("Failed to load the simulator client library (use --simulate to run without it)")?;
        Box::new(native)
    };

    let registry = Arc::new(VariableRegistry::new());
    let printed = Arc::clone(&registry);
    let listener = CallbackListener::new()
        .with_open(|open| {
            println!(
                "Connected to {} {} (build {})",
                open.app_name, open.app_version, open.app_build
            )
        })
        .with_quit(|| println!("Simulator quit."))
        .with_exception(|code| log::warn!("Simulator exception (code: {})", code))
        .with_registration_failure(|define_id, e| {
            log::warn!("Define id {} not registered yet: {}", define_id, e)
        })
        .with_batch_ready(move || print_values(&printed));

    let mut scheduler = Scheduler::new(session, Arc::clone(&registry), sync)
        .context("Invalid sync configuration")?
        .with_listener(listener);
    scheduler
        .open(&name)
        .with_context(|| format!("Failed to open session as '{}'", name))?;

    for assignment in &args.sets {
        let spec = &assignment.spec;
        scheduler
            .set_variable(&spec.name, &spec.unit, spec.data_type, &assignment.value)
            .with_context(|| format!("Failed to write '{}'", spec.name))?;
        log::info!("Wrote {} = {}", spec.name, assignment.value);
    }

    let (stop, signal) = stop_signal();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Received Ctrl+C, shutting down...");
                ctrl_c.stop();
            }
            Err(e) => log::warn!("Ctrl+C handler unavailable: {}", e),
        }
    });

    let result = scheduler.run(signal).await;
    drop(stop);

    if let Err(e) = scheduler.close() {
        log::debug!("Session close: {}", e);
    }

    if args.snapshot_json {
        let snapshot = registry.snapshot();
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?
        );
    }

    let exit = result.context("Poll loop failed")?;
    log::info!("Done ({:?})", exit);
    Ok(())
}

/// Merge file configuration with command-line overrides
fn build_sync_config(args: &Args, app_config: &AppConfig) -> Result<SyncConfig> {
    let mut sync = app_config.sync_config();

    if let Some(ms) = args.request_interval_ms {
        sync.request_interval_ms = ms;
    }
    if let Some(ms) = args.drain_interval_ms {
        sync.drain_interval_ms = ms;
    }
    if args.no_reissue {
        sync.reissue = ReissuePolicy::Never;
    } else if let Some(timeout_ms) = args.pending_timeout_ms {
        sync.reissue = ReissuePolicy::AfterTimeout { timeout_ms };
    }

    sync.variables.extend(args.vars.iter().cloned());
    if sync.variables.is_empty() {
        log::info!("No variables configured, watching the default set");
        sync.variables = config::default_variables();
    }

    sync.validate()?;
    Ok(sync)
}

fn print_values(registry: &VariableRegistry) {
    println!("───────────────────────────────────────────────");
    for variable in registry.snapshot() {
        let value = variable
            .value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<36} {:>24} {}",
            variable.name(),
            value,
            variable.definition.unit
        );
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use simvar_sync::DataType;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_flags_override_file_config() {
        let args = Args::parse_from([
            "simvar-cli",
            "--request-interval-ms",
            "100",
            "--pending-timeout-ms",
            "3000",
            "--var",
            "PLANE ALTITUDE,feet,float64",
        ]);
        let app_config = AppConfig::default();

        let sync = build_sync_config(&args, &app_config).unwrap();
        assert_eq!(sync.request_interval_ms, 100);
        assert_eq!(sync.drain_interval_ms, 1);
        assert_eq!(sync.reissue, ReissuePolicy::AfterTimeout { timeout_ms: 3000 });
        assert_eq!(sync.variables.len(), 1);
        assert_eq!(sync.variables[0].data_type, DataType::Float64);
    }

    #[test]
    fn test_default_variables_when_none_configured() {
        let args = Args::parse_from(["simvar-cli", "--simulate", "--no-reissue"]);
        let sync = build_sync_config(&args, &AppConfig::default()).unwrap();
        assert_eq!(sync.reissue, ReissuePolicy::Never);
        assert_eq!(sync.variables, config::default_variables());
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = Args::parse_from(["simvar-cli", "--drain-interval-ms", "0"]);
        assert!(build_sync_config(&args, &AppConfig::default()).is_err());
    }

    #[test]
    fn test_set_flag_parses_assignments() {
        let args = Args::parse_from([
            "simvar-cli",
            "--simulate",
            "--set",
            "PLANE ALTITUDE,feet,float64=4500",
            "--set",
            "TITLE,,string256=Cessna",
        ]);
        assert_eq!(args.sets.len(), 2);
        assert_eq!(args.sets[0].value, simvar_sync::Value::Float64(4500.0));
        assert_eq!(args.sets[1].spec.data_type, DataType::String256);
    }

    #[test]
    fn test_oversized_pending_timeout_is_rejected() {
        let args = Args::parse_from(["simvar-cli", "--pending-timeout-ms", "18446744073709551615"]);
        assert!(build_sync_config(&args, &AppConfig::default()).is_err());
    }

    #[test]
    fn test_conflicting_reissue_flags() {
        let result = Args::try_parse_from(["simvar-cli", "--no-reissue", "--pending-timeout-ms", "5"]);
        assert!(result.is_err());
    }
}
