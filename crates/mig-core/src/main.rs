use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mig_client::{CallClient, SessionGuard};
use mig_core::{
    ArtifactStore, BatchDescriptor, BulkCoordinator, BulkRun, ConfigError, GitTransfer, MigrationConfig, MigrationUnit,
    Orchestrator, SourceRef, UnitIntent,
};
use mig_preflight::DestinationRef;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_UNIT_FAILED: i32 = 1;
const EXIT_CONFIG: i32 = 2;

fn cli() -> Command {
    Command::new("mig")
        .version(mig_core::VERSION)
        .about("Project migration orchestrator")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .default_value("mig.toml")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log every request attempt"),
        )
        .subcommand(
            Command::new("preflight")
                .about("Validate one project without changing anything")
                .arg(Arg::new("source").required(true).help("Source project path (group/project)"))
                .arg(
                    Arg::new("destination")
                        .required(true)
                        .help("Destination <project>/<repository>"),
                )
                .arg(
                    Arg::new("replace")
                        .long("replace")
                        .action(ArgAction::SetTrue)
                        .help("Allow replacing a destination repository with history"),
                )
                .arg(
                    Arg::new("sync")
                        .long("sync")
                        .action(ArgAction::SetTrue)
                        .help("Allow pushing onto a destination repository with history"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Run or resume a batch")
                .arg(
                    Arg::new("batch")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Batch descriptor (JSON)"),
                )
                .arg(
                    Arg::new("stop-on-first-failure")
                        .long("stop-on-first-failure")
                        .action(ArgAction::SetTrue)
                        .help("Do not start further units after a failure"),
                )
                .arg(
                    Arg::new("max-parallel")
                        .long("max-parallel")
                        .value_parser(value_parser!(usize))
                        .help("Units to run concurrently"),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Show the stored batch state")
                .arg(
                    Arg::new("artifacts")
                        .value_parser(value_parser!(PathBuf))
                        .help("Artifacts directory (defaults to the configured one)"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    let code = match execute(&matches).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("error: {e:#}");
            if e.downcast_ref::<ConfigError>().is_some() {
                EXIT_CONFIG
            } else {
                EXIT_UNIT_FAILED
            }
        }
    };
    std::process::exit(code);
}

async fn execute(matches: &ArgMatches) -> anyhow::Result<i32> {
    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("mig.toml"));

    match matches.subcommand() {
        Some(("status", args)) => {
            let dir = match args.get_one::<PathBuf>("artifacts") {
                Some(dir) => dir.clone(),
                None => MigrationConfig::load(&config_path)?.artifacts_dir,
            };
            status(&dir)
        }
        Some(("preflight", args)) => {
            let config = load_config(&config_path, matches.get_flag("verbose"))?;
            let source = args.get_one::<String>("source").cloned().unwrap_or_default();
            let destination = parse_destination(args.get_one::<String>("destination").map_or("", String::as_str))?;
            let intent = UnitIntent {
                force: false,
                replace: args.get_flag("replace"),
                sync: args.get_flag("sync"),
            };

            let (orchestrator, guard) = orchestrator(&config, CancellationToken::new())?;
            let mut unit = MigrationUnit::new(SourceRef::new(source), destination, intent);
            let report = orchestrator.preflight(&mut unit).await?;
            drop(guard);

            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.passed { EXIT_OK } else { EXIT_UNIT_FAILED })
        }
        Some(("run", args)) => {
            let mut config = load_config(&config_path, matches.get_flag("verbose"))?;
            if args.get_flag("stop-on-first-failure") {
                config.bulk.stop_on_first_failure = true;
            }
            if let Some(parallel) = args.get_one::<usize>("max-parallel") {
                config.bulk.max_parallel = (*parallel).max(1);
            }
            let batch_path = args.get_one::<PathBuf>("batch").cloned().unwrap_or_default();
            let batch = BatchDescriptor::load(&batch_path)
                .with_context(|| format!("loading batch {}", batch_path.display()))?;

            let cancel = CancellationToken::new();
            let signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received; finishing the current step");
                    signal.cancel();
                }
            });

            let (orchestrator, guard) = orchestrator(&config, cancel)?;
            let run = BulkCoordinator::new(Arc::new(orchestrator), config.bulk)
                .run_descriptor(&batch)
                .await;
            drop(guard);
            let run = run?;

            print_run(&run);
            Ok(if run.all_succeeded() { EXIT_OK } else { EXIT_UNIT_FAILED })
        }
        _ => Ok(EXIT_CONFIG),
    }
}

fn load_config(path: &Path, verbose: bool) -> Result<MigrationConfig, ConfigError> {
    let mut config = MigrationConfig::load(path)?;
    config.verbose |= verbose;
    Ok(config)
}

fn orchestrator(config: &MigrationConfig, cancel: CancellationToken) -> anyhow::Result<(Orchestrator, SessionGuard)> {
    let session = Arc::new(config.session()?);
    let guard = SessionGuard::new(session.clone());
    let client = CallClient::with_reqwest(session)?;
    let orchestrator = Orchestrator::new(
        client,
        Arc::new(GitTransfer::new(config.cache_dir())),
        ArtifactStore::new(&config.artifacts_dir),
    )
    .with_governance(config.governance.clone())
    .with_oversize_threshold(config.preflight.oversize_threshold_bytes)
    .with_cancellation(cancel);
    Ok((orchestrator, guard))
}

fn parse_destination(raw: &str) -> Result<DestinationRef, ConfigError> {
    match raw.split_once('/') {
        Some((project, repository)) if !project.is_empty() && !repository.is_empty() => {
            Ok(DestinationRef::new(project, repository))
        }
        _ => Err(ConfigError::Invalid(format!(
            "destination '{raw}' must be <project>/<repository>"
        ))),
    }
}

fn status(dir: &Path) -> anyhow::Result<i32> {
    let store = ArtifactStore::new(dir);
    let Some(run) = store.load_bulk_run()? else {
        println!("No batch state in {}", dir.display());
        return Ok(EXIT_OK);
    };
    print_run(&run);
    for unit in &run.units {
        println!("  {:<40} {:<12} {}", unit.id, unit.status.to_string(), unit.source);
    }
    Ok(if run.all_succeeded() { EXIT_OK } else { EXIT_UNIT_FAILED })
}

fn print_run(run: &BulkRun) {
    let c = &run.counters;
    println!("Batch {}:", run.run_id);
    println!("  Total: {}", c.total);
    println!("  Succeeded: {} ({} from earlier runs)", c.succeeded, c.resumed);
    println!("  Failed: {}", c.failed);
    println!("  Blocked: {}", c.blocked);
    println!("  Skipped: {}", c.skipped);
    println!("  Elapsed: {}ms", run.elapsed_ms);
    for failure in &run.failures {
        let step = failure.step.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        println!("  ! {} [{}] at {}: {}", failure.unit_id, failure.status, step, failure.reason);
    }
}
