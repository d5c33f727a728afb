use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rollout_connect::{Credentials, HttpControlPlane, SshExecutor};
use rollout_core::{InventoryError, RolloutConfig, RolloutError};
use rollout_kernel::{abort_pair, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let shared = [
        Arg::new("target-version")
            .long("target-version")
            .value_name("VERSION")
            .help("OS version every host should end on"),
        Arg::new("worker-batch-size")
            .long("worker-batch-size")
            .value_name("N")
            .value_parser(value_parser!(usize))
            .help("Workers upgraded per batch (default: derived from fleet size)"),
        Arg::new("cp-user")
            .long("cp-user")
            .env("ROLLOUT_CP_USER")
            .help("Control-plane user"),
        Arg::new("cp-password")
            .long("cp-password")
            .env("ROLLOUT_CP_PASSWORD")
            .hide_env_values(true)
            .help("Control-plane password"),
    ];

    Command::new("rollout")
        .version(rollout_kernel::VERSION)
        .about("Rolling OS upgrades across a cluster fleet")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .value_parser(["pretty", "json"])
                .default_value("pretty")
                .help("Log output format (stderr)"),
        )
        .subcommand(
            Command::new("plan")
                .about("Resolve inventory, show batches and run pre-validation; changes nothing")
                .args(shared.clone()),
        )
        .subcommand(
            Command::new("apply")
                .about("Run the full upgrade pipeline")
                .args(shared)
                .arg(
                    Arg::new("rollback")
                        .long("rollback")
                        .action(ArgAction::SetTrue)
                        .help("Restart services this run stopped if it halts"),
                )
                .arg(
                    Arg::new("continue-on-host-failure")
                        .long("continue-on-host-failure")
                        .action(ArgAction::SetTrue)
                        .help("Keep launching batches after a host fails"),
                )
                .arg(
                    Arg::new("report-dir")
                        .long("report-dir")
                        .value_name("DIR")
                        .value_parser(value_parser!(PathBuf))
                        .help("Where to write the run report"),
                ),
        )
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<RolloutConfig, RolloutError> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => RolloutConfig::load(path)?,
        None => RolloutConfig::new(),
    };
    if let Some(version) = matches.get_one::<String>("target-version") {
        config.target_version = Some(version.clone());
    }
    if let Some(size) = matches.get_one::<usize>("worker-batch-size") {
        config.batch.worker_batch_size = Some(*size);
    }
    if matches.try_contains_id("rollback").unwrap_or(false) && matches.get_flag("rollback") {
        config.rollback_enabled = true;
    }
    if matches.try_contains_id("continue-on-host-failure").unwrap_or(false)
        && matches.get_flag("continue-on-host-failure")
    {
        config.batch.continue_on_host_failure = true;
    }
    if let Ok(Some(dir)) = matches.try_get_one::<PathBuf>("report-dir") {
        config.report_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn credentials(matches: &ArgMatches) -> Option<Credentials> {
    let user = matches.get_one::<String>("cp-user")?;
    let password = matches
        .get_one::<String>("cp-password")
        .cloned()
        .unwrap_or_default();
    Some(Credentials {
        user: user.clone(),
        password,
    })
}

fn orchestrator(config: RolloutConfig, matches: &ArgMatches) -> Result<Orchestrator, RolloutError> {
    let control_plane = HttpControlPlane::new(&config.control_plane, credentials(matches))
        .map_err(|e| RolloutError::Discovery(InventoryError::ControlPlane(e)))?;
    let remote = SshExecutor::new(config.ssh.clone(), config.timeouts.command_timeout());
    Ok(Orchestrator::new(config, Arc::new(control_plane), Arc::new(remote)))
}

async fn plan(matches: &ArgMatches) -> anyhow::Result<i32> {
    let config = load_config(matches)?;
    let preview = orchestrator(config, matches)?.plan().await?;
    println!("{preview}");
    Ok(preview.exit_code())
}

async fn apply(matches: &ArgMatches) -> anyhow::Result<i32> {
    let config = load_config(matches)?;
    let report_dir = config.report_dir.clone();

    let (handle, signal) = abort_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("abort requested; in-flight hosts will finish");
            handle.abort();
        }
    });

    let report = orchestrator(config, matches)?
        .with_abort(signal)
        .apply()
        .await?;
    match report.write(&report_dir) {
        Ok(path) => eprintln!("report: {}", path.display()),
        Err(e) => tracing::error!(error = %e, "could not write report"),
    }
    println!("{report}");
    Ok(report.exit_code)
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<RolloutError>()
        .map_or(1, RolloutError::exit_code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    let format = matches
        .get_one::<String>("log-format")
        .map_or("pretty", String::as_str);
    init_tracing(format);

    let result = match matches.subcommand() {
        Some(("plan", args)) => plan(args).await.context("plan failed"),
        Some(("apply", args)) => apply(args).await.context("apply failed"),
        _ => Ok(1),
    };
    let code = match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "rollout stopped");
            eprintln!("error: {e:#}");
            exit_code(&e)
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
