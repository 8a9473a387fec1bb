use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use fleetwatch::cli::{Cli, Command};
use fleetwatch::clock::SystemClock;
use fleetwatch::completion::NoTasks;
use fleetwatch::config::FleetConfig;
use fleetwatch::engine::{self, Engine};
use fleetwatch::events::EventBus;
use fleetwatch::health::HealthLevel;
use fleetwatch::mux::TmuxMux;
use fleetwatch::recovery::{RecoveryDecision, RecoveryOrchestrator, RecoveryPolicy};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config);

    let filter = match cli.verbose {
        0 if is_config_command => "fleetwatch=warn",
        0 => "fleetwatch=info",
        1 => "fleetwatch=debug",
        _ => "fleetwatch=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = FleetConfig::load(&cwd)?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .fleetwatch/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Run => run(config),
        Command::Check => check(config),
        Command::Recover => recover(config),
        Command::Config => {
            let toml = toml::to_string_pretty(&config)
                .context("failed to serialize effective config")?;
            print!("{toml}");
            Ok(())
        }
    }
}

fn run(config: FleetConfig) -> Result<()> {
    let bus = EventBus::new();

    // JSON-lines event stream on stdout; the subscriber thread exits when the
    // engine drops its bus handles.
    let events = bus.subscribe();
    let printer = std::thread::spawn(move || {
        for event in events {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
            }
        }
    });

    let handle = Engine::start(
        config,
        Arc::new(TmuxMux::new()),
        Arc::new(SystemClock),
        Arc::new(NoTasks),
        bus,
    );

    let stop = handle.stop_flag();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .ok(); // best-effort — may fail if handler already set

    let stop = handle.stop_flag();
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(250));
    }

    info!("shutting down");
    handle.shutdown(SHUTDOWN_GRACE);
    let _ = printer.join();
    Ok(())
}

fn check(config: FleetConfig) -> Result<()> {
    let mux = TmuxMux::new();
    let clock = SystemClock;
    let (statuses, verdict) = engine::check_once(&config, &mux, &clock);

    let payload = serde_json::json!({
        "agents": statuses,
        "health": verdict,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize check result")?
    );

    if verdict.overall == HealthLevel::Critical {
        std::process::exit(2);
    }
    Ok(())
}

fn recover(config: FleetConfig) -> Result<()> {
    let mux = TmuxMux::new();
    let clock = Arc::new(SystemClock);
    let (_, verdict) = engine::check_once(&config, &mux, clock.as_ref());

    let orchestrator = RecoveryOrchestrator::new(
        config.sessions.clone(),
        config.targets.clone(),
        RecoveryPolicy {
            cooldown: chrono::Duration::seconds(config.recovery.cooldown_secs as i64),
            pace: Duration::from_millis(config.recovery.pace_millis),
            settle: Duration::from_millis(config.recovery.settle_millis),
        },
        clock,
    );

    match orchestrator.attempt_recovery(&mux, &verdict, true) {
        RecoveryDecision::Attempted(attempt) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&attempt)
                    .context("failed to serialize recovery attempt")?
            );
        }
        RecoveryDecision::Skipped(reason) => {
            info!(?reason, "nothing to recover");
            println!("{}", serde_json::json!({ "skipped": reason }));
        }
    }
    Ok(())
}
