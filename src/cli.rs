use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleetwatch", version, about = "Activity monitoring and recovery for tmux-hosted agent fleets")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the monitoring engine, streaming events as JSON lines
    Run,
    /// Sample every target once and print the fleet health verdict
    Check,
    /// Force a recovery attempt now, bypassing the cooldown
    Recover,
    /// Print the effective configuration as TOML
    Config,
}
