use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pulsar",
    author,
    version,
    about = "Remote job execution server.",
    long_about = "Stages job files, runs jobs through the configured managers and tracks them until their outputs are collected."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short,
        long,
        global = true,
        help = "Path to config.toml (defaults to $XDG_CONFIG_HOME/pulsar/config.toml)"
    )]
    pub config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase verbosity level (-v for debug, -vv for trace)")]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the server until interrupted")]
    Serve(ServeArgs),

    #[command(about = "Run one job through a manager and wait for its outputs")]
    Submit(SubmitArgs),

    #[command(about = "Validate the configuration and list the managers it defines")]
    CheckConfig,
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(
        long,
        default_value_t = 30.0,
        help = "Seconds to wait for worker threads on shutdown"
    )]
    pub shutdown_timeout: f64,
}

#[derive(Args)]
pub struct SubmitArgs {
    #[arg(long, help = "Manager to run the job with (defaults to _default_)")]
    pub manager: Option<String>,

    #[arg(long, help = "Command line to execute")]
    pub command: String,

    #[arg(
        long = "input",
        help = "Input file referenced by the command line. Can be repeated."
    )]
    pub inputs: Vec<PathBuf>,

    #[arg(
        long = "output",
        help = "Output file to collect after the job finished. Can be repeated."
    )]
    pub outputs: Vec<PathBuf>,

    #[arg(long, help = "Staging configuration (JSON) deciding how files move")]
    pub staging_config: Option<PathBuf>,

    #[arg(long, help = "Give up waiting after this many seconds")]
    pub timeout: Option<f64>,

    #[arg(long, help = "Keep the job directory on the server")]
    pub keep: bool,
}
