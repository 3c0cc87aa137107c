mod commands;
mod host;
mod logging;
mod probes;
mod reporters;
mod ui;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};

use readyup_core::config::{OutputMode, PROFILE_ENV};

use commands::VerifyOptions;

#[derive(Parser)]
#[command(name = "readyup", version)]
#[command(about = "Verify that a local service stack is genuinely ready", long_about = None)]
struct Cli {
    /// Config file (default: readyup.yml in this directory or a parent)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Only these services and what they depend on
    #[arg(short, long, global = true, env = PROFILE_ENV, value_name = "NAME")]
    profile: Option<String>,

    /// More log output on stderr (-v info, -vv debug); READYUP_LOG wins
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every service and report what is and is not ready
    Verify(VerifyArgs),
    /// Check that every configured port is free
    Ports,
    /// Print the dependency levels services are checked in
    Plan,
}

#[derive(Args)]
struct VerifyArgs {
    /// Run-wide deadline
    #[arg(long, value_name = "SECS")]
    global_timeout: Option<f64>,

    /// Default time between probes
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<f64>,

    #[arg(long, value_parser = parse_output)]
    output: Option<OutputMode>,

    /// Stop checking after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Run against a canned stack instead of real services
    #[arg(long)]
    demo: bool,
}

fn parse_output(s: &str) -> Result<OutputMode, String> {
    s.parse()
}

fn positive_secs(flag: &str, value: Option<f64>) -> Result<Option<f64>, String> {
    match value {
        Some(v) if !(v.is_finite() && v > 0.0) => Err(format!("--{} must be a positive number of seconds", flag)),
        other => Ok(other),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Verify(args) => {
            let checked = positive_secs("global-timeout", args.global_timeout)
                .and_then(|g| positive_secs("poll-interval", args.poll_interval).map(|p| (g, p)));
            let (global_timeout_secs, poll_interval_secs) = match checked {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::from(commands::EXIT_CONFIG);
                }
            };
            commands::run_verify(VerifyOptions {
                config: cli.config,
                profile: cli.profile,
                global_timeout_secs,
                poll_interval_secs,
                output: args.output,
                fail_fast: args.fail_fast,
                demo: args.demo,
            })
            .await
        }
        Commands::Ports => commands::run_ports(cli.config.as_deref(), cli.profile.as_deref()),
        Commands::Plan => commands::run_plan(cli.config.as_deref(), cli.profile.as_deref()),
    }
}
