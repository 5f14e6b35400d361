#![forbid(unsafe_code)]

mod agent_cmd;
mod cli;
mod config;
mod health_cmd;
mod inject_cmd;
mod process_exec;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::{AgentConfig, CliOverrides, FileConfig};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Command::Inject(args) => {
            let config = resolve_config(cli.config.as_deref(), inject_cmd::overrides(&args));
            run_async(async move { inject_cmd::run(args, &config).await }, |err| {
                eprintln!("{err}");
                1
            })
        }
        Command::Agent(args) => {
            let config = resolve_config(cli.config.as_deref(), agent_cmd::overrides(&args));
            run_async(async move { agent_cmd::run(args, config).await }, |err| {
                eprintln!("{err}");
                1
            })
        }
        Command::Health(args) => health_cmd::run(args),
    };

    std::process::exit(exit_code);
}

fn resolve_config(config_path: Option<&std::path::Path>, cli_overrides: CliOverrides) -> AgentConfig {
    let file = match config_path {
        Some(path) => match FileConfig::load(path) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("failed to load config file: {err}");
                std::process::exit(2);
            }
        },
        None => FileConfig::default(),
    };
    AgentConfig::resolve(&cli_overrides, &file)
}

fn run_async<F, E>(future: F, on_error: impl FnOnce(E) -> i32) -> i32
where
    F: std::future::Future<Output = Result<(), E>>,
{
    let runtime = tokio::runtime::Runtime::new().expect("failed to start the async runtime");
    match runtime.block_on(future) {
        Ok(()) => 0,
        Err(err) => on_error(err),
    }
}
