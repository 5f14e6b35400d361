use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "devpod-agent")]
#[command(about = "Bootstraps and runs the devpod remote agent")]
pub struct Cli {
    /// Optional TOML file layered beneath CLI flags and above environment
    /// variables.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bootstraps the agent onto a remote target (host side).
    Inject(InjectArgs),
    /// Runs the long-lived remote daemon (remote side).
    Agent(AgentArgs),
    /// Reports daemon liveness from the PID marker file alone.
    Health(HealthArgs),
}

#[derive(Debug, Parser)]
pub struct InjectArgs {
    /// Run the bootstrap against the local shell instead of a remote
    /// target, useful for development.
    #[arg(long, default_value_t = true)]
    pub local: bool,

    /// Directory the agent binary is installed into on the target.
    #[arg(long)]
    pub install_dir: Option<String>,

    /// Base URL the remote downloads the agent binary from.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Expected remote version; mismatches trigger reinstall.
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    pub remote_version: String,

    /// Skips the post-install version probe entirely.
    #[arg(long)]
    pub skip_version_check: bool,

    /// Command to run on the remote once the agent is in place.
    #[arg(long)]
    pub follow_up_command: Option<String>,

    /// Overall deadline for the bootstrap, in seconds.
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,
}

#[derive(Debug, Parser)]
pub struct AgentArgs {
    /// Root directory workspace records are stored under.
    #[arg(long)]
    pub data_path: Option<String>,

    /// Address the SSH server binds to.
    #[arg(long)]
    pub ssh_bind_addr: Option<String>,

    /// Seconds of observed inactivity before the shutdown hook fires.
    #[arg(long)]
    pub inactivity_grace_period_secs: Option<u64>,

    /// Shell command run when the daemon decides to shut down.
    #[arg(long)]
    pub shutdown_hook_command: Option<String>,
}

#[derive(Debug, Parser)]
pub struct HealthArgs {
    /// Path to the daemon's PID marker file.
    #[arg(long, default_value = devpod_agent_daemon::pid_file::DEFAULT_PID_PATH)]
    pub pid_path: PathBuf,
}
