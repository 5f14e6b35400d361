//! The `health` subcommand: reports daemon liveness from the PID marker
//! file alone, with no IPC round-trip to a running process.

use crate::cli::HealthArgs;

pub fn run(args: HealthArgs) -> i32 {
    let status = devpod_agent_daemon::health_check(&args.pid_path);
    match status {
        devpod_agent_daemon::HealthStatus::Alive => println!("alive"),
        devpod_agent_daemon::HealthStatus::NotRunning => println!("not running"),
    }
    status.exit_code()
}
