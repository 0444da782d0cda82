use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "archive",
    version,
    about = r#"
archive runs a dynamic component program: a JSON instruction list that
initializes contexts in a registry, wires them together, and drives them.

EXAMPLES:
    # Execute a program.
    archive run program.json

    # Check a program resolves without running any of it.
    archive validate program.json

    # Run a program, watching SIGINT and SIGTERM as it goes.
    archive run program.json --watch-signal SIGINT --watch-signal SIGTERM
"#
)]
pub struct Opt {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Execute a program against a fresh registry.
    Run(RunArgs),

    /// Resolve a program's keys and interfaces without executing anything.
    Validate(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the JSON instruction program to load.
    pub file: PathBuf,

    /// A signal name to watch (can be specified multiple times), e.g.
    /// `--watch-signal SIGINT`. Installs a `signal_management` context under
    /// the well-known key `signals` before the program's own instructions run.
    #[arg(long = "watch-signal")]
    pub watch_signal: Vec<String>,

    /// Registry bucket count. Defaults to the program's own
    /// `registry_capacity`, if set, else 256.
    #[arg(long)]
    pub capacity: Option<usize>,
}

/// Maps a signal name (`"SIGINT"`, `"SIGTERM"`, ...) to its platform number.
/// Only the small, portable set that `signal_hook` accepts unconditionally is
/// recognized; anything else is a usage error at the CLI boundary rather than
/// something the registry layer needs to know about.
pub fn signal_number(name: &str) -> Option<i32> {
    match name.to_ascii_uppercase().as_str() {
        "SIGHUP" => Some(signal_hook::consts::SIGHUP),
        "SIGINT" => Some(signal_hook::consts::SIGINT),
        "SIGQUIT" => Some(signal_hook::consts::SIGQUIT),
        "SIGTERM" => Some(signal_hook::consts::SIGTERM),
        "SIGUSR1" => Some(signal_hook::consts::SIGUSR1),
        "SIGUSR2" => Some(signal_hook::consts::SIGUSR2),
        _ => None,
    }
}
