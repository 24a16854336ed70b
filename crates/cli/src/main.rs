//! Downlink CLI
//!
//! Terminal front end for the Downlink client engine: tail normalized
//! conversation logs, follow raw output, list an attempt's execution
//! processes and show derived status.

mod cmd_processes;
mod cmd_raw;
mod cmd_status;
mod cmd_tail;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "downlink", version, about = "Follow live agent runs from the terminal")]
struct Cli {
    /// Server origin, e.g. http://127.0.0.1:3000
    #[arg(long, global = true, env = "DOWNLINK_SERVER_URL")]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow the normalized conversation log of a process
    Tail {
        process_id: Uuid,
    },
    /// Follow a process's verbatim stdout/stderr
    Raw {
        process_id: Uuid,
    },
    /// List the execution processes of a task attempt
    Processes {
        attempt_id: Uuid,
        /// Include tombstoned (soft-deleted) processes
        #[arg(long)]
        all: bool,
        /// Keep redrawing as the attempt changes
        #[arg(long)]
        watch: bool,
    },
    /// Derived status of an attempt: running flag, idle countdown,
    /// context usage
    Status {
        attempt_id: Uuid,
        /// Read context usage from this process instead of the latest agent
        #[arg(long)]
        process: Option<Uuid>,
        /// Keep redrawing once a second
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _logging = logging::init_logging()?;
    let config = config::resolve(cli.server)?;

    match cli.command {
        Command::Tail { process_id } => cmd_tail::run(config, process_id).await,
        Command::Raw { process_id } => cmd_raw::run(config, process_id).await,
        Command::Processes {
            attempt_id,
            all,
            watch,
        } => cmd_processes::run(config, attempt_id, all, watch).await,
        Command::Status {
            attempt_id,
            process,
            watch,
        } => cmd_status::run(config, attempt_id, process, watch).await,
    }
}
