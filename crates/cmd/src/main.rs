// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{io::Write, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use rsqs_common_telemetry::{LogFormat, LoggingOptions, init_global_logging, set_panic_hook};
use rsqs_queue::{FileQueueService, QueueBuilder, QueueService};
use snafu::{ResultExt, Whatever};
use tracing::debug;

mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "rsqs",
about= "At-least-once message queue over a shared directory",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(flatten)]
    global:   GlobalArgs,
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Directory holding the queues
    #[arg(long, global = true, env = "RSQS_DATA_DIR", default_value = "./queue_data")]
    data_dir: PathBuf,

    /// Log filter, e.g. "info" or "rsqs_queue=trace"
    #[arg(long, global = true, env = "RSQS_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,

    /// Also write rotated log files to this directory
    #[arg(long, global = true, env = "RSQS_LOG_DIR")]
    log_dir: Option<String>,

    /// Break lock markers older than this many milliseconds
    #[arg(long, global = true, env = "RSQS_STALE_LOCK_TIMEOUT_MS")]
    stale_lock_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

impl GlobalArgs {
    fn logging_options(&self) -> LoggingOptions {
        LoggingOptions::builder()
            .dir(self.log_dir.clone().unwrap_or_default())
            .level(self.log_level.clone())
            .log_format(self.log_format.into())
            // Results go to stdout, logs to stderr.
            .append_stdout(false)
            .build()
    }

    fn open(&self) -> Result<FileQueueService, Whatever> {
        debug!(data_dir = %self.data_dir.display(), "Opening queues");
        QueueBuilder::new(&self.data_dir)
            .stale_lock_timeout(self.stale_lock_timeout_ms.map(Duration::from_millis))
            .build_file()
            .with_whatever_context(|_| {
                format!("Failed to open queues at {}", self.data_dir.display())
            })
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Create(CreateArgs),
    Push(PushArgs),
    Pull(QueueArgs),
    Delete(DeleteArgs),
    Requeue(QueueArgs),
    Unlock(QueueArgs),
    Stats(QueueArgs),
    List,
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Creates a queue, or updates the visibility timeout of an existing one.
Examples:

rsqs create orders
rsqs create orders --visibility-timeout-ms 60000

")]
struct CreateArgs {
    queue: String,
    /// Defaults to 30 seconds
    #[arg(long)]
    visibility_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Appends a message to a queue.
Examples:

rsqs push orders 'order #42'

")]
struct PushArgs {
    queue: String,
    body:  String,
}

/// Commands taking only a queue name: `pull` prints `<token>\t<body>` or
/// nothing when the queue is empty, `requeue` returns expired deliveries to
/// the queue, `unlock` removes a lock left by a crashed process, `stats`
/// prints the pending and in-flight counts.
#[derive(Debug, Clone, Args)]
struct QueueArgs {
    queue: String,
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Acknowledges a pulled message using the token printed by `pull`.
Examples:

rsqs delete orders 6f1c0f9e-8b4e-4b8e-9d4a-0d5c0a9e7c11

")]
struct DeleteArgs {
    queue: String,
    token: String,
}

impl Commands {
    fn run(&self, service: &FileQueueService, out: &mut impl Write) -> Result<(), Whatever> {
        debug!(command = ?self, "Running command");
        match self {
            Self::Create(args) => {
                let created = match args.visibility_timeout_ms {
                    Some(ms) => service.create_queue(&args.queue, Duration::from_millis(ms)),
                    None => service.create_queue_default(&args.queue),
                };
                created
                    .with_whatever_context(|_| format!("Failed to create queue {}", args.queue))?;
            }
            Self::Push(args) => service
                .push(&args.queue, &args.body)
                .with_whatever_context(|_| format!("Failed to push to {}", args.queue))?,
            Self::Pull(args) => {
                let message = service
                    .pull(&args.queue)
                    .with_whatever_context(|_| format!("Failed to pull from {}", args.queue))?;
                if let Some(message) = message {
                    writeln!(out, "{}\t{}", message.receipt_token, message.body)
                        .whatever_context("Failed to write output")?;
                }
            }
            Self::Delete(args) => service
                .delete(&args.queue, &args.token)
                .with_whatever_context(|_| format!("Failed to delete from {}", args.queue))?,
            Self::Requeue(args) => {
                let count = service
                    .requeue_expired(&args.queue)
                    .with_whatever_context(|_| format!("Failed to requeue {}", args.queue))?;
                writeln!(out, "{count}").whatever_context("Failed to write output")?;
            }
            Self::Unlock(args) => {
                let broken = service
                    .break_lock(&args.queue)
                    .with_whatever_context(|_| format!("Failed to unlock {}", args.queue))?;
                writeln!(out, "{}", if broken { "unlocked" } else { "not locked" })
                    .whatever_context("Failed to write output")?;
            }
            Self::Stats(args) => {
                let pending = service
                    .queue_depth(&args.queue)
                    .with_whatever_context(|_| format!("Failed to inspect {}", args.queue))?;
                let in_flight = service
                    .in_flight_count(&args.queue)
                    .with_whatever_context(|_| format!("Failed to inspect {}", args.queue))?;
                writeln!(out, "pending\t{pending}\nin_flight\t{in_flight}")
                    .whatever_context("Failed to write output")?;
            }
            Self::List => {
                let queues = service
                    .list_queues()
                    .whatever_context("Failed to list queues")?;
                for queue in queues {
                    writeln!(out, "{queue}").whatever_context("Failed to write output")?;
                }
            }
        }
        Ok(())
    }
}

fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    let _guards = init_global_logging("rsqs", &cli.global.logging_options());
    set_panic_hook();

    let service = cli.global.open()?;
    cli.commands.run(&service, &mut std::io::stdout().lock())
}
