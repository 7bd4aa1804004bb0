//! buddy - check-in buddy の CLI
//!
//! タスクを追加すると、指定時間後に完了しているかを確認し、
//! 終わっていなければリマインダーを送ります。
//!
//! - `add` / `done` / `list` / `status` / `resume`: 1 回実行して JSON を stdout に出す
//! - `run`: runner を起動して待機中の check-in をすべて駆動する（Ctrl-C で停止）
//!
//! ログは stderr（`RUST_LOG` で調整）。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use buddy_core::app::{InvocationStatus, ResumeOutcome};
use buddy_core::config::LogFormat;
use buddy_core::domain::{Task, TaskId};
use buddy_core::observability::PhaseCounts;
use buddy_core::{AppBuilder, BuddyConfig};

#[derive(Debug, Parser)]
#[command(name = "buddy", version, about = "Accountability buddy: delayed check-ins for your tasks")]
struct Cli {
    /// TOML config file. Environment variables override it.
    #[arg(long, short, global = true, env = "BUDDY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add a task and schedule its check-in.
    Add {
        title: String,
        /// Delay before the check-in, in (fractional) hours.
        #[arg(long, default_value_t = 1.0)]
        hours: f64,
    },
    /// Mark a task done.
    Done { task_id: TaskId },
    /// List tasks with their check-in status.
    List {
        /// Only tasks created today (UTC).
        #[arg(long)]
        today: bool,
    },
    /// Show one check-in, or counts and halted check-ins when no id is given.
    Status { task_id: Option<TaskId> },
    /// Retry a halted check-in.
    Resume { task_id: TaskId },
    /// Drive every pending check-in until interrupted.
    Run,
}

#[derive(Serialize)]
struct TaskView {
    #[serde(flatten)]
    task: Task,
    check_in: Option<InvocationStatus>,
}

#[derive(Serialize)]
struct Overview {
    counts: PhaseCounts,
    halted: Vec<InvocationStatus>,
}

fn init_logging(format: LogFormat, default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BuddyConfig::load(cli.config.as_deref()).context("loading config")?;

    let default_level = match cli.command {
        Command::Run => "info",
        _ => "warn",
    };
    init_logging(config.log_format, default_level);

    let app = AppBuilder::new(config).build()?;
    let workflow = Arc::clone(app.workflow());

    match cli.command {
        Command::Add { title, hours } => {
            if title.trim().is_empty() {
                bail!("title must not be empty");
            }
            let (task, outcome) = app.create_task(&title, hours).await?;
            print_json(&TaskView {
                task,
                check_in: Some(InvocationStatus::from(outcome.record())),
            })?;
        }
        Command::Done { task_id } => {
            let Some(task) = app.mark_done(task_id).await? else {
                bail!("no task {task_id}");
            };
            let check_in = workflow.status(task_id).await?;
            print_json(&TaskView { task, check_in })?;
        }
        Command::List { today } => {
            let tasks = if today {
                app.tasks_today().await?
            } else {
                app.tasks().await?
            };
            let mut views = Vec::new();
            for task in tasks {
                let check_in = workflow.status(task.id).await?;
                views.push(TaskView { task, check_in });
            }
            print_json(&views)?;
        }
        Command::Status { task_id: Some(task_id) } => {
            let Some(status) = workflow.status(task_id).await? else {
                bail!("no check-in for {task_id}");
            };
            eprintln!("{}", status.explain());
            print_json(&status)?;
        }
        Command::Status { task_id: None } => {
            print_json(&Overview {
                counts: workflow.counts().await?,
                halted: workflow.halted().await?,
            })?;
        }
        Command::Resume { task_id } => match workflow.resume(task_id).await? {
            ResumeOutcome::Resumed(record) => {
                print_json(&InvocationStatus::from(&record))?;
            }
            ResumeOutcome::NotHalted(record) => {
                eprintln!("{task_id} is not halted ({})", record.phase);
                print_json(&InvocationStatus::from(&record))?;
            }
        },
        Command::Run => run(&app).await?,
    }
    Ok(())
}

async fn run(app: &buddy_core::App) -> Result<()> {
    let redelivered = app.redeliver_signals().await?;
    if redelivered > 0 {
        info!(redelivered, "started check-ins for tasks that had none");
    }

    let runner = Arc::new(app.runner());
    let mut handle = tokio::spawn({
        let runner = Arc::clone(&runner);
        async move { runner.run().await }
    });
    info!("runner started; press Ctrl-C to stop");

    tokio::select! {
        finished = &mut handle => {
            finished??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutting down");
            runner.request_shutdown();
            handle.await??;
        }
    }

    runner.join_idle().await;
    info!("runner stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_fractional_hours() {
        let cli = Cli::try_parse_from(["buddy", "add", "write report", "--hours", "0.5"]).unwrap();
        match cli.command {
            Command::Add { title, hours } => {
                assert_eq!(title, "write report");
                assert_eq!(hours, 0.5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn status_id_is_optional_and_typed() {
        let cli = Cli::try_parse_from(["buddy", "status"]).unwrap();
        assert!(matches!(cli.command, Command::Status { task_id: None }));

        let id: TaskId = "01ARZ3NDEKTSV4RRFFQ69G5FAV".parse().unwrap();
        let cli = Cli::try_parse_from(["buddy", "status", &id.to_string()]).unwrap();
        assert!(matches!(cli.command, Command::Status { task_id: Some(parsed) } if parsed == id));

        assert!(Cli::try_parse_from(["buddy", "done", "not-an-id"]).is_err());
    }

    #[test]
    fn list_takes_a_today_flag() {
        let cli = Cli::try_parse_from(["buddy", "list", "--today"]).unwrap();
        assert!(matches!(cli.command, Command::List { today: true }));
        let cli = Cli::try_parse_from(["buddy", "list"]).unwrap();
        assert!(matches!(cli.command, Command::List { today: false }));
    }
}
