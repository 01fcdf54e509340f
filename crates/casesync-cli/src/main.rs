//! casesync CLI - watch the workflow tasks of one case from a terminal.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use casesync_client::HttpCaseBackend;
use casesync_core::{CaseId, FormLayout, TaskSnapshot};
use casesync_engine::{
    activity_channel, ActivityKind, CaseSession, CaseSessionHandle, EngineConfig, EngineEvent,
};

mod command;

use command::{LineCommand, HELP};

/// casesync - keep a case's task list in sync with the workflow engine
#[derive(Parser)]
#[command(name = "casesync")]
#[command(about = "Watch and act on the tasks of a workflow case", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a case and accept commands on stdin
    Watch {
        /// Workflow engine REST endpoint
        #[arg(long, default_value = "http://localhost:8080/api")]
        base_url: String,

        /// Case to watch
        #[arg(short, long)]
        case: String,

        /// Poll delay after start and after each change, in milliseconds
        #[arg(long)]
        initial_delay_ms: Option<u64>,

        /// Upper bound for the poll delay, in milliseconds
        #[arg(long)]
        max_delay_ms: Option<u64>,

        /// Suspend polling after this many seconds without input
        #[arg(long)]
        inactivity_timeout_secs: Option<u64>,

        /// Consecutive fetch failures before polling stops
        #[arg(long)]
        max_failures: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("casesync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            base_url,
            case,
            initial_delay_ms,
            max_delay_ms,
            inactivity_timeout_secs,
            max_failures,
        } => {
            let mut config = EngineConfig::default();
            if let Some(ms) = initial_delay_ms {
                config.backoff.initial_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = max_delay_ms {
                config.backoff.max_delay = Duration::from_millis(ms);
            }
            if let Some(secs) = inactivity_timeout_secs {
                config.inactivity_timeout = Duration::from_secs(secs);
            }
            if let Some(max) = max_failures {
                config.backoff.max_consecutive_failures = max;
            }
            watch(&base_url, CaseId::new(case), config).await?;
        }
    }

    Ok(())
}

async fn watch(base_url: &str, case_id: CaseId, config: EngineConfig) -> Result<(), Box<dyn Error>> {
    info!(case_id = %case_id, base_url = %base_url, "Watching case");

    let backend = Arc::new(HttpCaseBackend::new(base_url)?);
    let (activity, ticks) = activity_channel(64);
    let (handle, mut events) = CaseSession::spawn(case_id, backend, ticks, config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                activity.record(ActivityKind::Key);
                match LineCommand::parse(&line) {
                    Ok(Some(LineCommand::Quit)) => break,
                    Ok(Some(command)) => run_command(&handle, command).await,
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                }
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    info!("Session closed");
    Ok(())
}

async fn run_command(handle: &CaseSessionHandle, command: LineCommand) {
    let result = match command {
        LineCommand::Open(task_id) => handle.open_task(task_id).await.map(|layout| {
            if let FormLayout::Form { form_key, context } = layout {
                println!("Form '{form_key}':");
                println!("{}", serde_json::to_string_pretty(&context).unwrap_or_default());
            }
        }),
        LineCommand::Close => handle.close_form().await.map(|closed| match closed {
            Some(task_id) => println!("Closed form for {task_id}"),
            None => println!("No form open"),
        }),
        LineCommand::Submit(data) => handle.submit_form(data).await,
        LineCommand::Start(message) => handle
            .send_start_message(message)
            .await
            .map(|action_id| println!("Start-message accepted ({action_id})")),
        LineCommand::Cancel(task_id) => handle.cancel_task(task_id).await,
        LineCommand::CloseCase(resolution) => handle.close_case(resolution).await,
        LineCommand::Refresh => handle.force_resync().await,
        LineCommand::Stop => handle.stop().await,
        LineCommand::Resume => handle.start().await,
        LineCommand::List => {
            print_tasks(&handle.snapshot());
            Ok(())
        }
        LineCommand::Status => {
            let status = handle.status();
            println!(
                "{}  failures={}  delay={}ms  inactive={}",
                status.state,
                status.consecutive_failures,
                status.current_delay.as_millis(),
                status.suspended_by_inactivity
            );
            Ok(())
        }
        LineCommand::Help => {
            println!("{HELP}");
            Ok(())
        }
        LineCommand::Quit => Ok(()),
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::TaskListChanged { diff, snapshot } => {
            for task in &diff.added {
                info!(task_id = %task.id, name = %task.name, "Task added");
            }
            for task in &diff.removed {
                info!(task_id = %task.id, name = %task.name, "Task removed");
            }
            info!(tasks = snapshot.len(), "Task list changed");
        }
        EngineEvent::TasksRefreshed { snapshot } => {
            info!(tasks = snapshot.len(), "Task details updated");
        }
        EngineEvent::StateChanged(status) => {
            info!(
                state = %status.state,
                failures = status.consecutive_failures,
                delay_ms = status.current_delay.as_millis() as u64,
                "Polling status"
            );
        }
        EngineEvent::Fatal { reason } => {
            error!(reason = %reason, "Polling stopped, type 'resume' to retry");
        }
        EngineEvent::FormOpened { task_id, .. } => info!(task_id = %task_id, "Form opened"),
        EngineEvent::Redirect { task_id, url, .. } => {
            info!(task_id = %task_id, url = %url, "Task redirects")
        }
        EngineEvent::FormClosed { task_id } => info!(task_id = %task_id, "Form closed"),
        EngineEvent::FormSubmitted { task_id } => info!(task_id = %task_id, "Form submitted"),
        EngineEvent::PendingActionResolved { action_id, task_id } => {
            info!(action_id = %action_id, task_id = %task_id, "Start-message created a task")
        }
        EngineEvent::PendingActionExpired { action_id } => {
            warn!(action_id = %action_id, "Start-message created no visible task")
        }
        EngineEvent::ActionFailed { action, error } => {
            warn!(action = ?action, error = %error, "Action failed")
        }
    }
}

fn print_tasks(snapshot: &TaskSnapshot) {
    println!("Tasks ({}):", snapshot.len());
    println!("{:<24}  {:<32}  {:<10}  {}", "ID", "NAME", "CANCEL", "CREATED");
    println!("{}", "-".repeat(90));

    for task in snapshot {
        let cancel = if task.cancelable { "yes" } else { "no" };
        let created = task.created_at.format("%Y-%m-%d %H:%M:%S");
        println!("{:<24}  {:<32}  {:<10}  {}", task.id.as_str(), task.name, cancel, created);
    }
}
