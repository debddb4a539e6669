mod document;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowpilot_client::HttpService;
use flowpilot_core::{AppConfig, EditorEvent, LogStatus, RunState, ServiceStatus, TimerRecord};
use flowpilot_engine::session::NAME_SUGGESTION;
use flowpilot_engine::{Editor, RunOutcome};
use flowpilot_graph::{SourceRef, WorkflowGraph};

use crate::document::ValidationReport;

const DEFAULT_CONFIG: &str = "flowpilot.toml";

#[derive(Parser)]
#[command(name = "flowpilot", version, about = "Workflow editor core and execution client")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "FLOWPILOT_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the execution service
    Check,
    /// Check a workflow document for label problems and edge healing
    Validate { file: PathBuf },
    /// Connect two nodes of a workflow document
    Connect {
        file: PathBuf,
        /// Source node, optionally with a branch port (`id:true`, `id:false`)
        source: String,
        target: String,
        /// Answer yes to every question
        #[arg(long, short = 'y')]
        yes: bool,
        /// Write the result here instead of back to FILE
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Rename a node
    Rename {
        file: PathBuf,
        node_id: String,
        label: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Run a workflow document
    Run {
        file: PathBuf,
        /// Start from this node instead of the entry nodes
        #[arg(long)]
        start: Option<String>,
        /// Stored workflow to update instead of creating a new one
        #[arg(long)]
        workflow_id: Option<String>,
        /// Keep polling for scheduled executions until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Run a single node of a workflow document
    Node {
        file: PathBuf,
        node_id: String,
        #[arg(long)]
        workflow_id: Option<String>,
    },
    /// Manage remote schedules
    Timers {
        #[command(subcommand)]
        action: TimerAction,
    },
    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum TimerAction {
    /// List schedules
    List,
    /// Pause a schedule
    Pause { id: String },
    /// Resume a paused schedule
    Resume { id: String },
    /// Delete a schedule
    Delete { id: String },
    /// Fire a schedule immediately
    ExecuteNow { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Some(AppConfig::load(&cli.config)?)
    } else if cli.config != Path::new(DEFAULT_CONFIG) {
        anyhow::bail!("Config file not found: {}", cli.config.display());
    } else {
        None
    };
    let from_file = config.is_some();
    let config = config.unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .init();

    if from_file {
        info!(path = %cli.config.display(), "Loaded config");
    } else {
        info!("No config file, using defaults");
    }

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { file } => {
            let workflow = document::read_workflow(&file)?;
            let report = ValidationReport::check(&workflow);
            println!(
                "{}: {} nodes, {} connections",
                workflow.name,
                workflow.nodes.len(),
                workflow.connections.len()
            );
            report.print();
            if !report.is_loadable() {
                anyhow::bail!("workflow has label problems");
            }
        }
        Commands::Connect {
            file,
            source,
            target,
            yes,
            output,
        } => {
            let workflow = document::read_workflow(&file)?;
            let mut graph = WorkflowGraph::from_workflow(&workflow)?;
            let source: SourceRef = source.parse()?;

            let created = graph.connect_with(&source, &target, |question| {
                if yes {
                    return true;
                }
                dialoguer::Confirm::new()
                    .with_prompt(question.prompt())
                    .default(false)
                    .interact()
                    .unwrap_or(false)
            })?;

            match created {
                Some(conn) => {
                    println!(
                        "Connected {} -> {}{}",
                        conn.source,
                        conn.target,
                        conn.label().map(|l| format!(" [{}]", l)).unwrap_or_default()
                    );
                    let dest = output.unwrap_or(file);
                    document::write_workflow(&dest, &graph.to_workflow(workflow.name))?;
                }
                None => println!("No connection created."),
            }
        }
        Commands::Rename {
            file,
            node_id,
            label,
            output,
        } => {
            let workflow = document::read_workflow(&file)?;
            let mut graph = WorkflowGraph::from_workflow(&workflow)?;
            graph.rename_label(&node_id, &label)?;
            let dest = output.unwrap_or(file);
            document::write_workflow(&dest, &graph.to_workflow(workflow.name))?;
            println!("Renamed {} to '{}'", node_id, label.trim());
        }
        Commands::Check => {
            let editor = connect_editor(config)?;
            let status = editor.check_health().await;
            println!("{}: {}", editor.config().service.base_url, status);
            if status != ServiceStatus::Online {
                anyhow::bail!("execution service is not reachable");
            }
        }
        Commands::Run {
            file,
            start,
            workflow_id,
            watch,
        } => {
            let editor = open_editor(config, &file, workflow_id).await?;
            let namer = ask_name(&editor).await?;
            let printer = EventPrinter::start(editor.subscribe());

            let outcome = tokio::select! {
                outcome = editor.run(start, move |_| namer) => outcome?,
                _ = tokio::signal::ctrl_c() => {
                    if let Err(e) = editor.stop() {
                        warn!(error = %e, "Nothing to stop");
                    }
                    RunOutcome::Stopped
                }
            };
            let failed = report_outcome(outcome).await;

            if watch && !failed {
                editor.start_background();
                eprintln!("Watching for scheduled executions, Ctrl-C to quit");
                tokio::signal::ctrl_c().await?;
                editor.shutdown().await;
            }
            printer.finish().await;
            print_results(&editor)?;
            if failed {
                anyhow::bail!("run failed");
            }
        }
        Commands::Node {
            file,
            node_id,
            workflow_id,
        } => {
            let editor = open_editor(config, &file, workflow_id).await?;
            let scheduling = editor.graph(|g| g.node(&node_id).map(|n| n.kind().is_scheduling()));
            let namer = match scheduling {
                Some(true) => ask_name(&editor).await?,
                _ => None,
            };
            let printer = EventPrinter::start(editor.subscribe());
            let outcome = editor.run_single_node(&node_id, move |_| namer).await?;
            let failed = report_outcome(outcome).await;
            printer.finish().await;
            print_results(&editor)?;
            if failed {
                anyhow::bail!("node run failed");
            }
        }
        Commands::Timers { action } => {
            let editor = connect_editor(config)?;
            require_online(&editor).await?;
            let timers = editor.timers();
            match action {
                TimerAction::List => {
                    timers.refresh().await?;
                    print_timers(&timers.list());
                }
                TimerAction::Pause { id } => {
                    timers.pause(&id).await?;
                    println!("Paused {}", id);
                }
                TimerAction::Resume { id } => {
                    timers.resume(&id).await?;
                    println!("Resumed {}", id);
                }
                TimerAction::Delete { id } => {
                    timers.delete(&id).await?;
                    println!("Deleted {}", id);
                }
                TimerAction::ExecuteNow { id } => {
                    let printer = EventPrinter::start(editor.subscribe());
                    timers.execute_now(&id).await?.finished().await;
                    printer.finish().await;
                    print_results(&editor)?;
                }
            }
        }
    }

    Ok(())
}

fn connect_editor(config: AppConfig) -> anyhow::Result<Editor> {
    let service = HttpService::new(&config)?;
    Ok(Editor::new(config, Arc::new(service)))
}

async fn require_online(editor: &Editor) -> anyhow::Result<()> {
    if editor.check_health().await != ServiceStatus::Online {
        anyhow::bail!(
            "execution service at {} is not reachable",
            editor.config().service.base_url
        );
    }
    Ok(())
}

async fn open_editor(
    config: AppConfig,
    file: &Path,
    workflow_id: Option<String>,
) -> anyhow::Result<Editor> {
    let workflow = document::read_workflow(file)?;
    let editor = connect_editor(config)?;
    editor.open_document(&workflow, workflow_id)?;
    require_online(&editor).await?;
    Ok(editor)
}

/// Ask for a workflow name up front when the run will create one.
async fn ask_name(editor: &Editor) -> anyhow::Result<Option<String>> {
    if editor.state().read(|s| s.workflow.id.is_some()) {
        return Ok(None);
    }
    let name = tokio::task::spawn_blocking(|| {
        dialoguer::Input::<String>::new()
            .with_prompt("Workflow name")
            .default(NAME_SUGGESTION.to_string())
            .interact_text()
            .ok()
    })
    .await?;
    Ok(name)
}

/// Wait for the reveal batch and say how the run ended. Returns `true` on
/// failure.
async fn report_outcome(outcome: RunOutcome) -> bool {
    match outcome {
        RunOutcome::Aborted => {
            eprintln!("Workflow was not named, nothing ran.");
            false
        }
        RunOutcome::Stopped => {
            eprintln!("Run stopped.");
            false
        }
        RunOutcome::Failed { message } => {
            eprintln!("Run failed: {}", message);
            true
        }
        completed @ RunOutcome::Completed { .. } => {
            completed.wait_revealed().await;
            false
        }
    }
}

fn print_results(editor: &Editor) -> anyhow::Result<()> {
    let results = editor.state().results();
    if !results.is_empty() {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }
    Ok(())
}

fn print_timers(timers: &[TimerRecord]) {
    if timers.is_empty() {
        println!("No schedules.");
        return;
    }
    println!("{:<24} {:<24} {:>8}  {:<8} NEXT", "ID", "NODE", "EVERY", "STATUS");
    for timer in timers {
        println!(
            "{:<24} {:<24} {:>6}m  {:<8} {}",
            truncate(&timer.id, 24),
            truncate(&timer.node_id, 24),
            timer.interval_minutes,
            format!("{:?}", timer.status).to_lowercase(),
            timer.next_execution.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
}

/// Prints editor events until told to finish, then drains what is left.
struct EventPrinter {
    done: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl EventPrinter {
    fn start(mut rx: broadcast::Receiver<EditorEvent>) -> Self {
        let (done, mut done_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(event) => print_event(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Event printer lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = &mut done_rx => {
                        while let Ok(event) = rx.try_recv() {
                            print_event(&event);
                        }
                        break;
                    }
                }
            }
        });
        Self { done, handle }
    }

    async fn finish(self) {
        let _ = self.done.send(());
        let _ = self.handle.await;
    }
}

fn print_event(event: &EditorEvent) {
    match event {
        EditorEvent::LogAppended(entry) => {
            let marker = match entry.status {
                LogStatus::Success => "ok",
                LogStatus::Error => "ERROR",
                LogStatus::Running => "..",
            };
            let payload = entry
                .payload
                .as_ref()
                .map(|p| format!("  {}", truncate(&p.to_string(), 120)))
                .unwrap_or_default();
            println!(
                "[{}] {:<5} {:<16} {}{}",
                entry.timestamp.format("%H:%M:%S"),
                marker,
                entry.node_id,
                entry.message,
                payload
            );
            io::stdout().flush().ok();
        }
        EditorEvent::RunStateChanged(RunState::Running) => eprintln!("[running]"),
        EditorEvent::ServiceStatusChanged(status) => eprintln!("[service: {}]", status),
        EditorEvent::TimersRefreshed { count } => info!(count, "Timers refreshed"),
        EditorEvent::WorkflowSaved { workflow_id } => eprintln!("[saved: {}]", workflow_id),
        _ => {}
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
