//! DebateDaemon - multi-agent deliberation pipeline
//!
//! CLI entry point for running the pipeline and inspecting its sessions.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result, eyre};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use debatedaemon::cli::{Cli, Command, OutputFormat};
use debatedaemon::config::Config;
use debatedaemon::dispatcher::DispatchReport;
use debatedaemon::domain::{IdResolver, Round, Session, SessionStatus, Statement, now_ms};
use debatedaemon::events::{create_event_bus, default_sessions_dir, read_session_events, spawn_event_logger};
use debatedaemon::pipeline::{Pipeline, open_state};
use debatedaemon::scheduler::SessionScheduler;
use debatedaemon::seed::SeedFile;
use debatedaemon::state::StateManager;

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("debatedaemon")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = match cli_log_level.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("debatedaemon.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(provider = %config.llm.provider, model = %config.llm.model, "DebateDaemon loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run => cmd_run(config).await,
        Command::Schedule { format } => cmd_schedule(config, format).await,
        Command::Dispatch { format } => cmd_dispatch(config, format).await,
        Command::Seed { file } => cmd_seed(&config, file).await,
        Command::Sessions { status, format } => cmd_sessions(&config, status, format).await,
        Command::Show { session, format } => cmd_show(&config, &session, format).await,
        Command::Events { session } => cmd_events(&config, &session).await,
    }
}

/// Run the whole pipeline until SIGINT or SIGTERM
async fn cmd_run(config: Config) -> Result<()> {
    debug!("cmd_run: called");
    let pipeline = Pipeline::open(config)?;
    let logger = spawn_event_logger(pipeline.events.clone(), default_sessions_dir()?)?;

    println!("DebateDaemon running. Press Ctrl+C to stop.");
    pipeline.run_until(shutdown_signal()).await?;

    flush_event_logger(logger).await;
    println!("DebateDaemon stopped");
    Ok(())
}

/// Wait for the logger; it exits once every bus sender is gone
async fn flush_event_logger(logger: JoinHandle<()>) {
    debug!("flush_event_logger: called");
    match tokio::time::timeout(Duration::from_secs(5), logger).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Event logger task failed"),
        Err(_) => warn!("Event logger did not flush within 5s"),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => debug!("shutdown_signal: SIGINT received"),
                    _ = sigterm.recv() => debug!("shutdown_signal: SIGTERM received"),
                }
            }
            _ => {
                warn!("Failed to install signal handlers; falling back to ctrl_c");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "ctrl_c handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c handler failed");
        }
    }
}

async fn cmd_schedule(config: Config, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_schedule: called");
    config.validate_parameters()?;
    let state = open_state(&config)?;
    let events = create_event_bus();
    let logger = spawn_event_logger(events.clone(), default_sessions_dir()?)?;
    let scheduler = SessionScheduler::new(state.clone(), config.scheduler.clone(), events);
    let report = scheduler.run_cycle(now_ms()).await?;
    state.shutdown().await?;
    drop(scheduler);
    flush_event_logger(logger).await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("{}", report.summary());
            for id in &report.session_ids {
                println!("  {}", id);
            }
        }
    }
    Ok(())
}

/// One dispatch cycle, then run every turn that is ready right away
///
/// Turns deferred by rate limiting are not waited for; the dispatcher
/// resumes their rounds once they stall.
async fn cmd_dispatch(config: Config, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_dispatch: called");
    let pipeline = Pipeline::open(config)?;
    let logger = spawn_event_logger(pipeline.events.clone(), default_sessions_dir()?)?;
    let report: DispatchReport = pipeline.dispatcher.run_cycle(now_ms()).await?;

    let mut turns = 0usize;
    while let Some(item) = pipeline.queue.try_dequeue().await {
        match pipeline.executor.handle(&item).await {
            Ok(step) => {
                debug!(round_id = %item.round_id, outcome = ?step.outcome, "cmd_dispatch: turn done");
                turns += 1;
            }
            Err(e) => warn!(round_id = %item.round_id, error = %e, "Turn failed"),
        }
    }
    pipeline.queue.close().await;
    pipeline.state.shutdown().await?;
    drop(pipeline);
    flush_event_logger(logger).await;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "dispatch": report, "turns": turns }))?,
        OutputFormat::Text => {
            println!("{}", report.summary());
            println!("{} turns taken", turns);
        }
    }
    Ok(())
}

async fn cmd_seed(config: &Config, file: PathBuf) -> Result<()> {
    debug!(file = %file.display(), "cmd_seed: called");
    let seed = SeedFile::load(&file)?;
    let state = open_state(config)?;
    let report = seed.apply(&state).await?;
    state.shutdown().await?;

    println!(
        "Seeded {} topics, {} participants, {} knowledge items, {} steering inputs",
        report.topics, report.participants, report.knowledge, report.steering
    );
    Ok(())
}

async fn cmd_sessions(config: &Config, status: Option<SessionStatus>, format: OutputFormat) -> Result<()> {
    debug!(?status, %format, "cmd_sessions: called");
    let state = open_state(config)?;
    let mut sessions = state.list_sessions(status).await?;
    let metrics = state.get_metrics().await?;
    state.shutdown().await?;
    sessions.sort_by_key(|s| std::cmp::Reverse(s.created_at));

    match format {
        OutputFormat::Json => print_json(&sessions)?,
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No sessions");
                return Ok(());
            }
            println!(
                "{:<40} {:<10} {:<10} {:>7} {:>8}",
                "ID", "STATUS", "MODE", "ROUNDS", "SEATS"
            );
            for s in &sessions {
                println!(
                    "{:<40} {:<10} {:<10} {:>3}/{:<3} {:>8}",
                    s.id, s.status, s.mode, s.current_round, s.max_rounds, s.participant_count
                );
            }
            println!();
            println!(
                "active {}, completed {}, cancelled {}; rounds processing {}, failed {}",
                metrics.sessions_active,
                metrics.sessions_completed,
                metrics.sessions_cancelled,
                metrics.rounds_processing,
                metrics.rounds_failed
            );
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct SessionView {
    session: Session,
    rounds: Vec<Round>,
    statements: Vec<Statement>,
}

async fn cmd_show(config: &Config, reference: &str, format: OutputFormat) -> Result<()> {
    debug!(%reference, %format, "cmd_show: called");
    let state = open_state(config)?;
    let view = load_session_view(&state, reference).await;
    let names = match &view {
        Ok(v) => {
            let roster = state.roster(&v.session.id).await?;
            state.participant_names(&roster).await?
        }
        Err(_) => HashMap::new(),
    };
    state.shutdown().await?;
    let view = view?;

    match format {
        OutputFormat::Json => print_json(&view)?,
        OutputFormat::Text => print_session_text(&view, &names),
    }
    Ok(())
}

async fn load_session_view(state: &StateManager, reference: &str) -> Result<SessionView> {
    let session_id = resolve_session(state, reference).await?;
    let session: Session = state.require(&session_id).await?;
    let rounds = state.rounds_for_session(&session_id).await?;
    let statements = state.statements_for_session(&session_id).await?;
    Ok(SessionView {
        session,
        rounds,
        statements,
    })
}

fn print_session_text(view: &SessionView, names: &HashMap<String, String>) {
    let s = &view.session;
    println!("Session {} ({}, {})", s.id, s.status, s.mode);
    println!("Topic: {}", s.topic_id);
    println!("Rounds: {}/{}", s.current_round, s.max_rounds);

    for round in &view.rounds {
        println!();
        println!("== Round {} [{}] ==", round.round_number, round.status);
        for st in view.statements.iter().filter(|st| st.round_id == round.id) {
            let name = names.get(&st.participant_id).map(String::as_str).unwrap_or(&st.participant_id);
            println!("{}. {}: {}", st.speaking_order, name, st.content);
        }
    }

    if let Some(summary) = &s.summary {
        println!();
        println!("Summary: {}", summary);
    }
    if let Some(verdict) = &s.verdict {
        println!();
        println!("Verdict: {}", verdict.rationale);
        if let Some(winner) = &verdict.winner {
            let name = names.get(winner).map(String::as_str).unwrap_or(winner);
            println!("Winner: {}", name);
        }
        for score in &verdict.scores {
            let name = names
                .get(&score.participant_id)
                .map(String::as_str)
                .unwrap_or(&score.participant_id);
            println!("  {:<20} {:>5.1}", name, score.total());
        }
    }
}

async fn cmd_events(config: &Config, reference: &str) -> Result<()> {
    debug!(%reference, "cmd_events: called");
    let state = open_state(config)?;
    let session_id = resolve_session(&state, reference).await;
    state.shutdown().await?;
    let session_id = session_id?;

    let entries = read_session_events(default_sessions_dir()?, &session_id)?;
    if entries.is_empty() {
        println!("No events recorded for {}", session_id);
    }
    for entry in entries {
        println!("{} {}", entry.timestamp.to_rfc3339(), serde_json::to_string(&entry.event)?);
    }
    Ok(())
}

/// Resolve a full or partial session ID
async fn resolve_session(state: &StateManager, reference: &str) -> Result<String> {
    let sessions = state.list_sessions(None).await?;
    let ids: HashMap<String, String> = sessions.into_iter().map(|s| (s.id, s.topic_id)).collect();
    match IdResolver::new(&ids).resolve(reference) {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(eyre!("No session matches '{}'", reference)),
        Err(candidates) => Err(eyre!(
            "'{}' is ambiguous; candidates: {}",
            reference,
            candidates.join(", ")
        )),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
