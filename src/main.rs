//! atlas-link command-line entry point

mod cli;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use atlas_link::client::{shared, ClientEvent, ConnectionState, EventClient, EventKind, Inbound};
use atlas_link::config::{self, LinkConfig};
use atlas_link::error::Error;
use atlas_link::logging::{self, LogGuards};
use atlas_link::protocol::{
    ExecutionOutcome, MessageKind, ResultReportEvent, TaskDispatchEvent, TaskResult, TestResult,
    WsMessage,
};
use atlas_link::session::{self, ProbeSession, SessionEvent};
use atlas_link::version;

use crate::cli::{Cli, Commands, ConfigSubcommand, ConnectArgs};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<Error>() {
            Some(err) => {
                eprint!("{}", err.format_for_terminal());
                std::process::exit(err.exit_code());
            }
            None => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => handle_config_command(subcommand),
        Commands::Watch { connect, types, raw } => {
            let (config, _guards) = prepare(&connect, cli.verbose, cli.quiet)?;
            runtime()?.block_on(watch(config, types, raw))
        }
        Commands::Send {
            connect,
            kind,
            data,
            timeout,
        } => {
            let (config, _guards) = prepare(&connect, cli.verbose, cli.quiet)?;
            runtime()?.block_on(send(config, kind, data, Duration::from_secs(timeout)))
        }
        Commands::Probe { connect } => {
            let (config, _guards) = prepare(&connect, cli.verbose, cli.quiet)?;
            runtime()?.block_on(probe(config))
        }
    }
}

/// Load configuration, apply CLI overrides and start logging
fn prepare(connect: &ConnectArgs, verbose: u8, quiet: bool) -> anyhow::Result<(LinkConfig, LogGuards)> {
    let mut config = LinkConfig::load(connect.config.as_deref())?;
    if let Some(url) = &connect.url {
        config.server.url = Some(url.clone());
        config.validate()?;
    }

    let guards = logging::init_logging(&config.logging, verbose, quiet)?;

    let build = version::build_info();
    debug!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting atlas-link"
    );

    Ok((config, guards))
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("atlas-link")
        .build()
        .context("Failed to create async runtime")
}

/// Forward every client event into a channel the command loop can select on
fn subscribe(client: &EventClient) -> mpsc::UnboundedReceiver<ClientEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in EventKind::ALL {
        let tx = tx.clone();
        client.on_fn(kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}

fn exhausted(client: &EventClient, config: &LinkConfig) -> anyhow::Error {
    Error::ConnectionLost {
        message: format!(
            "{} unreachable after {} reconnect attempts",
            client.url(),
            config.server.max_reconnect_attempts
        ),
    }
    .into()
}

// ─────────────────────────────────────────────────────────────────
// watch
// ─────────────────────────────────────────────────────────────────

async fn watch(config: LinkConfig, types: Vec<String>, raw: bool) -> anyhow::Result<()> {
    let client = shared::get_or_create(config.client_config());
    let mut events = subscribe(&client);

    info!(url = %client.url(), "Watching live events");
    client.connect();

    // execution id -> task type, to decode results when they arrive
    let mut dispatched = HashMap::new();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break Ok(());
            }

            event = events.recv() => match event {
                Some(ClientEvent::Open) => info!(url = %client.url(), "Connected"),
                Some(ClientEvent::Message(inbound)) => {
                    if let Some(message) = inbound.as_message() {
                        summarize(&message, &mut dispatched);
                    }
                    print_inbound(&inbound, &types, raw);
                }
                Some(ClientEvent::Error(e)) => warn!(error = %e, "Connection error"),
                Some(ClientEvent::Close(info)) => {
                    if client.state() == ConnectionState::ClosedFinal {
                        break Err(exhausted(&client, &config));
                    }
                    warn!(
                        code = ?info.code,
                        reason = %info.reason,
                        attempt = client.reconnect_attempts(),
                        "Disconnected, reconnecting"
                    );
                }
                None => break Ok(()),
            },
        }
    };

    shared::teardown();
    result
}

fn print_inbound(inbound: &Inbound, types: &[String], raw: bool) {
    match inbound {
        Inbound::Structured(value) => {
            let kind = value.get("type").and_then(Value::as_str);
            if types.is_empty() || kind.is_some_and(|k| types.iter().any(|t| t == k)) {
                println!("{}", value);
            }
        }
        Inbound::Raw(text) if raw => println!("{}", text),
        Inbound::Raw(text) => debug!(frame = %text, "Skipping non-JSON frame"),
    }
}

/// Log a one-line summary for results of tasks seen being dispatched
fn summarize(message: &WsMessage, dispatched: &mut HashMap<String, String>) {
    match message.kind {
        MessageKind::TaskDispatch => {
            if let Ok(event) = message.decode_data::<TaskDispatchEvent>() {
                dispatched.insert(event.execution_id, event.task.task_type);
            }
        }
        MessageKind::ResultReport => {
            let Ok(event) = message.decode_data::<ResultReportEvent>() else { return };
            let Some(task_type) = dispatched.remove(&event.execution_id) else { return };
            match TestResult::decode(&task_type, &event.result) {
                Ok(result) => info!(
                    probe_id = %event.probe_id,
                    execution_id = %event.execution_id,
                    "{}",
                    result.summary()
                ),
                Err(e) => debug!(error = %e, "Could not decode result"),
            }
        }
        _ => {}
    }
}

// ─────────────────────────────────────────────────────────────────
// send
// ─────────────────────────────────────────────────────────────────

async fn send(config: LinkConfig, kind: String, data: String, timeout: Duration) -> anyhow::Result<()> {
    let data: Value = serde_json::from_str(&data).context("--data must be valid JSON")?;
    let message = WsMessage::new(kind.as_str(), data);

    let client = EventClient::new(config.client_config());
    let mut events = subscribe(&client);
    client.connect();

    let opened = tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Open => return true,
                ClientEvent::Error(e) => warn!(error = %e, "Connection error"),
                ClientEvent::Close(_) if client.state() == ConnectionState::ClosedFinal => return false,
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !opened {
        client.close();
        return Err(Error::connection_failed(client.url(), "connection did not open").into());
    }

    client.send_message(&message)?;
    client.close();

    // The close handshake queues behind the frame, so waiting for it flushes the send
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let ClientEvent::Close(_) = event {
                break;
            }
        }
    })
    .await;
    if closed.is_err() {
        warn!("Timed out waiting for the connection to close");
    }

    info!(kind = %message.kind, request_id = ?message.request_id, "Message sent");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// probe
// ─────────────────────────────────────────────────────────────────

async fn probe(config: LinkConfig) -> anyhow::Result<()> {
    let probe_id = session::resolve_probe_id(&config.probe_id_path());
    let identity = config.probe_identity(probe_id);

    let client = shared::get_or_create(config.client_config());
    let (session, mut events) = ProbeSession::start(&client, identity, config.heartbeat_interval());

    info!(
        probe_id = %session.probe_id(),
        name = %session.identity().name,
        url = %client.url(),
        "Starting probe session"
    );
    client.connect();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break Ok(());
            }

            event = events.recv() => match event {
                Some(SessionEvent::Connected) => info!("Connected, registration sent"),
                Some(SessionEvent::Registered(ack)) => {
                    info!(
                        probe_id = %ack.probe_id,
                        max_concurrent_tasks = ack.config.max_concurrent_tasks,
                        "Registered with server"
                    );
                }
                Some(SessionEvent::RegistrationRejected(reason)) => {
                    error!(reason = %reason, "Registration rejected");
                    break Err(anyhow!("registration rejected: {}", reason));
                }
                Some(SessionEvent::TaskAssigned(task)) => {
                    // Test executors are not part of this binary
                    warn!(task_id = %task.task_id, task_type = %task.task_type, "No executor for task");
                    let result = TaskResult {
                        execution_id: task.execution_id,
                        task_id: task.task_id,
                        probe_id: String::new(),
                        status: ExecutionOutcome::Failed,
                        result_data: Value::Null,
                        error: Some(format!("unsupported task type: {}", task.task_type)),
                        duration: 0,
                    };
                    if let Err(e) = session.report_result(result) {
                        warn!(error = %e, "Failed to report task result");
                    }
                }
                Some(SessionEvent::TaskCancelled(cancel)) => {
                    info!(execution_id = %cancel.execution_id, reason = %cancel.reason, "Task cancelled");
                }
                Some(SessionEvent::HeartbeatAck(ack)) => {
                    debug!(next_heartbeat = ack.next_heartbeat, "Heartbeat acknowledged");
                }
                Some(SessionEvent::ConfigUpdated(update)) => {
                    info!(
                        heartbeat_interval = update.heartbeat_interval,
                        max_concurrent_tasks = update.max_concurrent_tasks,
                        "Server pushed configuration"
                    );
                }
                Some(SessionEvent::ServerError(err)) => {
                    warn!(code = %err.code, message = %err.message, "Server error");
                }
                Some(SessionEvent::Disconnected(info)) => {
                    if client.state() == ConnectionState::ClosedFinal {
                        break Err(exhausted(&client, &config));
                    }
                    warn!(code = ?info.code, reason = %info.reason, "Disconnected from server");
                }
                None => break Ok(()),
            },
        }
    };

    session.stop();
    shared::teardown();
    result
}

// ─────────────────────────────────────────────────────────────────
// config
// ─────────────────────────────────────────────────────────────────

fn handle_config_command(subcommand: ConfigSubcommand) -> anyhow::Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = LinkConfig::load(config.as_deref())?;
            println!("# resolved url: {}", cfg.resolved_url());
            println!("{}", toml::to_string_pretty(&cfg.redacted()).map_err(Error::from)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let path = config::init_config(path.as_deref(), force)?;
            println!("Configuration file created: {}", path.display());
        }
        ConfigSubcommand::Validate { config } => {
            LinkConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
