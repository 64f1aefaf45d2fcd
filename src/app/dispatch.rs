use crate::app::terminal::{TerminalSink, render_cooldown, render_event};
use crate::cli::commands::{Cli, Commands};
use anyhow::{Context, Result, bail};
use checkin_relay::{Config, RelayError};
use checkin_relay::core::{ClientEvent, StaticIdentity, StaticTags};
use checkin_relay::session::PresenceSession;
use checkin_relay::transport::relay::run_relay;
use console::style;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;

/// How long `send` waits for the relay to echo the check-in back.
const ECHO_WAIT: Duration = Duration::from_secs(3);
const WATCH_SNAPSHOT_LIMIT: usize = 20;

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    let config = Arc::new(config);
    match cli.command {
        Commands::Relay { host, port } => {
            let host = host.unwrap_or_else(|| config.relay.host.clone());
            let port = port.unwrap_or(config.relay.port);
            info!(%host, port, "starting relay");
            tokio::select! {
                result = run_relay(&host, port, Arc::clone(&config)) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("relay shutting down");
                    Ok(())
                }
            }
        }
        Commands::Watch => watch(config).await,
        Commands::Send {
            message,
            tags,
            wait_secs,
        } => send(config, &message, tags, Duration::from_secs(wait_secs)).await,
        Commands::Config => {
            let rendered = toml::to_string_pretty(&config.redacted())
                .context("serialize effective configuration")?;
            println!("# {}", config.config_path.display());
            print!("{rendered}");
            Ok(())
        }
    }
}

fn start_session(
    config: &Arc<Config>,
    tags: Vec<String>,
) -> Result<(PresenceSession, mpsc::Receiver<ClientEvent>)> {
    let client = &config.client;
    let identity = Arc::new(StaticIdentity::new(
        client.identity.clone(),
        client.avatar_ref.clone(),
        client.identity_token.clone(),
    ));
    let tags = if tags.is_empty() {
        client.tags.clone()
    } else {
        tags
    };
    PresenceSession::start(Arc::clone(config), identity, Arc::new(StaticTags(tags)))
        .context("start presence session")
}

async fn watch(config: Arc<Config>) -> Result<()> {
    let (session, events) = start_session(&config, Vec::new())?;
    session.connect().await?;

    let sink = TerminalSink::new(WATCH_SNAPSHOT_LIMIT);
    tokio::select! {
        () = session.run(events, &sink) => {}
        _ = tokio::signal::ctrl_c() => info!("watch interrupted"),
    }

    session.shutdown().await;
    Ok(())
}

async fn send(config: Arc<Config>, message: &str, tags: Vec<String>, wait: Duration) -> Result<()> {
    if config.client.identity.trim().is_empty() {
        bail!(
            "No identity configured.\n\
             Fix: set [client] identity in {} or CHECKIN_RELAY_IDENTITY.",
            config.config_path.display()
        );
    }

    let (session, mut events) = start_session(&config, tags)?;
    session.connect().await?;

    let result = send_once(&session, &mut events, message, wait).await;
    session.shutdown().await;
    result
}

async fn send_once(
    session: &PresenceSession,
    events: &mut mpsc::Receiver<ClientEvent>,
    message: &str,
    wait: Duration,
) -> Result<()> {
    // Wait for initial history so the echo check below sees a settled buffer.
    let deadline = Instant::now() + wait;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .context("timed out waiting for the relay")?
            .context("connection driver stopped")?;
        session.apply(&event);
        match &event {
            ClientEvent::HistoryReady { .. } => break,
            ClientEvent::AuthenticationFailed { reason } => {
                bail!("relay rejected credentials: {reason}")
            }
            other => {
                if let Some(line) = render_event(other) {
                    println!("{line}");
                }
            }
        }
    }

    let sent = session
        .submit(message)
        .await?
        .into_sent()
        .inspect_err(|err| {
            if let RelayError::RateLimit { remaining } = err {
                println!("{}", render_cooldown(*remaining));
            }
        })?;
    println!(
        "{} sent as {}",
        style("✓").green().bold(),
        style(&sent.identity).white().bold()
    );

    let deadline = Instant::now() + ECHO_WAIT;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        session.apply(&event);
        match event {
            ClientEvent::CheckInReceived { check_in }
                if check_in.identity == sent.identity && check_in.timestamp == sent.timestamp =>
            {
                println!("{} relay confirmed", style("✓").green().bold());
                return Ok(());
            }
            ClientEvent::RelayNotice { message } => bail!("relay refused check-in: {message}"),
            ClientEvent::AuthenticationFailed { reason } => {
                bail!("relay rejected credentials: {reason}")
            }
            _ => {}
        }
    }

    println!(
        "{} no confirmation from the relay yet",
        style("?").yellow().bold()
    );
    Ok(())
}
