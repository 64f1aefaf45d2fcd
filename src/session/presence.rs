use crate::config::Config;
use crate::core::cooldown::run_ticker;
use crate::core::snippets::pick_snippet;
use crate::core::{
    CheckIn, ClientEvent, ConnectionState, CooldownGate, DisplaySink, HistoryBuffer, HistoryEntry,
    IdentityProvider, TagSource,
};
use crate::error::{RelayError, Result, TransportError};
use crate::security::Signer;
use crate::transport::client::{ConnectionHandle, ConnectionOptions, spawn_connection};
use crate::transport::protocol::{ClientMessage, Submission};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_BUFFER: usize = 256;

/// Result of a submission that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Handed to the relay; the entry is retained locally as pending when
    /// local echo is on.
    Sent { check_in: CheckIn },
    /// Nothing was sent; try again after `remaining`.
    CoolingDown { remaining: Duration },
}

impl SubmitOutcome {
    /// The sent check-in, or [`RelayError::RateLimit`] when the cooldown
    /// held it back.
    pub fn into_sent(self) -> Result<CheckIn> {
        match self {
            Self::Sent { check_in } => Ok(check_in),
            Self::CoolingDown { remaining } => Err(RelayError::RateLimit { remaining }),
        }
    }
}

/// Everything one client process knows: its relay connection, its view of
/// the latest check-in per identity, and its own cooldown.
pub struct PresenceSession {
    config: Arc<Config>,
    connection: ConnectionHandle,
    driver: Mutex<Option<JoinHandle<()>>>,
    history: Mutex<HistoryBuffer>,
    /// Bumped on every buffer change so renderers know when to redraw.
    revision: AtomicU64,
    cooldown: Arc<Mutex<CooldownGate>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    signer: Option<Signer>,
    identity: Arc<dyn IdentityProvider>,
    tags: Arc<dyn TagSource>,
    events_tx: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
}

impl PresenceSession {
    /// Build the session and spawn its (disconnected) connection driver.
    ///
    /// The returned receiver is the single event stream; hand it to
    /// [`PresenceSession::run`] or drain it yourself.
    pub fn start(
        config: Arc<Config>,
        identity: Arc<dyn IdentityProvider>,
        tags: Arc<dyn TagSource>,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>)> {
        let options = ConnectionOptions::from_config(&config)?;
        let signer = config
            .signing_secret
            .as_deref()
            .map(Signer::new)
            .transpose()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (connection, driver) =
            spawn_connection(options, Arc::clone(&identity), events_tx.clone());

        let session = Self {
            history: Mutex::new(HistoryBuffer::new(config.max_history_size)),
            revision: AtomicU64::new(0),
            cooldown: Arc::new(Mutex::new(CooldownGate::new(config.cooldown_period()))),
            ticker: Mutex::new(None),
            driver: Mutex::new(Some(driver)),
            config,
            connection,
            signer,
            identity,
            tags,
            events_tx,
            cancel: CancellationToken::new(),
        };
        Ok((session, events_rx))
    }

    pub async fn connect(&self) -> Result<()> {
        Ok(self.connection.connect().await?)
    }

    pub async fn disconnect(&self) -> Result<()> {
        Ok(self.connection.disconnect().await?)
    }

    pub async fn reconnect(&self) -> Result<()> {
        Ok(self.connection.reconnect().await?)
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn cooldown_remaining(&self) -> Duration {
        self.cooldown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remaining()
    }

    /// Newest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Publish a check-in for the local identity.
    ///
    /// Waits for the connection driver to hand the frame to the socket. The
    /// driver blocks while the event stream is full, so a caller that only
    /// drains events on the task it submits from must not let more than the
    /// stream's capacity (256 events) pile up first; keep draining from a
    /// separate task (as [`run`](Self::run) does) when that cannot be ruled out.
    pub async fn submit(&self, message: &str) -> Result<SubmitOutcome> {
        let identity = self.identity.identity();
        let handle = identity.handle.trim();
        if handle.is_empty() {
            return Err(RelayError::Validation("identity is not set".into()));
        }

        let mut check_in = CheckIn::compose(
            handle,
            self.tags.current_tags(),
            message,
            self.config.max_message_chars,
        )
        .with_avatar(identity.avatar_ref);

        let remaining = self.cooldown_remaining();
        if !remaining.is_zero() {
            tracing::debug!(remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX), "check-in held back by cooldown");
            return Ok(SubmitOutcome::CoolingDown { remaining });
        }

        let token = tokio::time::timeout(
            self.config.client.token_timeout(),
            self.identity.identity_token(),
        )
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("identity token fetch timed out");
            None
        });
        if token.is_none() && self.config.client.require_identity_token {
            return Err(RelayError::Authentication(
                "identity token unavailable".into(),
            ));
        }

        if self.config.client.decorate {
            check_in = check_in.with_snippet(Some(pick_snippet()));
        }

        let mut submission = Submission::unsigned(check_in.clone());
        submission.auth_token = token;
        if let Some(signer) = &self.signer {
            let signature = signer.sign(&check_in);
            submission.signature = Some(signature.value);
            submission.signing_timestamp = Some(signature.signing_timestamp);
        }

        if self.connection.state() != ConnectionState::Open {
            return Err(TransportError::NotConnected.into());
        }
        self.connection
            .send(ClientMessage::Checkin(submission))
            .await?;
        tracing::info!(identity = %check_in.identity, tags = ?check_in.tags, "check-in sent");

        self.cooldown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record();
        self.start_ticker();

        if self.config.client.local_echo {
            let changed = self
                .history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .upsert_pending(check_in.clone());
            if changed {
                self.revision.fetch_add(1, Ordering::SeqCst);
            }
        }

        Ok(SubmitOutcome::Sent { check_in })
    }

    /// Fold one event into session state. Returns whether the history
    /// buffer changed.
    pub fn apply(&self, event: &ClientEvent) -> bool {
        let ClientEvent::CheckInReceived { check_in } = event else {
            return false;
        };
        let outcome = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(check_in.clone(), false);
        tracing::trace!(identity = %check_in.identity, ?outcome, "applied relay check-in");
        if outcome.changed() {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        outcome.changed()
    }

    /// The single subscriber loop: apply each event, forward it to `sink`,
    /// and redraw the snapshot whenever the buffer has moved on.
    pub async fn run(&self, mut events: mpsc::Receiver<ClientEvent>, sink: &dyn DisplaySink) {
        let mut rendered = None;
        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            self.apply(&event);
            sink.on_event(&event);

            let revision = self.revision();
            if rendered != Some(revision) {
                sink.on_snapshot(&self.snapshot());
                rendered = Some(revision);
            }
        }
    }

    /// Stop the ticker, the event loop and the connection driver.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(ticker) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            ticker.abort();
        }
        self.connection.shutdown().await;
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver
            && let Err(error) = driver.await
        {
            tracing::debug!("connection driver ended abnormally: {error}");
        }
    }

    fn start_ticker(&self) {
        let ticker = tokio::spawn(run_ticker(
            Arc::clone(&self.cooldown),
            self.events_tx.clone(),
            self.cancel.child_token(),
        ));
        if let Some(previous) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(ticker)
        {
            previous.abort();
        }
    }
}
