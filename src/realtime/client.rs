//! Client side of the real-time channel.
//!
//! [`RealtimeClient::spawn`] runs one background task that owns the
//! connection. It follows [`ChannelStateMachine`]: connect, stream events
//! to subscribers until the connection faults, publish the disconnect,
//! wait out the backoff and try again, for as long as the client lives.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event::ChangeEvent;
use super::state::{Backoff, ChannelEffect, ChannelSignal, ChannelStateMachine};
use crate::config::{ChannelConfig, TlsMode};

/// Events buffered per subscriber before a slow one starts skipping.
const SUBSCRIBER_CAPACITY: usize = 100;

/// Channel faults. None of them is fatal; each one sends the client back
/// to `Disconnected` and into backoff.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Failed to connect to {url}: {message}")]
    #[diagnostic(code(dashboard::channel::connect))]
    Connect { url: String, message: String },

    #[error("Connect attempt timed out after {after:?}")]
    #[diagnostic(code(dashboard::channel::timeout))]
    Timeout { after: Duration },

    #[error("Channel transport error: {message}")]
    #[diagnostic(code(dashboard::channel::transport))]
    Transport { message: String },

    #[error("No traffic on the channel for {after:?}")]
    #[diagnostic(code(dashboard::channel::stalled))]
    Stalled { after: Duration },

    #[error("Channel closed by server")]
    #[diagnostic(code(dashboard::channel::closed))]
    Closed,

    #[error("Refusing unencrypted channel endpoint {url}")]
    #[diagnostic(
        code(dashboard::channel::insecure),
        help("TLS_MODE=require only accepts wss:// endpoints")
    )]
    InsecureEndpoint { url: String },
}

/// One unit of traffic on an open connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFrame {
    Event(ChangeEvent),
    /// Pings, pongs and anything else that proves the peer is still there
    Keepalive,
}

impl From<ChangeEvent> for ChannelFrame {
    fn from(event: ChangeEvent) -> Self {
        ChannelFrame::Event(event)
    }
}

/// Frames from one open connection. Ends (or yields an error) when the
/// connection goes away.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ChannelFrame, ChannelError>> + Send>>;

/// Opens connections to the server.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<EventStream, ChannelError>> + Send;
}

/// WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    tls_mode: TlsMode,
}

impl WsConnector {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            url: config.url.clone(),
            tls_mode: config.tls_mode,
        }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> impl Future<Output = Result<EventStream, ChannelError>> + Send {
        let url = self.url.clone();
        let tls_mode = self.tls_mode;
        async move {
            if tls_mode == TlsMode::Require && !url.starts_with("wss://") {
                return Err(ChannelError::InsecureEndpoint { url });
            }

            let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| ChannelError::Connect {
                    url: url.clone(),
                    message: e.to_string(),
                })?;

            let events = socket.map(|message| match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<ChangeEvent>(&text) {
                    Ok(event) => Ok(ChannelFrame::Event(event)),
                    Err(e) => {
                        warn!("Ignoring malformed change event: {}", e);
                        Ok(ChannelFrame::Keepalive)
                    }
                },
                Ok(Message::Close(_)) => Err(ChannelError::Closed),
                Ok(_) => Ok(ChannelFrame::Keepalive),
                Err(e) => Err(ChannelError::Transport {
                    message: e.to_string(),
                }),
            });
            Ok(Box::pin(events) as EventStream)
        }
    }
}

/// Handle to the background connection task.
///
/// Dropping the client stops the task; subscriptions then see the event
/// stream end and the connection flag go false.
pub struct RealtimeClient {
    events: broadcast::Sender<ChangeEvent>,
    live: watch::Receiver<bool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    /// Start connecting in the background.
    pub fn spawn<C: Connector>(connector: C, config: ChannelConfig) -> Self {
        let (events, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        let (live_tx, live) = watch::channel(false);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            connector,
            config,
            events.clone(),
            live_tx,
            cancel.clone(),
        ));

        Self {
            events,
            live,
            cancel,
            task: Some(task),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            events: self.events.subscribe(),
            connected: self.live.clone(),
        }
    }

    /// Register a callback for every event. The callback runs on its own
    /// task until the returned handle is cancelled or dropped.
    pub fn on_update<F>(&self, mut on_update: F) -> SubscriptionHandle
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        SubscriptionHandle::spawn(move |cancel| async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = subscription.recv() => match event {
                        Some(event) => on_update(event),
                        None => break,
                    },
                }
            }
        })
    }

    pub fn is_connected(&self) -> bool {
        *self.live.borrow()
    }

    /// Stop the connection task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One consumer's view of the channel: the event stream plus the live flag.
pub struct Subscription {
    events: broadcast::Receiver<ChangeEvent>,
    connected: watch::Receiver<bool>,
}

impl Subscription {
    /// Next event, or `None` once the client has shut down. Events a slow
    /// subscriber missed are skipped; they are refresh hints only.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagged, skipped {} change events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Receiver for the live flag, for consumers that track transitions.
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// End the subscription.
    pub fn unsubscribe(self) {}
}

/// Cancel handle for a consumer task.
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(body(cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel and wait for the task to stop.
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<C: Connector>(
    connector: C,
    config: ChannelConfig,
    events: broadcast::Sender<ChangeEvent>,
    live: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut machine = ChannelStateMachine::new(Backoff::new(
        config.backoff_base,
        config.backoff_max,
    ));
    let mut effects = machine.handle(ChannelSignal::Start);

    'session: loop {
        let mut connect = false;
        let mut delay = None;
        for effect in effects.drain(..) {
            match effect {
                ChannelEffect::OpenConnection => connect = true,
                ChannelEffect::SetLive(is_live) => {
                    live.send_replace(is_live);
                    if !is_live {
                        info!("Real-time channel disconnected, consumers fall back to polling");
                    }
                }
                ChannelEffect::ScheduleReconnect(after) => delay = Some(after),
            }
        }

        if let Some(after) = delay {
            debug!("Reconnecting in {:?}", after);
            tokio::select! {
                _ = cancel.cancelled() => break 'session,
                _ = tokio::time::sleep(after) => {}
            }
            effects = machine.handle(ChannelSignal::RetryDue);
            continue;
        }

        if !connect {
            break;
        }

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break 'session,
            attempt = tokio::time::timeout(config.connect_timeout, connector.connect()) => attempt,
        };
        let mut stream = match attempt {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Real-time connect failed: {}", e);
                effects = machine.handle(ChannelSignal::Fault);
                continue;
            }
            Err(_) => {
                warn!(
                    "{}",
                    ChannelError::Timeout {
                        after: config.connect_timeout
                    }
                );
                effects = machine.handle(ChannelSignal::Fault);
                continue;
            }
        };

        if machine
            .handle(ChannelSignal::Connected)
            .contains(&ChannelEffect::SetLive(true))
        {
            live.send_replace(true);
            info!("Real-time channel connected");
        }

        // Restarted on every frame, so it bounds silence rather than session length
        let deadline = config.keepalive_timeout;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'session,
                item = tokio::time::timeout(deadline, stream.next()) => match item {
                    Ok(Some(Ok(ChannelFrame::Event(event)))) => {
                        debug!(
                            "Change event: {} {} {:?}",
                            event.entity_type, event.entity_id, event.operation
                        );
                        let _ = events.send(event);
                    }
                    Ok(Some(Ok(ChannelFrame::Keepalive))) => {}
                    Ok(Some(Err(e))) => {
                        warn!("Real-time channel fault: {}", e);
                        break;
                    }
                    Ok(None) => {
                        warn!("Real-time channel closed");
                        break;
                    }
                    Err(_) => {
                        warn!(
                            "Real-time channel fault: {}",
                            ChannelError::Stalled { after: deadline }
                        );
                        break;
                    }
                },
            }
        }
        effects = machine.handle(ChannelSignal::Fault);
    }

    live.send_replace(false);
    debug!("Real-time client stopped");
}
