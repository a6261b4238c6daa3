use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use shared::{
    protocol::{
        decode_inbound, InboundMessage, OutboundRequest, ReplyOutcome, KLIPPY_READY_NOTIFICATION,
    },
    StatePath,
};
use state_sync::Dispatcher;
use tokio::{
    net::TcpStream,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};
use url::Url;

pub mod backoff;
pub mod error;
pub mod routing;
pub mod session;
pub mod settings;

pub use backoff::{Backoff, BackoffPolicy};
pub use error::ConnectionError;
pub use routing::NotificationRouter;
pub use session::SessionState;
pub use settings::{ConnectionSettings, QueuePolicy};

type DaemonSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where panels push their commands.
pub trait CommandSink: Send + Sync {
    fn send_command(&self, script: &str) -> Result<(), ConnectionError>;
}

/// Stand-in for panels built before a daemon connection exists.
pub struct MissingCommandSink;

impl CommandSink for MissingCommandSink {
    fn send_command(&self, _script: &str) -> Result<(), ConnectionError> {
        Err(ConnectionError::ConnectionUnavailable {
            state: SessionState::Disconnected,
        })
    }
}

/// Persistent websocket session with the control daemon.
///
/// One session task reads frames and feeds the [`Dispatcher`]; commands
/// from any thread go through [`ConnectionManager::send_command`], which only
/// touches the outbound lock and never waits on a dispatch cycle.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    url: Url,
    dispatcher: Arc<Dispatcher>,
    router: NotificationRouter,
    outbound: Mutex<Outbound>,
    state: watch::Sender<SessionState>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
}

/// Everything guarded together with the session state: state transitions
/// happen with this lock held, so `send_command` sees a writer exactly when
/// the state says `Connected`.
struct Outbound {
    writer: Option<mpsc::Sender<String>>,
    /// Command scripts waiting for a connection; numbered when flushed.
    queued: VecDeque<String>,
    subscriptions: Map<String, Value>,
    pending_subscribes: HashSet<u64>,
    next_id: u64,
}

impl Outbound {
    /// Numbers and writes one request. Every write goes through here with
    /// the outbound lock held, and an id is only used up once its frame is
    /// accepted, so ids reach the socket strictly increasing.
    fn write(
        &mut self,
        request: impl FnOnce(u64) -> OutboundRequest,
    ) -> Result<u64, ConnectionError> {
        let id = self.next_id;
        let text = request(id).encode()?;
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| ConnectionError::TransportClosed("no active session".to_string()))?;
        writer.try_send(text).map_err(|err| match err {
            TrySendError::Full(_) => ConnectionError::OutboundFull {
                capacity: writer.max_capacity(),
            },
            TrySendError::Closed(_) => {
                ConnectionError::TransportClosed("socket writer stopped".to_string())
            }
        })?;
        self.next_id += 1;
        Ok(id)
    }
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Arc<Self>, ConnectionError> {
        let url = daemon_url(&settings.url)?;
        let status_root =
            StatePath::parse(&settings.status_root).map_err(|err| {
                ConnectionError::InvalidStatusRoot {
                    root: settings.status_root.clone(),
                    reason: err.to_string(),
                }
            })?;
        let subscriptions = settings
            .subscribe_objects
            .iter()
            .map(|object| (object.clone(), Value::Null))
            .collect();
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            router: NotificationRouter::new(status_root),
            settings,
            url,
            dispatcher,
            outbound: Mutex::new(Outbound {
                writer: None,
                queued: VecDeque::new(),
                subscriptions,
                pending_subscribes: HashSet::new(),
                next_id: 1,
            }),
            state,
            shutdown,
            started: AtomicBool::new(false),
        }))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Spawns the session task. A manager runs at most one session.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, ConnectionError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ConnectionError::AlreadyStarted);
        }
        let manager = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        Ok(tokio::spawn(async move { manager.run(shutdown).await }))
    }

    /// Stops the session task. The dispatcher and its store are untouched.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let mut outbound = self.outbound.lock();
        self.transition(&mut outbound, SessionState::Disconnected);
    }

    /// Sends an opaque command script without waiting for the reply.
    pub fn send_command(&self, script: &str) -> Result<(), ConnectionError> {
        let mut outbound = self.outbound.lock();
        let state = self.state();
        match state {
            SessionState::Connected => {
                let id = outbound
                    .write(|id| {
                        OutboundRequest::command(&self.settings.command_method, script, id)
                    })
                    .map_err(|err| match err {
                        ConnectionError::TransportClosed(_) => {
                            ConnectionError::ConnectionUnavailable { state }
                        }
                        other => other,
                    })?;
                debug!(id, "command sent");
                Ok(())
            }
            SessionState::Connecting | SessionState::Reconnecting
                if self.settings.queue_policy == QueuePolicy::QueueAndFlush =>
            {
                if outbound.queued.len() >= self.settings.max_queued_commands.max(1) {
                    outbound.queued.pop_front();
                    warn!(
                        limit = self.settings.max_queued_commands,
                        "command queue full; evicting oldest command"
                    );
                }
                outbound.queued.push_back(script.to_string());
                debug!(%state, queued = outbound.queued.len(), "command queued until reconnect");
                Ok(())
            }
            state => {
                debug!(%state, "command rejected; daemon not connected");
                Err(ConnectionError::ConnectionUnavailable { state })
            }
        }
    }

    /// Adds printer objects to the subscription set. All fields of each
    /// object are subscribed. The full set is sent right away when
    /// connected and again on every reconnect.
    pub fn subscribe<I, S>(&self, objects: I) -> Result<(), ConnectionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut outbound = self.outbound.lock();
        for object in objects {
            outbound.subscriptions.insert(object.into(), Value::Null);
        }
        if outbound.writer.is_some() {
            self.send_subscriptions(&mut outbound)?;
        }
        Ok(())
    }

    /// Subscribes only the listed fields of `object`.
    pub fn subscribe_fields(&self, object: &str, fields: &[&str]) -> Result<(), ConnectionError> {
        let mut outbound = self.outbound.lock();
        let fields = fields.iter().map(|f| Value::String(f.to_string())).collect();
        outbound
            .subscriptions
            .insert(object.to_string(), Value::Array(fields));
        if outbound.writer.is_some() {
            self.send_subscriptions(&mut outbound)?;
        }
        Ok(())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.outbound.lock().subscriptions.keys().cloned().collect()
    }

    /// Room for the subscribe request plus a full flushed queue.
    fn outbound_capacity(&self) -> usize {
        self.settings
            .outbound_capacity
            .max(self.settings.max_queued_commands.max(1) + 1)
    }

    fn transition(&self, outbound: &mut Outbound, next: SessionState) {
        if !next.is_connected() {
            outbound.writer = None;
            outbound.pending_subscribes.clear();
        }
        if next == SessionState::Disconnected {
            outbound.queued.clear();
        }
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, url = %self.url, "daemon session state changed");
        }
    }

    fn send_subscriptions(&self, outbound: &mut Outbound) -> Result<(), ConnectionError> {
        if outbound.subscriptions.is_empty() || outbound.writer.is_none() {
            return Ok(());
        }
        let subscriptions = outbound.subscriptions.clone();
        let objects = subscriptions.len();
        match outbound.write(|id| OutboundRequest::subscribe(subscriptions, id)) {
            Ok(id) => {
                outbound.pending_subscribes.insert(id);
                debug!(id, objects, "subscription requested");
                Ok(())
            }
            Err(err @ ConnectionError::Encode(_)) => Err(err),
            Err(err) => {
                warn!(%err, "subscription request not written");
                Ok(())
            }
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.settings.backoff);
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.transition(&mut self.outbound.lock(), SessionState::Connecting);

            let connected = tokio::select! {
                result = connect_async(self.url.as_str()) => result,
                _ = shutdown.wait_for(|stop| *stop) => break,
            };
            match connected {
                Ok((socket, _)) => {
                    backoff.reset();
                    match self.drive(socket, &mut shutdown).await {
                        Ok(()) => break,
                        Err(err) => warn!(url = %self.url, %err, "daemon connection lost"),
                    }
                }
                Err(err) => warn!(url = %self.url, %err, "failed to connect to daemon"),
            }

            if *shutdown.borrow() {
                break;
            }
            self.transition(&mut self.outbound.lock(), SessionState::Reconnecting);
            let delay = backoff.next_delay();
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = backoff.attempts(),
                "reconnecting to daemon"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
        self.transition(&mut self.outbound.lock(), SessionState::Disconnected);
    }

    /// Runs one connected session. `Ok` means shutdown was requested; any
    /// other end of the session is `TransportClosed`.
    async fn drive(
        &self,
        socket: DaemonSocket,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ConnectionError> {
        let (mut sink, mut source) = socket.split();
        let (writer, mut outgoing) = mpsc::channel::<String>(self.outbound_capacity());
        let write_task = tokio::spawn(async move {
            while let Some(text) = outgoing.recv().await {
                if let Err(err) = sink.send(Message::Text(text)).await {
                    warn!(%err, "failed to write to daemon");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        self.attach(writer)?;

        let result = loop {
            let frame = tokio::select! {
                frame = source.next() => frame,
                _ = shutdown.wait_for(|stop| *stop) => break Ok(()),
            };
            match frame {
                Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => self.handle_frame(&text),
                    Err(err) => warn!(%err, "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by daemon".to_string());
                    break Err(ConnectionError::TransportClosed(reason));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break Err(ConnectionError::TransportClosed(err.to_string())),
                None => {
                    break Err(ConnectionError::TransportClosed(
                        "stream ended".to_string(),
                    ))
                }
            }
        };

        {
            let mut outbound = self.outbound.lock();
            if result.is_err() {
                self.transition(&mut outbound, SessionState::Reconnecting);
            } else {
                outbound.writer = None;
                outbound.pending_subscribes.clear();
            }
        }
        if result.is_ok() {
            // Give the writer a chance to send the close frame.
            let _ = write_task.await;
        } else {
            write_task.abort();
        }
        result
    }

    fn attach(&self, writer: mpsc::Sender<String>) -> Result<(), ConnectionError> {
        let mut outbound = self.outbound.lock();
        outbound.writer = Some(writer);
        self.send_subscriptions(&mut outbound)?;

        let mut flushed = 0usize;
        while let Some(script) = outbound.queued.pop_front() {
            let written = outbound.write(|id| {
                OutboundRequest::command(&self.settings.command_method, &script, id)
            });
            match written {
                Ok(_) => flushed += 1,
                Err(err) => warn!(%err, "dropping queued command"),
            }
        }
        if flushed > 0 {
            info!(flushed, "flushed commands queued during reconnect");
        }
        self.transition(&mut outbound, SessionState::Connected);
        Ok(())
    }

    fn handle_frame(&self, text: &str) {
        match decode_inbound(text) {
            Ok(InboundMessage::Notification { method, params }) => {
                if method == KLIPPY_READY_NOTIFICATION {
                    let mut outbound = self.outbound.lock();
                    if let Err(err) = self.send_subscriptions(&mut outbound) {
                        warn!(%err, "failed to renew subscriptions after klippy restart");
                    }
                }
                match self.router.route(&method, params) {
                    Ok(delta) if delta.is_empty() => trace!(%method, "empty notification"),
                    Ok(delta) => {
                        self.dispatcher.on_notification(delta);
                    }
                    Err(err) => warn!(%method, %err, "dropping malformed notification"),
                }
            }
            Ok(InboundMessage::Reply { id, outcome }) => self.handle_reply(id, outcome),
            Err(err) => warn!(%err, "dropping malformed daemon message"),
        }
    }

    fn handle_reply(&self, id: u64, outcome: ReplyOutcome) {
        let is_subscribe = self.outbound.lock().pending_subscribes.remove(&id);
        match (is_subscribe, outcome) {
            (true, ReplyOutcome::Result(result)) => match self.router.subscribe_reply(&result) {
                Some(Ok(delta)) => {
                    self.dispatcher.on_notification(delta);
                }
                Some(Err(err)) => warn!(id, %err, "subscription reply carried unusable status"),
                None => debug!(id, "subscription reply without status"),
            },
            (true, ReplyOutcome::Error(err)) => {
                warn!(id, code = err.code, message = %err.message, "subscription rejected")
            }
            (false, ReplyOutcome::Result(_)) => trace!(id, "command acknowledged"),
            (false, ReplyOutcome::Error(err)) => {
                warn!(id, code = err.code, message = %err.message, "daemon rejected command")
            }
        }
    }
}

impl CommandSink for ConnectionManager {
    fn send_command(&self, script: &str) -> Result<(), ConnectionError> {
        ConnectionManager::send_command(self, script)
    }
}

/// Accepts `ws(s)://` and rewrites `http(s)://`; a bare host gets the
/// daemon's `/websocket` endpoint.
pub fn daemon_url(raw: &str) -> Result<Url, ConnectionError> {
    let invalid = |reason: String| ConnectionError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let mut url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch scheme to {scheme}")))?;
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    if url.path() == "/" || url.path().is_empty() {
        url.set_path("/websocket");
    }
    Ok(url)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
