//! WebSocket connection manager with a bounded reconnect supervisor.
//!
//! [`RealtimeClient::connect`] dials the realtime endpoint, then runs three
//! tasks for the lifetime of the session:
//!
//! - **reader**: one frame at a time into the [`EventDispatcher`]; on any
//!   read error or close it marks the link lost and signals the supervisor
//! - **writer**: drains the outbound queue (channel joins) and sends a
//!   protocol-level ping on a fixed interval; a failed write also marks the
//!   link lost
//! - **supervisor**: one long-lived task that waits for link-lost signals
//!   and reconnects in a bounded loop with linear backoff
//!   (`attempt × reconnect_delay`), giving up after `max_reconnects`
//!   consecutive failures
//!
//! The supervisor holds the session's [`CancellationToken`]. Reader and
//! writer hold a child token per link, cancelled when that link is lost.
//! The session token is cancelled only by [`RealtimeClient::disconnect`] or
//! when reconnection gives up.
//!
//! # Example
//!
//! ```rust,ignore
//! use tasklane_api::realtime::{RealtimeClient, RealtimeConfig};
//!
//! let config = RealtimeConfig::new(url, api_key);
//! let (client, mut events) = RealtimeClient::new(config);
//! client.connect().await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.kind());
//! }
//!
//! client.disconnect();
//! ```

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use url::Url;

use super::dispatch::{EventDispatcher, JoinStatus};
use super::event::RealtimeEvent;
use super::protocol::{Envelope, realtime_url, redacted, topic_for};
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const OUTBOUND_QUEUE_CAPACITY: usize = 32;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ── RealtimeConfig ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Service base URL (`http(s)://host`); the WebSocket URL is derived from it.
    pub url: Url,

    pub api_key: SecretString,

    /// Tables to join, e.g. `["tasks", "projects"]`.
    pub tables: Vec<String>,

    /// Consecutive reconnect attempts before giving up. Default: 5.
    pub max_reconnects: u32,

    /// Linear backoff step between reconnect attempts. Default: 2s.
    pub reconnect_delay: Duration,

    /// Interval between protocol-level pings. Default: 30s.
    pub ping_interval: Duration,

    /// Capacity of the bounded event channel. Default: 100.
    pub event_buffer: usize,
}

impl RealtimeConfig {
    pub fn new(url: Url, api_key: SecretString) -> Self {
        Self {
            url,
            api_key,
            tables: vec!["tasks".into(), "projects".into()],
            max_reconnects: 5,
            reconnect_delay: Duration::from_secs(2),
            ping_interval: Duration::from_secs(30),
            event_buffer: 100,
        }
    }
}

// ── ConnectionPhase ──────────────────────────────────────────────────

/// Observable lifecycle phase of the realtime link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

// ── Shared state ─────────────────────────────────────────────────────

/// Lives from the first `connect()` until `disconnect()` or reconnect
/// exhaustion.
struct Session {
    id: u64,
    cancel: CancellationToken,
    reconnect_tx: mpsc::Sender<String>,
}

/// What a connect attempt or the supervisor holds of its session.
#[derive(Clone)]
struct SessionRef {
    id: u64,
    cancel: CancellationToken,
}

/// One physical socket.
struct Link {
    generation: u64,
    cancel: CancellationToken,
    outbound: mpsc::Sender<Message>,
}

struct LinkState {
    connected: bool,
    phase: ConnectionPhase,
    reconnect_count: u32,
    generation: u64,
    sessions: u64,
    session: Option<Session>,
    link: Option<Link>,
}

impl LinkState {
    /// `true` while `session` is the live session.
    fn is_current(&self, session: &SessionRef) -> bool {
        !session.cancel.is_cancelled() && self.session.as_ref().is_some_and(|s| s.id == session.id)
    }
}

struct Inner {
    config: RealtimeConfig,
    dispatcher: EventDispatcher,
    state: RwLock<LinkState>,
}

// ── RealtimeClient ───────────────────────────────────────────────────

/// Handle to the realtime feed.
///
/// Cheaply cloneable. Background tasks keep running until
/// [`disconnect`](Self::disconnect) is called or reconnection gives up.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    /// Create a client and the receiving end of its bounded event channel.
    /// Does not connect.
    pub fn new(config: RealtimeConfig) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (dispatcher, events) = EventDispatcher::new(config.event_buffer);
        let inner = Inner {
            config,
            dispatcher,
            state: RwLock::new(LinkState {
                connected: false,
                phase: ConnectionPhase::Disconnected,
                reconnect_count: 0,
                generation: 0,
                sessions: 0,
                session: None,
                link: None,
            }),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events,
        )
    }

    /// Dial the realtime endpoint, start the reader/writer tasks, and send
    /// one join per configured table.
    ///
    /// Join acknowledgments are not awaited. No-op if already connected.
    pub async fn connect(&self) -> Result<(), Error> {
        if self.is_connected() {
            return Ok(());
        }

        let (session, created) = self.inner.ensure_session();
        match self.inner.establish(&session).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if created {
                    self.disconnect();
                }
                Err(e)
            }
        }
    }

    /// Stop all background tasks and close the socket. Idempotent.
    pub fn disconnect(&self) {
        let stopped = {
            let mut st = self.inner.write();
            st.connected = false;
            st.phase = ConnectionPhase::Disconnected;
            st.reconnect_count = 0;
            // Tokens are cancelled before the lock is released.
            if let Some(link) = st.link.take() {
                link.cancel.cancel();
            }
            let session = st.session.take();
            if let Some(ref session) = session {
                session.cancel.cancel();
            }
            session.is_some()
        };

        if stopped {
            info!("realtime client disconnected");
        }
        self.inner.dispatcher.clear_subscriptions();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().connected
    }

    /// `true` from a successful `connect()` until `disconnect()` or until
    /// reconnection gives up.
    pub fn is_running(&self) -> bool {
        self.inner.read().session.is_some()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.inner.read().phase
    }

    /// Reconnect attempts since the last successful connection.
    pub fn reconnect_count(&self) -> u32 {
        self.inner.read().reconnect_count
    }

    /// Join acknowledgment state per topic.
    pub fn subscriptions(&self) -> Vec<(String, JoinStatus)> {
        self.inner.dispatcher.subscriptions()
    }

    /// Events dropped because the consumer fell behind.
    pub fn dropped_events(&self) -> u64 {
        self.inner.dispatcher.dropped_events()
    }
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, LinkState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LinkState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live session, starting one (and its supervisor) if none
    /// is running. The flag is `true` when a new session was created.
    fn ensure_session(self: &Arc<Self>) -> (SessionRef, bool) {
        let mut st = self.write();
        if let Some(ref session) = st.session {
            if !session.cancel.is_cancelled() {
                let live = SessionRef {
                    id: session.id,
                    cancel: session.cancel.clone(),
                };
                return (live, false);
            }
        }

        st.sessions += 1;
        let session = SessionRef {
            id: st.sessions,
            cancel: CancellationToken::new(),
        };
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        st.session = Some(Session {
            id: session.id,
            cancel: session.cancel.clone(),
            reconnect_tx,
        });
        st.reconnect_count = 0;
        drop(st);

        tokio::spawn(
            supervise(Arc::clone(self), session.clone(), reconnect_rx)
                .instrument(info_span!("realtime_supervisor", session = session.id)),
        );
        (session, true)
    }

    /// Perform one handshake and start the per-link tasks.
    async fn establish(self: &Arc<Self>, session: &SessionRef) -> Result<(), Error> {
        let url = realtime_url(&self.config.url, &self.config.api_key)?;
        self.write().phase = ConnectionPhase::Connecting;
        info!(url = %redacted(&url), "connecting to realtime feed");

        let dialed = tokio::select! {
            biased;
            () = session.cancel.cancelled() => None,
            result = tokio_tungstenite::connect_async(url.as_str()) => Some(result),
        };

        let ws = match dialed {
            Some(Ok((ws, _response))) => ws,
            Some(Err(e)) => {
                self.write().phase = ConnectionPhase::Disconnected;
                return Err(Error::WebSocketConnect(e.to_string()));
            }
            None => return Err(Error::WebSocketConnect("connect cancelled".into())),
        };

        let (sink, source) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let link_cancel = session.cancel.child_token();

        let generation = {
            let mut st = self.write();
            if !st.is_current(session) {
                return Err(Error::WebSocketConnect("connect cancelled".into()));
            }
            if let Some(stale) = st.link.take() {
                stale.cancel.cancel();
            }
            st.generation += 1;
            st.connected = true;
            st.phase = ConnectionPhase::Connected;
            st.reconnect_count = 0;
            st.link = Some(Link {
                generation: st.generation,
                cancel: link_cancel.clone(),
                outbound: outbound_tx,
            });
            st.generation
        };
        info!(generation, "realtime feed connected");

        let span = info_span!("realtime_link", generation);
        tokio::spawn(
            write_loop(
                sink,
                outbound_rx,
                link_cancel.clone(),
                self.config.ping_interval,
                Arc::clone(self),
                generation,
            )
            .instrument(span.clone()),
        );
        tokio::spawn(
            read_loop(source, Arc::clone(self), link_cancel, generation).instrument(span),
        );

        self.dispatcher.publish(RealtimeEvent::Connected);
        self.join_tables();
        Ok(())
    }

    /// Queue one `phx_join` per configured table on the current link.
    fn join_tables(&self) {
        let Some(outbound) = self.read().link.as_ref().map(|link| link.outbound.clone()) else {
            return;
        };

        for table in &self.config.tables {
            let topic = topic_for(table);
            let join = Envelope::join(topic.clone());
            let text = match serde_json::to_string(&join) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, topic = %topic, "failed to encode join message");
                    continue;
                }
            };

            // Tracked before sending so a fast reply finds the topic.
            self.dispatcher.mark_pending(&topic);
            if outbound.try_send(Message::text(text)).is_ok() {
                debug!(topic = %topic, "channel join queued");
            } else {
                warn!(topic = %topic, "outbound queue unavailable, join not sent");
            }
        }
    }

    /// Tear down the link identified by `generation` and ask the
    /// supervisor to reconnect. Only the first caller per link acts.
    fn link_lost(&self, generation: u64, reason: String) {
        let reconnect_tx = {
            let mut st = self.write();
            let current = st
                .link
                .as_ref()
                .is_some_and(|link| link.generation == generation);
            if !current {
                return;
            }
            if let Some(link) = st.link.take() {
                link.cancel.cancel();
            }
            st.connected = false;
            st.phase = ConnectionPhase::Disconnected;
            st.session.as_ref().map(|s| s.reconnect_tx.clone())
        };

        warn!(generation, reason = %reason, "realtime connection lost");
        self.dispatcher.publish(RealtimeEvent::Disconnected {
            reason: reason.clone(),
        });

        if let Some(tx) = reconnect_tx {
            if tx.try_send(reason).is_err() {
                debug!("reconnect already pending");
            }
        }
    }

    /// Bounded reconnect loop. Returns `true` once connected, `false` if
    /// cancelled or the attempt budget is exhausted.
    async fn reconnect(self: &Arc<Self>, session: &SessionRef) -> bool {
        loop {
            let attempt = {
                let mut st = self.write();
                if !st.is_current(session) {
                    return false;
                }
                if st.connected {
                    return true;
                }
                if st.reconnect_count >= self.config.max_reconnects {
                    st.phase = ConnectionPhase::Disconnected;
                    st.reconnect_count = 0;
                    if let Some(live) = st.session.take() {
                        live.cancel.cancel();
                    }
                    None
                } else {
                    st.reconnect_count += 1;
                    st.phase = ConnectionPhase::Reconnecting {
                        attempt: st.reconnect_count,
                    };
                    Some(st.reconnect_count)
                }
            };

            let Some(attempt) = attempt else {
                error!(
                    max_reconnects = self.config.max_reconnects,
                    "realtime reconnect limit reached, giving up"
                );
                return false;
            };

            let delay = self.config.reconnect_delay * attempt;
            info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = session.cancel.cancelled() => return false,
                () = tokio::time::sleep(delay) => {}
            }

            match self.establish(session).await {
                Ok(()) => {
                    info!(attempt, "realtime feed reconnected");
                    return true;
                }
                Err(e) => warn!(error = %e, attempt, "reconnect attempt failed"),
            }
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Waits for link-lost signals and drives [`Inner::reconnect`].
async fn supervise(inner: Arc<Inner>, session: SessionRef, mut signals: mpsc::Receiver<String>) {
    loop {
        let reason = tokio::select! {
            biased;
            () = session.cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(reason) => reason,
                None => break,
            },
        };

        debug!(reason = %reason, "reconnect requested");
        if !inner.reconnect(&session).await {
            break;
        }
    }
    debug!("reconnect supervisor exiting");
}

async fn read_loop(
    mut source: WsSource,
    inner: Arc<Inner>,
    cancel: CancellationToken,
    generation: u64,
) {
    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                trace!("reader stopping");
                return;
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => inner.dispatcher.dispatch(&text),
                Some(Ok(Message::Close(frame))) => break close_reason(frame.as_ref()),
                Some(Ok(Message::Binary(bytes))) => {
                    debug!(len = bytes.len(), "ignoring binary frame");
                }
                // tungstenite answers pings itself
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_owned(),
            },
        }
    };

    inner.link_lost(generation, reason);
}

async fn write_loop(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    ping_interval: Duration,
    inner: Arc<Inner>,
    generation: u64,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let failure = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
                    debug!("close handshake timed out");
                }
                trace!("writer stopping");
                return;
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else { return };
                if let Err(e) = sink.send(msg).await {
                    break e.to_string();
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    break e.to_string();
                }
                trace!("ping sent");
            }
        }
    };

    warn!(error = %failure, "realtime write failed");
    inner.link_lost(generation, failure);
}

fn close_reason(frame: Option<&CloseFrame>) -> String {
    frame.map_or_else(
        || "closed by server".to_owned(),
        |cf| format!("closed by server (code {}): {}", cf.code, cf.reason),
    )
}
