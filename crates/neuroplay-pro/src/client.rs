//! # Hub Client
//!
//! Async handle over one hub connection.
//!
//! All protocol state lives in a single event-loop task that owns the
//! WebSocket halves and the [`HubConnection`]. [`HubClient`] is a cheap,
//! cloneable handle that sends requests to that task; no lock guards the
//! protocol state.
//!
//! ```text
//! ┌─────────────┐   Request (mpsc)    ┌────────────────────────────────┐
//! │  HubClient  │ ──────────────────▶ │ event loop task                │
//! │ (cloneable) │ ◀────────────────── │                                │
//! └─────────────┘   reply (oneshot)   │  ws frames ───▶ HubConnection  │
//!        ▲                            │  deadlines ───▶      │         │
//!        │                            │  ws sink   ◀── frames┘         │
//!        └──── HubEvent (broadcast) ──┤  notifications                 │
//!                                     └────────────────────────────────┘
//! ```
//!
//! Each loop iteration waits on whichever comes first: a request, a frame,
//! the result of a pending connect, or the next timer deadline. Afterwards
//! the queued frames are written and the queued notifications published.
//!
//! Sends are fire-and-forget. Results arrive as [`HubEvent`]s through
//! [`HubClient::subscribe`] or [`HubClient::device_events`], or can be read
//! back from the connection state with [`HubClient::with`].

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::HubConfig;
use crate::device::{DeviceControl, DeviceStatus, GrabKind};
use crate::error::{NeuroplayError, NeuroplayResult};
use crate::events::{DeviceEvent, HubEvent};
use crate::hub::{HubConnection, HubState};
use crate::protocol::data::{ChannelsData, ChannelsRhythms, TimedValue};
use crate::protocol::response::FilterSettings;
use crate::registry::DeviceId;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Closure run on the event loop with exclusive access to the connection.
type Job = Box<dyn FnOnce(&mut HubConnection) + Send>;

/// Buffer of per-device event streams.
const DEVICE_EVENT_BUFFER: usize = 256;

enum Request {
    Open(oneshot::Sender<NeuroplayResult<()>>),
    Close(oneshot::Sender<()>),
    Run(Job),
}

/// Cloneable async handle to a hub connection.
///
/// Created with [`HubClient::spawn`], which starts the event loop without
/// connecting, or [`HubClient::connect`], which also opens the transport.
/// The loop stops once every handle has been dropped.
#[derive(Clone)]
pub struct HubClient {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<HubEvent>,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

impl HubClient {
    /// Start the event loop. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(config: HubConfig) -> Self {
        let (requests, request_rx) = mpsc::channel(config.connection.request_buffer.max(1));
        let (events, _) = broadcast::channel(config.connection.event_buffer.max(1));

        let event_loop = EventLoop {
            hub: HubConnection::new(config.timings.clone()),
            config,
            requests: request_rx,
            events: events.clone(),
            writer: None,
            reader: None,
            connecting: None,
            open_waiters: Vec::new(),
        };
        tokio::spawn(event_loop.run());

        Self { requests, events }
    }

    /// Start the event loop and open the transport.
    ///
    /// Subscribe before calling this to observe [`HubEvent::Connected`]:
    /// the handshake may complete before this returns. Alternatively use
    /// [`spawn`](Self::spawn), [`subscribe`](Self::subscribe), then
    /// [`open`](Self::open).
    ///
    /// # Errors
    /// Returns the error of [`open`](Self::open).
    pub async fn connect(config: HubConfig) -> NeuroplayResult<Self> {
        let client = Self::spawn(config);
        client.open().await?;
        Ok(client)
    }

    /// Receive every notification raised from now on, in order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Stream of one device's notifications.
    #[must_use]
    pub fn device_events(&self, id: DeviceId) -> DeviceEvents {
        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::channel(DEVICE_EVENT_BUFFER);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    received = events.recv() => received,
                    () = tx.closed() => break,
                };
                match received {
                    Ok(HubEvent::Device { id: from, event }) if from == id => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%id, skipped, "Device event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        DeviceEvents { rx }
    }

    // ─── Transport ──────────────────────────────────────────────────

    /// Connect to the hub. Resolves once the WebSocket is up; the `help`
    /// handshake then runs in the background and raises
    /// [`HubEvent::Connected`]. Succeeds immediately if already open.
    ///
    /// # Errors
    /// [`NeuroplayError::ConnectionFailed`] or [`NeuroplayError::Timeout`]
    /// if the hub cannot be reached.
    pub async fn open(&self) -> NeuroplayResult<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::Open(tx)).await?;
        rx.await.map_err(|_| NeuroplayError::EventLoopStopped)?
    }

    /// Stop every device, release all sessions and close the transport.
    ///
    /// # Errors
    /// [`NeuroplayError::EventLoopStopped`] if the loop is gone.
    pub async fn close(&self) -> NeuroplayResult<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::Close(tx)).await?;
        rx.await.map_err(|_| NeuroplayError::EventLoopStopped)
    }

    /// Run `f` on the event loop with exclusive access to the connection.
    ///
    /// Frames queued by `f` are sent and notifications published right
    /// after it returns.
    ///
    /// # Errors
    /// [`NeuroplayError::EventLoopStopped`] if the loop is gone.
    pub async fn with<R, F>(&self, f: F) -> NeuroplayResult<R>
    where
        F: FnOnce(&mut HubConnection) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |hub| {
            let _ = tx.send(f(hub));
        });
        self.submit(Request::Run(job)).await?;
        rx.await.map_err(|_| NeuroplayError::EventLoopStopped)
    }

    /// Run `f` against one device session.
    ///
    /// # Errors
    /// [`NeuroplayError::UnknownDevice`] if no session has this id, or
    /// [`NeuroplayError::EventLoopStopped`].
    pub async fn with_device<R, F>(&self, id: DeviceId, f: F) -> NeuroplayResult<R>
    where
        F: FnOnce(&mut DeviceControl<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.with(move |hub| hub.device(id).map(|mut device| f(&mut device)))
            .await?
            .ok_or(NeuroplayError::UnknownDevice { id: id.0 })
    }

    /// Run a command that sends frames; refused while disconnected.
    async fn command<F>(&self, f: F) -> NeuroplayResult<()>
    where
        F: FnOnce(&mut HubConnection) + Send + 'static,
    {
        self.with(move |hub| {
            if !hub.is_connected() {
                return Err(NeuroplayError::NotConnected);
            }
            f(hub);
            Ok(())
        })
        .await?
    }

    async fn device_command<F>(&self, id: DeviceId, f: F) -> NeuroplayResult<()>
    where
        F: FnOnce(&mut DeviceControl<'_>) + Send + 'static,
    {
        self.with(move |hub| {
            if !hub.is_connected() {
                return Err(NeuroplayError::NotConnected);
            }
            let mut device = hub
                .device(id)
                .ok_or(NeuroplayError::UnknownDevice { id: id.0 })?;
            f(&mut device);
            Ok(())
        })
        .await?
    }

    async fn submit(&self, request: Request) -> NeuroplayResult<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| NeuroplayError::EventLoopStopped)
    }

    // ─── Hub queries ────────────────────────────────────────────────

    /// # Errors
    /// [`NeuroplayError::EventLoopStopped`] if the loop is gone.
    pub async fn state(&self) -> NeuroplayResult<HubState> {
        self.with(|hub| hub.state()).await
    }

    /// # Errors
    /// [`NeuroplayError::EventLoopStopped`] if the loop is gone.
    pub async fn version(&self) -> NeuroplayResult<String> {
        self.with(|hub| hub.version().to_string()).await
    }

    /// # Errors
    /// [`NeuroplayError::EventLoopStopped`] if the loop is gone.
    pub async fn filters(&self) -> NeuroplayResult<FilterSettings> {
        self.with(|hub| hub.filters()).await
    }

    /// Snapshots of every session, in id order.
    ///
    /// # Errors
    /// [`NeuroplayError::EventLoopStopped`] if the loop is gone.
    pub async fn devices(&self) -> NeuroplayResult<Vec<DeviceStatus>> {
        self.with(|hub| hub.sessions().map(|s| s.status()).collect())
            .await
    }

    /// # Errors
    /// [`NeuroplayError::EventLoopStopped`] if the loop is gone.
    pub async fn find_device(&self, name: &str) -> NeuroplayResult<Option<DeviceId>> {
        let name = name.to_string();
        self.with(move |hub| hub.find_device(&name)).await
    }

    /// # Errors
    /// [`NeuroplayError::EventLoopStopped`] if the loop is gone.
    pub async fn current_device(&self) -> NeuroplayResult<Option<DeviceStatus>> {
        self.with(|hub| hub.current_device().map(|s| s.status()))
            .await
    }

    // ─── Hub commands ───────────────────────────────────────────────

    /// # Errors
    /// [`NeuroplayError::NotConnected`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn start_search(&self) -> NeuroplayResult<()> {
        self.command(HubConnection::start_search).await
    }

    /// # Errors
    /// [`NeuroplayError::NotConnected`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn set_filters(&self, filters: FilterSettings) -> NeuroplayResult<()> {
        self.command(move |hub| hub.set_filters(filters)).await
    }

    /// # Errors
    /// [`NeuroplayError::NotConnected`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn set_default_filters(&self) -> NeuroplayResult<()> {
        self.command(HubConnection::set_default_filters).await
    }

    /// # Errors
    /// [`NeuroplayError::NotConnected`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn set_data_storage_time(&self, seconds: u32) -> NeuroplayResult<()> {
        self.command(move |hub| hub.set_data_storage_time(seconds))
            .await
    }

    /// # Errors
    /// [`NeuroplayError::NotConnected`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn send_raw(&self, text: impl Into<String>) -> NeuroplayResult<()> {
        let text = text.into();
        self.command(move |hub| hub.send_raw(text)).await
    }

    // ─── Device commands ────────────────────────────────────────────

    /// Start a device, optionally with a specific channel count.
    ///
    /// # Errors
    /// [`NeuroplayError::NotConnected`], [`NeuroplayError::UnknownDevice`] or
    /// [`NeuroplayError::EventLoopStopped`].
    pub async fn start_device(&self, id: DeviceId, channels: Option<u32>) -> NeuroplayResult<()> {
        self.device_command(id, move |device| match channels {
            Some(channels) => device.start_with_channels(channels),
            None => device.start(),
        })
        .await
    }

    /// # Errors
    /// [`NeuroplayError::NotConnected`], [`NeuroplayError::UnknownDevice`] or
    /// [`NeuroplayError::EventLoopStopped`].
    pub async fn stop_device(&self, id: DeviceId) -> NeuroplayResult<()> {
        self.device_command(id, |device| device.stop()).await
    }

    /// # Errors
    /// [`NeuroplayError::NotConnected`], [`NeuroplayError::UnknownDevice`] or
    /// [`NeuroplayError::EventLoopStopped`].
    pub async fn set_grab(&self, id: DeviceId, kind: GrabKind, enabled: bool) -> NeuroplayResult<()> {
        self.device_command(id, move |device| device.set_grab(kind, enabled))
            .await
    }

    /// # Errors
    /// [`NeuroplayError::UnknownDevice`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn set_grab_interval(&self, id: DeviceId, interval: Duration) -> NeuroplayResult<()> {
        self.with_device(id, move |device| device.set_grab_interval(interval))
            .await
    }

    /// # Errors
    /// [`NeuroplayError::UnknownDevice`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn read_filtered_data_history(&self, id: DeviceId) -> NeuroplayResult<ChannelsData> {
        self.with_device(id, |device| device.read_filtered_data_history())
            .await
    }

    /// # Errors
    /// [`NeuroplayError::UnknownDevice`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn read_raw_data_history(&self, id: DeviceId) -> NeuroplayResult<ChannelsData> {
        self.with_device(id, |device| device.read_raw_data_history())
            .await
    }

    /// # Errors
    /// [`NeuroplayError::UnknownDevice`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn read_rhythms_history(
        &self,
        id: DeviceId,
    ) -> NeuroplayResult<Vec<ChannelsRhythms>> {
        self.with_device(id, |device| device.read_rhythms_history())
            .await
    }

    /// # Errors
    /// [`NeuroplayError::UnknownDevice`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn read_meditation_history(&self, id: DeviceId) -> NeuroplayResult<Vec<TimedValue>> {
        self.with_device(id, |device| device.read_meditation_history())
            .await
    }

    /// # Errors
    /// [`NeuroplayError::UnknownDevice`] or [`NeuroplayError::EventLoopStopped`].
    pub async fn read_concentration_history(
        &self,
        id: DeviceId,
    ) -> NeuroplayResult<Vec<TimedValue>> {
        self.with_device(id, |device| device.read_concentration_history())
            .await
    }
}

/// Notifications of one device session.
///
/// Ends when the client's event loop stops.
pub struct DeviceEvents {
    rx: mpsc::Receiver<DeviceEvent>,
}

impl Stream for DeviceEvents {
    type Item = DeviceEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── Event loop ─────────────────────────────────────────────────────────

/// What woke the event loop.
enum Wake {
    Request(Option<Request>),
    Frame(Option<Result<Message, tungstenite::Error>>),
    Connected(NeuroplayResult<WsStream>),
    Timers,
}

struct EventLoop {
    config: HubConfig,
    hub: HubConnection,
    requests: mpsc::Receiver<Request>,
    events: broadcast::Sender<HubEvent>,
    writer: Option<WsWriter>,
    reader: Option<WsReader>,
    connecting: Option<oneshot::Receiver<NeuroplayResult<WsStream>>>,
    open_waiters: Vec<oneshot::Sender<NeuroplayResult<()>>>,
}

impl EventLoop {
    async fn run(mut self) {
        tracing::debug!(url = %self.config.hub_url, "Hub event loop started");

        loop {
            let deadline = self.hub.next_deadline();
            let wake = tokio::select! {
                request = self.requests.recv() => Wake::Request(request),
                frame = next_frame(&mut self.reader) => Wake::Frame(frame),
                result = connect_result(&mut self.connecting) => Wake::Connected(result),
                () = sleep_until(deadline) => Wake::Timers,
            };

            match wake {
                Wake::Request(None) => break,
                Wake::Request(Some(request)) => self.on_request(request).await,
                Wake::Frame(frame) => self.on_frame(frame),
                Wake::Connected(result) => self.on_connect_result(result),
                Wake::Timers => self.hub.on_timers(Instant::now()),
            }

            self.flush().await;
        }

        if let Some(mut writer) = self.writer.take() {
            let _ = writer.close().await;
        }
        tracing::debug!("Hub event loop exiting");
    }

    async fn on_request(&mut self, request: Request) {
        match request {
            Request::Open(reply) => {
                if self.writer.is_some() {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.open_waiters.push(reply);
                if self.connecting.is_none() {
                    self.start_connect();
                }
            }
            Request::Close(reply) => {
                self.hub.close();
                self.flush().await;
                if let Some(mut writer) = self.writer.take() {
                    if let Err(e) = writer.close().await {
                        tracing::debug!(error = %e, "Error while closing hub socket");
                    }
                }
                self.reader = None;
                if self.connecting.take().is_some() {
                    self.fail_waiters(NeuroplayError::ConnectionFailed {
                        url: self.config.hub_url.clone(),
                        reason: "closed while connecting".into(),
                    });
                }
                self.hub.on_transport_disconnected();
                let _ = reply.send(());
            }
            Request::Run(job) => job(&mut self.hub),
        }
    }

    fn start_connect(&mut self) {
        let url = self.config.hub_url.clone();
        let timeout = self.config.connect_timeout();
        let (tx, rx) = oneshot::channel();
        self.connecting = Some(rx);

        tracing::info!(%url, "Connecting to NeuroplayPro hub");
        tokio::spawn(async move {
            let _ = tx.send(connect_transport(url, timeout).await);
        });
    }

    fn on_connect_result(&mut self, result: NeuroplayResult<WsStream>) {
        self.connecting = None;
        match result {
            Ok(ws) => {
                let (writer, reader) = ws.split();
                self.writer = Some(writer);
                self.reader = Some(reader);
                self.hub.on_transport_connected();
                for waiter in self.open_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::warn!(url = %self.config.hub_url, error = %e, "Hub connection failed");
                self.fail_waiters(e);
            }
        }
    }

    fn fail_waiters(&mut self, error: NeuroplayError) {
        let reason = error.to_string();
        let mut waiters = std::mem::take(&mut self.open_waiters).into_iter();
        if let Some(first) = waiters.next() {
            let _ = first.send(Err(error));
        }
        for waiter in waiters {
            let _ = waiter.send(Err(NeuroplayError::ConnectionFailed {
                url: self.config.hub_url.clone(),
                reason: reason.clone(),
            }));
        }
    }

    fn on_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) {
        match frame {
            Some(Ok(Message::Text(text))) => {
                tracing::trace!(raw = text.as_str(), "Hub frame");
                self.hub.on_frame(text.as_str(), Instant::now());
            }
            Some(Ok(Message::Close(close))) => {
                tracing::info!(?close, "Hub closed the connection");
                self.drop_transport();
            }
            Some(Ok(_)) => {
                // Binary frames, pings and pongs carry no protocol data.
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Hub socket read failed");
                self.drop_transport();
            }
            None => {
                tracing::info!("Hub socket stream ended");
                self.drop_transport();
            }
        }
    }

    fn drop_transport(&mut self) {
        self.writer = None;
        self.reader = None;
        self.hub.on_transport_disconnected();
    }

    /// Write queued frames, then publish queued notifications.
    async fn flush(&mut self) {
        for frame in self.hub.take_outgoing() {
            let Some(writer) = self.writer.as_mut() else {
                tracing::debug!(command = frame.command(), "Not connected, dropping command");
                continue;
            };
            tracing::debug!(command = frame.command(), "Sending hub command");
            if let Err(e) = writer.send(Message::Text(frame.encode().into())).await {
                tracing::warn!(error = %e, "Hub socket write failed");
                self.drop_transport();
                break;
            }
        }

        for event in self.hub.take_events() {
            // No subscribers is not an error.
            let _ = self.events.send(event);
        }
    }
}

async fn connect_transport(url: String, timeout: Duration) -> NeuroplayResult<WsStream> {
    let (ws, response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| NeuroplayError::Timeout {
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| NeuroplayError::ConnectionFailed {
            url: url.clone(),
            reason: format!("WebSocket connection failed: {e}"),
        })?;

    tracing::info!(%url, status = %response.status(), "Connected to NeuroplayPro hub");
    Ok(ws)
}

async fn next_frame(reader: &mut Option<WsReader>) -> Option<Result<Message, tungstenite::Error>> {
    match reader {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}

async fn connect_result(
    pending: &mut Option<oneshot::Receiver<NeuroplayResult<WsStream>>>,
) -> NeuroplayResult<WsStream> {
    match pending {
        Some(rx) => rx.await.unwrap_or_else(|_| {
            Err(NeuroplayError::ConnectionLost {
                reason: "connect task ended without a result".into(),
            })
        }),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
