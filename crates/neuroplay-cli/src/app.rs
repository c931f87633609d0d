use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, timeout_at};

use neuroplay_pro::{DeviceId, HubClient, HubConfig, HubEvent, HubState};

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// How long the `help` handshake may take.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for a device to be found and started.
const DEVICE_TIMEOUT: Duration = Duration::from_secs(20);

/// Time given to the capability replies after the handshake.
pub const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// A connected client plus its notification receiver.
pub struct Session {
    pub client: HubClient,
    events: broadcast::Receiver<HubEvent>,
}

impl Session {
    /// Open the hub and wait for the handshake.
    pub async fn connect(config: HubConfig) -> CliResult<Self> {
        println!("Connecting to {}...", config.hub_url);
        let client = HubClient::spawn(config);
        let events = client.subscribe();
        client.open().await?;

        let mut session = Self { client, events };
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            match session.next_event(deadline).await? {
                Some(HubEvent::Connected) => break,
                Some(_) => {}
                None => return Err("hub did not answer the help handshake".into()),
            }
        }
        tracing::debug!("Handshake complete");
        Ok(session)
    }

    /// Next notification before `deadline`, or `None` once it passes.
    async fn next_event(&mut self, deadline: Instant) -> CliResult<Option<HubEvent>> {
        loop {
            match timeout_at(deadline, self.events.recv()).await {
                Err(_) => return Ok(None),
                Ok(Ok(HubEvent::Disconnected)) => return Err("hub closed the connection".into()),
                Ok(Ok(event)) => return Ok(Some(event)),
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::debug!(skipped, "Notification receiver lagged");
                }
                Ok(Err(RecvError::Closed)) => return Err("client event loop stopped".into()),
            }
        }
    }

    /// Wait until the discovery window has closed.
    pub async fn wait_until_ready(&mut self) -> CliResult<()> {
        let deadline = Instant::now() + DEVICE_TIMEOUT;
        while self.client.state().await? < HubState::Ready {
            if Instant::now() >= deadline {
                return Err("discovery did not finish".into());
            }
            if let Some(HubEvent::DeviceDiscovered { id, info }) =
                self.next_event(Instant::now() + Duration::from_millis(200)).await?
            {
                println!("  found {id}: {}", info.name);
            }
        }
        Ok(())
    }

    /// A started device, starting one if needed.
    ///
    /// With `name`, only that device is accepted; otherwise the running
    /// device or the first one discovered.
    pub async fn ready_device(
        &mut self,
        name: Option<&str>,
        channels: Option<u32>,
    ) -> CliResult<DeviceId> {
        let wanted = |candidate: &str| name.is_none_or(|name| name == candidate);

        if let Some(current) = self.client.current_device().await?
            && current.started
            && wanted(&current.info.name)
        {
            println!("Using running device {}", current.info.name);
            return Ok(current.id);
        }

        // A known but stopped device can be started right away.
        let mut requested = false;
        if let Some(name) = name {
            match self.client.find_device(name).await? {
                Some(id) => {
                    self.client.start_device(id, channels).await?;
                    requested = true;
                }
                None if self.client.state().await? == HubState::Ready => {
                    self.client.start_search().await?;
                }
                None => {}
            }
        }

        let deadline = Instant::now() + DEVICE_TIMEOUT;
        loop {
            match self.next_event(deadline).await? {
                Some(HubEvent::DeviceDiscovered { id, info }) if !requested && wanted(&info.name) => {
                    println!("Starting {} ({})", info.name, info.model);
                    self.client.start_device(id, channels).await?;
                    requested = true;
                }
                Some(HubEvent::DeviceReady(id)) => {
                    let ready_name = self
                        .client
                        .with(move |hub| hub.session(id).map(|s| s.name().to_string()))
                        .await?
                        .unwrap_or_default();
                    if wanted(&ready_name) {
                        println!("Device {ready_name} is ready");
                        return Ok(id);
                    }
                }
                Some(_) => {}
                None => return Err("no device became ready".into()),
            }
        }
    }

    /// Stop every device and close the connection.
    pub async fn release(self) {
        if let Err(e) = self.client.close().await {
            tracing::warn!(error = %e, "Failed to close hub connection");
        }
    }
}

pub fn print_pretty_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            eprintln!("Failed to format JSON output: {err}");
            println!("{value}");
        }
    }
}
