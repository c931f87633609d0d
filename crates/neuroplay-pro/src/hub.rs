//! # Hub Connection
//!
//! [`HubConnection`] is the top-level protocol state machine. It performs no
//! I/O: the owner feeds it transport events, text frames and timer expiries,
//! then drains the frames to send and the notifications to publish.
//!
//! ```text
//! transport up         help reply          discovery window ends
//! Disconnected ──────▶ Connected ────────▶ Searching ─────────────▶ Ready
//!      ▲                                                              │
//!      └──────────────────────── transport down ──────────────────────┘
//! ```
//!
//! Every decoded reply is first offered to every device session, then
//! interpreted by the hub itself. After the handshake (state `Ready`) a
//! reply carrying an `error` field is surfaced as [`HubEvent::Error`] and
//! not interpreted further; before that, such errors are ignored.
//!
//! Discovery: the `help` reply moves to `Searching` and arms a one-shot
//! discovery timeout, so `Ready` is reached within one discovery window no
//! matter what the hub reports. A `startsearch` acknowledgement starts
//! periodic `listdevices` polling until the window ends. A `startdevice`
//! acknowledgement switches to periodic `currentdeviceinfo` polling, bounded
//! by its own window, until the hub reports a running device.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::Value;
use tokio::time::Instant;

use crate::config::TimingConfig;
use crate::device::{DeviceControl, DeviceSession};
use crate::events::{HubEvent, Outbox};
use crate::protocol::codec::{DecodedMessage, OutgoingFrame, decode};
use crate::protocol::constants::Commands;
use crate::protocol::device::DeviceInfo;
use crate::protocol::response::{FilterSettings, Response};
use crate::registry::{DeviceId, DeviceRegistry};
use crate::timer::{Scheduler, TimerKind};

/// Connection state. Ordered: each state implies the previous ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum HubState {
    #[default]
    Disconnected,
    /// Transport is up, waiting for the `help` reply.
    Connected,
    /// Handshake done, discovery window open.
    Searching,
    /// Discovery window closed.
    Ready,
}

impl std::fmt::Display for HubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HubState::Disconnected => "disconnected",
            HubState::Connected => "connected",
            HubState::Searching => "searching",
            HubState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Sans-IO hub protocol state machine.
#[derive(Debug)]
pub struct HubConnection {
    timings: TimingConfig,
    state: HubState,

    version: String,
    favorite_device_name: String,
    filters: FilterSettings,
    data_storage_time: i64,
    commands: BTreeMap<String, String>,
    data_grab_mode: bool,

    registry: DeviceRegistry,
    current: Option<DeviceId>,

    timers: Scheduler,
    out: Outbox,
}

impl Default for HubConnection {
    fn default() -> Self {
        Self::new(TimingConfig::default())
    }
}

impl HubConnection {
    #[must_use]
    pub fn new(timings: TimingConfig) -> Self {
        Self {
            timings,
            state: HubState::Disconnected,
            version: String::new(),
            favorite_device_name: String::new(),
            filters: FilterSettings::default(),
            data_storage_time: 0,
            commands: BTreeMap::new(),
            data_grab_mode: false,
            registry: DeviceRegistry::new(),
            current: None,
            timers: Scheduler::new(),
            out: Outbox::default(),
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────

    #[must_use]
    pub fn state(&self) -> HubState {
        self.state
    }

    /// `true` from transport connect until disconnect.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state >= HubState::Connected
    }

    /// Hub version, empty until a successful `version` reply.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn favorite_device_name(&self) -> &str {
        &self.favorite_device_name
    }

    #[must_use]
    pub fn filters(&self) -> FilterSettings {
        self.filters
    }

    #[must_use]
    pub fn lpf(&self) -> f64 {
        self.filters.low_pass
    }

    #[must_use]
    pub fn hpf(&self) -> f64 {
        self.filters.high_pass
    }

    #[must_use]
    pub fn bsf(&self) -> f64 {
        self.filters.band_stop
    }

    /// Seconds of data the hub keeps, as last reported.
    #[must_use]
    pub fn data_storage_time(&self) -> i64 {
        self.data_storage_time
    }

    #[must_use]
    pub fn is_data_grab_mode(&self) -> bool {
        self.data_grab_mode
    }

    /// Command catalog from the `help` reply: name to description.
    #[must_use]
    pub fn commands(&self) -> &BTreeMap<String, String> {
        &self.commands
    }

    /// The command catalog as text, one command per line.
    #[must_use]
    pub fn command_help(&self) -> String {
        let mut help = String::new();
        for (command, description) in &self.commands {
            if description.is_empty() {
                let _ = writeln!(help, "{command}");
            } else {
                let _ = writeln!(help, "{command} \t - {description}");
            }
        }
        help
    }

    #[must_use]
    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn session(&self, id: DeviceId) -> Option<&DeviceSession> {
        self.registry.get(id)
    }

    #[must_use]
    pub fn session_by_name(&self, name: &str) -> Option<&DeviceSession> {
        self.registry.find(name).and_then(|id| self.registry.get(id))
    }

    #[must_use]
    pub fn find_device(&self, name: &str) -> Option<DeviceId> {
        self.registry.find(name)
    }

    /// Sessions in id order.
    pub fn sessions(&self) -> impl Iterator<Item = &DeviceSession> {
        self.registry.iter()
    }

    /// The session the hub last reported as running.
    #[must_use]
    pub fn current_device(&self) -> Option<&DeviceSession> {
        self.current.and_then(|id| self.registry.get(id))
    }

    #[must_use]
    pub fn current_device_id(&self) -> Option<DeviceId> {
        self.current
    }

    /// Control handle for one session.
    pub fn device(&mut self, id: DeviceId) -> Option<DeviceControl<'_>> {
        let session = self.registry.get_mut(id)?;
        Some(DeviceControl::new(session, &mut self.out, &mut self.timers))
    }

    // ─── Driving ────────────────────────────────────────────────────

    /// Frames queued since the last call, in send order.
    pub fn take_outgoing(&mut self) -> Vec<OutgoingFrame> {
        self.out.take_frames()
    }

    /// Notifications raised since the last call, in order.
    pub fn take_events(&mut self) -> Vec<HubEvent> {
        self.out.take_events()
    }

    /// Earliest timer deadline, if any timer is running.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    #[must_use]
    pub fn is_timer_active(&self, kind: TimerKind) -> bool {
        self.timers.is_active(kind)
    }

    /// The transport connected: start the handshake.
    pub fn on_transport_connected(&mut self) {
        tracing::info!("Transport connected, requesting command catalog");
        self.state = HubState::Connected;
        self.out.send(Commands::HELP);
    }

    /// The transport closed or failed.
    ///
    /// Timers stop and queued frames are dropped. Sessions, their
    /// `connected` flags and their grab subscriptions are kept; grab mode
    /// is requested again after the next handshake.
    pub fn on_transport_disconnected(&mut self) {
        if self.state == HubState::Disconnected {
            return;
        }
        tracing::info!(previous = %self.state, "Transport disconnected");
        self.state = HubState::Disconnected;
        self.timers.stop_all();
        self.out.discard_frames();
        for session in self.registry.iter_mut() {
            session.reset_grab_request();
        }
        self.out.emit(HubEvent::Disconnected);
    }

    /// Process one incoming text frame.
    ///
    /// Frames that are not JSON objects are dropped.
    pub fn on_frame(&mut self, text: &str, now: Instant) {
        let msg = match decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed frame");
                return;
            }
        };
        tracing::debug!(command = msg.command(), "Received hub reply");

        let response = match Response::parse(&msg) {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!(command = msg.command(), error = %e, "Skipping unusable reply");
                None
            }
        };

        if let Some(response) = &response {
            for id in self.registry.ids() {
                if let Some(mut device) = self.device(id) {
                    device.handle(response, now);
                }
            }
        }

        if let Some(error) = msg.error() {
            if self.state == HubState::Ready {
                tracing::warn!(command = msg.command(), error, "Hub reported an error");
                self.out.emit(HubEvent::Error(error.to_string()));
                return;
            }
            tracing::debug!(command = msg.command(), error, "Ignoring hub error during handshake");
        }

        if let Some(response) = response {
            self.handle(&msg, response, now);
        }
    }

    /// Fire every timer due at `now`.
    pub fn on_timers(&mut self, now: Instant) {
        for kind in self.timers.fire_expired(now) {
            match kind {
                TimerKind::DiscoveryPoll => self.out.send(Commands::LIST_DEVICES),
                TimerKind::DiscoveryTimeout => {
                    self.timers.stop(TimerKind::DiscoveryPoll);
                    if matches!(self.state, HubState::Connected | HubState::Searching) {
                        self.state = HubState::Ready;
                        tracing::info!(devices = self.registry.len(), "Discovery finished");
                    }
                }
                TimerKind::StartPoll => self.out.send(Commands::CURRENT_DEVICE_INFO),
                TimerKind::StartTimeout => {
                    self.timers.stop(TimerKind::StartPoll);
                    tracing::debug!("Device start window closed");
                }
                TimerKind::Grab(id) => {
                    if let Some(mut device) = self.device(id) {
                        device.on_grab_tick();
                    }
                }
            }
        }
    }

    fn handle(&mut self, msg: &DecodedMessage, response: Response, now: Instant) {
        match response {
            Response::Help { commands } => self.on_help(commands, now),
            Response::Version(version) => self.version = version,
            Response::FavoriteDeviceName(name) => self.favorite_device_name = name,
            Response::Filters(filters) => self.filters = filters,
            Response::DataStorageTime(seconds) => self.data_storage_time = seconds,
            Response::StartSearch => {
                for session in self.registry.iter_mut() {
                    session.set_connected(false);
                }
                self.timers.start_periodic(
                    TimerKind::DiscoveryPoll,
                    self.timings.discovery_poll(),
                    now,
                );
                if !self.timers.is_active(TimerKind::DiscoveryTimeout) {
                    self.timers.start_once(
                        TimerKind::DiscoveryTimeout,
                        self.timings.discovery_timeout(),
                        now,
                    );
                }
            }
            Response::ListDevices(devices) => {
                for info in &devices {
                    let id = self.register(info);
                    if let Some(session) = self.registry.get_mut(id) {
                        session.set_connected(true);
                    }
                }
            }
            Response::StartDevice => {
                self.timers.stop(TimerKind::DiscoveryPoll);
                self.timers
                    .start_periodic(TimerKind::StartPoll, self.timings.start_poll(), now);
                self.timers
                    .start_once(TimerKind::StartTimeout, self.timings.start_timeout(), now);
            }
            Response::CurrentDeviceInfo(Some(info)) => {
                self.timers.stop(TimerKind::StartPoll);
                self.timers.stop(TimerKind::StartTimeout);
                let id = self.register(&info);
                self.current = Some(id);
                for other in self.registry.ids() {
                    if other != id
                        && let Some(mut device) = self.device(other)
                        && device.is_started()
                    {
                        device.supersede();
                    }
                }
                if let Some(mut device) = self.device(id) {
                    device.set_started();
                }
                self.out.emit(HubEvent::DeviceReady(id));
            }
            Response::CurrentDeviceInfo(None) => {
                if self.state < HubState::Ready {
                    tracing::debug!(result = msg.result(), "No running device, starting search");
                    self.out.send(Commands::START_SEARCH);
                }
            }
            Response::EnableDataGrabMode => self.data_grab_mode = true,
            Response::DisableDataGrabMode => self.data_grab_mode = false,
            _ => {}
        }
    }

    fn on_help(&mut self, commands: Vec<(String, String)>, now: Instant) {
        self.commands.extend(commands);

        for command in [
            Commands::VERSION,
            Commands::GET_FAVORITE_DEVICE_NAME,
            Commands::GET_FILTERS,
            Commands::GET_DATA_STORAGE_TIME,
            Commands::CURRENT_DEVICE_INFO,
        ] {
            self.out.send(command);
        }

        if self.state < HubState::Searching {
            self.state = HubState::Searching;
            tracing::info!(commands = self.commands.len(), "Hub handshake complete");
            self.timers.start_once(
                TimerKind::DiscoveryTimeout,
                self.timings.discovery_timeout(),
                now,
            );
            self.out.emit(HubEvent::Connected);
            for id in self.registry.ids() {
                if let Some(mut device) = self.device(id) {
                    device.resume_grab();
                }
            }
        }
    }

    /// Resolve a device name to its session, creating and announcing it
    /// on first sight.
    fn register(&mut self, info: &DeviceInfo) -> DeviceId {
        let (id, created) = self
            .registry
            .get_or_create(info, self.timings.grab_interval());
        if created {
            tracing::info!(device = %info.name, model = %info.model, %id, "Device discovered");
            self.out.emit(HubEvent::DeviceDiscovered {
                id,
                info: info.clone(),
            });
        }
        id
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Ask the hub to search for devices.
    pub fn start_search(&mut self) {
        self.out.send(Commands::START_SEARCH);
    }

    /// Send an arbitrary command string unchanged.
    pub fn send_raw(&mut self, text: impl Into<String>) {
        self.out.send(OutgoingFrame::Bare(text.into()));
    }

    pub fn set_lpf(&mut self, value: f64) {
        self.filters.low_pass = value;
        self.send_filter(Commands::SET_LPF, value);
    }

    pub fn set_hpf(&mut self, value: f64) {
        self.filters.high_pass = value;
        self.send_filter(Commands::SET_HPF, value);
    }

    pub fn set_bsf(&mut self, value: f64) {
        self.filters.band_stop = value;
        self.send_filter(Commands::SET_BSF, value);
    }

    /// Set all three filters.
    pub fn set_filters(&mut self, filters: FilterSettings) {
        self.set_lpf(filters.low_pass);
        self.set_hpf(filters.high_pass);
        self.set_bsf(filters.band_stop);
    }

    /// Restore hub defaults; the reply refreshes [`filters`](Self::filters).
    pub fn set_default_filters(&mut self) {
        self.out.send(Commands::SET_DEFAULT_FILTERS);
    }

    fn send_filter(&mut self, command: &str, value: f64) {
        self.out
            .send(OutgoingFrame::object(command, [("value", Value::from(value))]));
    }

    /// Set how many seconds of data the hub keeps.
    ///
    /// The hub only accepts this value as a JSON string.
    pub fn set_data_storage_time(&mut self, seconds: u32) {
        self.out.send(OutgoingFrame::object(
            Commands::SET_DATA_STORAGE_TIME,
            [("value", Value::String(seconds.to_string()))],
        ));
    }

    pub fn enable_data_grab_mode(&mut self) {
        self.out.send(Commands::ENABLE_DATA_GRAB_MODE);
    }

    pub fn disable_data_grab_mode(&mut self) {
        self.out.send(Commands::DISABLE_DATA_GRAB_MODE);
    }

    pub fn set_data_grab_mode(&mut self, enabled: bool) {
        if enabled {
            self.enable_data_grab_mode();
        } else {
            self.disable_data_grab_mode();
        }
    }

    /// Stop every session, release them all and stop every timer.
    ///
    /// The resulting `stopdevice` frames stay queued for the owner to flush
    /// before closing the transport.
    pub fn close(&mut self) {
        for id in self.registry.ids() {
            if let Some(mut device) = self.device(id) {
                device.stop();
            }
        }
        tracing::info!(devices = self.registry.len(), "Releasing device sessions");
        self.registry.clear();
        self.current = None;
        self.timers.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::GrabKind;
    use crate::events::DeviceEvent;
    use std::time::Duration;

    const HELP: &str = r#"{"command":"help","commands":[
        {"command":"help","description":"this list"},
        {"command":"listdevices","description":""}
    ]}"#;

    struct Harness {
        hub: HubConnection,
        t0: Instant,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                hub: HubConnection::default(),
                t0: Instant::now(),
            }
        }

        /// Connected and past the `help` reply, queues drained.
        fn handshaken() -> Self {
            let mut h = Self::new();
            h.hub.on_transport_connected();
            h.frame(HELP, 0);
            h.sent();
            h.hub.take_events();
            h
        }

        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        fn frame(&mut self, text: &str, ms: u64) {
            let now = self.at(ms);
            self.hub.on_frame(text, now);
        }

        fn tick(&mut self, ms: u64) {
            let now = self.at(ms);
            self.hub.on_timers(now);
        }

        fn sent(&mut self) -> Vec<String> {
            self.hub
                .take_outgoing()
                .iter()
                .map(OutgoingFrame::encode)
                .collect()
        }
    }

    #[test]
    fn test_handshake_sequence() {
        let mut h = Harness::new();
        assert_eq!(h.hub.state(), HubState::Disconnected);

        h.hub.on_transport_connected();
        assert_eq!(h.hub.state(), HubState::Connected);
        assert!(h.hub.is_connected());
        assert_eq!(h.sent(), vec!["help"]);
        assert!(h.hub.take_events().is_empty());

        h.frame(HELP, 10);
        assert_eq!(h.hub.state(), HubState::Searching);
        assert_eq!(
            h.sent(),
            vec![
                "version",
                "getfavoritedevicename",
                "getfilters",
                "getdatastoragetime",
                "currentdeviceinfo"
            ]
        );
        assert_eq!(h.hub.take_events(), vec![HubEvent::Connected]);
        assert_eq!(h.hub.commands().len(), 2);
        assert_eq!(h.hub.command_help(), "help \t - this list\nlistdevices\n");

        // A repeated help reply refetches settings but does not reconnect.
        h.frame(HELP, 20);
        assert_eq!(h.sent().len(), 5);
        assert!(h.hub.take_events().is_empty());
    }

    #[test]
    fn test_capability_replies() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"getfilters","LPF":0.5,"HPF":30,"BSF":50}"#, 1);
        h.frame(r#"{"command":"version","result":true,"version":"1.4"}"#, 2);
        h.frame(r#"{"command":"getfavoritedevicename","device":"EEG-01"}"#, 3);
        h.frame(r#"{"command":"getdatastoragetime","storagetime":30}"#, 4);

        assert_eq!(h.hub.lpf(), 0.5);
        assert_eq!(h.hub.hpf(), 30.0);
        assert_eq!(h.hub.bsf(), 50.0);
        assert_eq!(h.hub.version(), "1.4");
        assert_eq!(h.hub.favorite_device_name(), "EEG-01");
        assert_eq!(h.hub.data_storage_time(), 30);

        h.frame(r#"{"command":"setdefaultfilters","LPF":1,"HPF":40}"#, 5);
        assert_eq!(
            h.hub.filters(),
            FilterSettings {
                low_pass: 1.0,
                high_pass: 40.0,
                band_stop: 0.0
            }
        );
    }

    #[test]
    fn test_no_current_device_starts_search() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"currentdeviceinfo","result":false}"#, 1);
        assert_eq!(h.sent(), vec!["startsearch"]);
    }

    #[test]
    fn test_discovery_polls_and_registers_devices() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"startsearch","result":true}"#, 100);
        assert!(h.hub.is_timer_active(TimerKind::DiscoveryPoll));

        h.tick(300);
        assert_eq!(h.sent(), vec!["listdevices"]);

        let listing = r#"{"command":"listdevices","devices":[{"name":"EEG-01","serialNumber":"A1"}]}"#;
        h.frame(listing, 310);
        let events = h.hub.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            HubEvent::DeviceDiscovered { id: DeviceId(0), info } if info.name == "EEG-01"
        ));
        assert!(h.hub.session(DeviceId(0)).unwrap().is_connected());

        h.frame(listing, 520);
        assert!(h.hub.take_events().is_empty());
        assert_eq!(h.hub.device_count(), 1);
        assert!(h.hub.session_by_name("EEG-01").unwrap().is_connected());
    }

    #[test]
    fn test_ids_in_creation_order() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"listdevices","devices":[{"name":"a"},{"name":"b"}]}"#, 1);
        h.frame(r#"{"command":"listdevices","devices":[{"name":"b"},{"name":"c"},{"name":"a"}]}"#, 2);
        h.frame(r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"d"}}"#, 3);

        for (index, name) in ["a", "b", "c", "d"].into_iter().enumerate() {
            assert_eq!(h.hub.find_device(name), Some(DeviceId(index)));
            assert_eq!(h.hub.session(DeviceId(index)).unwrap().name(), name);
        }
        let discovered = h
            .hub
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, HubEvent::DeviceDiscovered { .. }))
            .count();
        assert_eq!(discovered, 4);
    }

    #[test]
    fn test_startsearch_clears_connected_flags() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"listdevices","devices":[{"name":"a"}]}"#, 1);
        h.frame(r#"{"command":"startsearch"}"#, 2);
        assert!(!h.hub.session(DeviceId(0)).unwrap().is_connected());
    }

    #[test]
    fn test_discovery_ends_ready_without_devices() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"startsearch","result":true}"#, 50);

        h.tick(5999);
        assert_eq!(h.hub.state(), HubState::Searching);

        h.tick(6000);
        assert_eq!(h.hub.state(), HubState::Ready);
        assert!(!h.hub.is_timer_active(TimerKind::DiscoveryPoll));
        assert_eq!(h.hub.device_count(), 0);

        h.sent();
        h.tick(7000);
        assert!(h.sent().is_empty());
        assert_eq!(h.hub.next_deadline(), None);
    }

    #[test]
    fn test_discovery_ends_even_without_startsearch() {
        let mut h = Harness::handshaken();
        h.tick(6000);
        assert_eq!(h.hub.state(), HubState::Ready);
    }

    #[test]
    fn test_late_startsearch_keeps_first_window() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"startsearch","result":true}"#, 4000);
        h.tick(4200);
        assert_eq!(h.sent(), vec!["listdevices"]);

        h.tick(5999);
        assert_eq!(h.hub.state(), HubState::Searching);
        h.tick(6000);
        assert_eq!(h.hub.state(), HubState::Ready);
        assert!(!h.hub.is_timer_active(TimerKind::DiscoveryPoll));
        assert!(!h.hub.is_timer_active(TimerKind::DiscoveryTimeout));
    }

    #[test]
    fn test_odd_device_fields_still_register() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"startdevice","result":true}"#, 0);
        h.frame(
            r#"{"command":"listdevices","devices":[{"name":"EEG-02","preferredChannelCount":-1}]}"#,
            5,
        );
        h.frame(
            r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"EEG-01","maxChannels":8.0}}"#,
            10,
        );

        assert_eq!(h.hub.device_count(), 2);
        assert_eq!(h.hub.session(DeviceId(0)).unwrap().preferred_channel_count(), 0);
        assert_eq!(h.hub.current_device_id(), Some(DeviceId(1)));
        let current = h.hub.current_device().unwrap();
        assert!(current.is_started());
        assert_eq!(current.max_channels(), 8);
        assert!(!h.hub.is_timer_active(TimerKind::StartPoll));
        assert!(h.hub.take_events().contains(&HubEvent::DeviceReady(DeviceId(1))));
    }

    #[test]
    fn test_device_start_flow() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"startsearch"}"#, 0);
        h.frame(r#"{"command":"listdevices","devices":[{"name":"EEG-01","serialNumber":"A1"}]}"#, 10);
        h.hub.take_events();

        h.hub.device(DeviceId(0)).unwrap().start();
        assert_eq!(h.sent(), vec![r#"{"command":"startdevice","sn":"A1"}"#]);

        h.frame(r#"{"command":"startdevice","result":true}"#, 100);
        assert!(!h.hub.is_timer_active(TimerKind::DiscoveryPoll));
        assert!(h.hub.is_timer_active(TimerKind::StartPoll));

        h.tick(300);
        assert_eq!(h.sent(), vec!["currentdeviceinfo"]);

        h.frame(
            r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"EEG-01","serialNumber":"A1"}}"#,
            310,
        );
        assert!(!h.hub.is_timer_active(TimerKind::StartPoll));
        assert!(!h.hub.is_timer_active(TimerKind::StartTimeout));
        assert_eq!(h.sent(), vec!["spectrumfrequencies"]);
        assert_eq!(h.hub.current_device_id(), Some(DeviceId(0)));
        assert!(h.hub.current_device().unwrap().is_started());
        assert_eq!(
            h.hub.take_events(),
            vec![
                HubEvent::Device {
                    id: DeviceId(0),
                    event: DeviceEvent::Ready
                },
                HubEvent::DeviceReady(DeviceId(0)),
            ]
        );

        // Already started: frequencies again, no second Ready.
        h.frame(r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"EEG-01"}}"#, 400);
        assert_eq!(h.sent(), vec!["spectrumfrequencies"]);
        assert_eq!(
            h.hub.take_events(),
            vec![HubEvent::DeviceReady(DeviceId(0))]
        );
    }

    #[test]
    fn test_start_poll_gives_up() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"startdevice","result":true}"#, 0);
        h.tick(6000);
        assert!(!h.hub.is_timer_active(TimerKind::StartPoll));
    }

    #[test]
    fn test_errors_suppressed_until_ready() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"getfilters","error":"not yet","LPF":2}"#, 1);
        assert!(h.hub.take_events().is_empty());
        assert_eq!(h.hub.lpf(), 2.0);

        h.tick(6000);
        h.frame(r#"{"command":"getfilters","error":"bad filter","LPF":9}"#, 6001);
        assert_eq!(
            h.hub.take_events(),
            vec![HubEvent::Error("bad filter".into())]
        );
        assert_eq!(h.hub.lpf(), 2.0);
    }

    #[test]
    fn test_malformed_frames_dropped() {
        let mut h = Harness::handshaken();
        h.frame("not json", 1);
        h.frame("[1,2]", 2);
        h.frame(r#"{"command":"grabrawdata","data":[[1],[2,3]]}"#, 3);
        assert!(h.hub.take_events().is_empty());
        assert!(h.sent().is_empty());
        assert_eq!(h.hub.state(), HubState::Searching);
    }

    #[test]
    fn test_setters_encode_values() {
        let mut h = Harness::handshaken();
        h.hub.set_data_storage_time(5);
        h.hub.set_filters(FilterSettings {
            low_pass: 0.5,
            high_pass: 30.0,
            band_stop: 50.0,
        });
        h.hub.set_default_filters();
        h.hub.send_raw("listdevices");

        assert_eq!(
            h.sent(),
            vec![
                r#"{"command":"setdatastoragetime","value":"5"}"#,
                r#"{"command":"setLPF","value":0.5}"#,
                r#"{"command":"setHPF","value":30.0}"#,
                r#"{"command":"setBSF","value":50.0}"#,
                "setdefaultfilters",
                "listdevices",
            ]
        );
        assert_eq!(h.hub.hpf(), 30.0);
    }

    #[test]
    fn test_data_grab_mode_flag() {
        let mut h = Harness::handshaken();
        h.hub.set_data_grab_mode(true);
        assert_eq!(h.sent(), vec!["enabledatagrabmode"]);
        h.frame(r#"{"command":"enabledatagrabmode","result":true}"#, 1);
        assert!(h.hub.is_data_grab_mode());
        h.frame(r#"{"command":"disabledatagrabmode","result":true}"#, 2);
        assert!(!h.hub.is_data_grab_mode());
    }

    #[test]
    fn test_grab_ticks_reach_session() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"EEG-01"}}"#, 0);
        h.hub
            .device(DeviceId(0))
            .unwrap()
            .set_grab(GrabKind::FilteredData, true);
        h.frame(r#"{"command":"enabledatagrabmode","result":true}"#, 10);
        h.sent();

        h.tick(60);
        assert_eq!(h.sent(), vec!["grabfiltereddata"]);

        h.frame(r#"{"command":"grabfiltereddata","data":[[1,2],[3,4]]}"#, 70);
        let drained = h.hub.device(DeviceId(0)).unwrap().read_filtered_data_history();
        assert_eq!(drained, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_new_current_device_replaces_previous() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"a"}}"#, 0);
        h.hub
            .device(DeviceId(0))
            .unwrap()
            .set_grab(GrabKind::MeditationHistory, true);
        h.frame(r#"{"command":"enabledatagrabmode","result":true}"#, 5);
        assert!(h.hub.is_timer_active(TimerKind::Grab(DeviceId(0))));
        h.sent();

        h.frame(r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"b"}}"#, 10);
        assert_eq!(h.sent(), vec!["spectrumfrequencies"]);
        assert_eq!(h.hub.current_device_id(), Some(DeviceId(1)));
        let previous = h.hub.session(DeviceId(0)).unwrap();
        assert!(!previous.is_started());
        assert!(!previous.grab_flags().any());
        assert!(!h.hub.is_timer_active(TimerKind::Grab(DeviceId(0))));
        h.hub.take_events();

        h.frame(r#"{"command":"meditation","meditation":42}"#, 20);
        assert_eq!(
            h.hub.take_events(),
            vec![HubEvent::Device {
                id: DeviceId(1),
                event: DeviceEvent::MeditationReady(42.0)
            }]
        );
        assert_eq!(h.hub.session(DeviceId(0)).unwrap().meditation(), 0.0);
        assert_eq!(h.hub.session(DeviceId(1)).unwrap().meditation(), 42.0);
    }

    #[test]
    fn test_grab_resumes_after_reconnect() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"EEG-01"}}"#, 0);
        h.hub.device(DeviceId(0)).unwrap().set_grab(GrabKind::RawData, true);
        h.frame(r#"{"command":"enabledatagrabmode","result":true}"#, 10);
        assert!(h.hub.is_timer_active(TimerKind::Grab(DeviceId(0))));
        h.sent();

        h.hub.on_transport_disconnected();
        assert!(!h.hub.is_timer_active(TimerKind::Grab(DeviceId(0))));
        assert!(h.hub.session(DeviceId(0)).unwrap().is_grabbing(GrabKind::RawData));

        h.hub.on_transport_connected();
        h.frame(HELP, 500);
        let sent = h.sent();
        assert_eq!(sent.first().map(String::as_str), Some("help"));
        assert_eq!(sent.last().map(String::as_str), Some("enabledatagrabmode"));
        assert_eq!(sent.iter().filter(|f| *f == "enabledatagrabmode").count(), 1);

        h.frame(r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"EEG-01"}}"#, 510);
        h.frame(r#"{"command":"enabledatagrabmode","result":true}"#, 520);
        assert!(h.hub.is_timer_active(TimerKind::Grab(DeviceId(0))));
        h.sent();

        h.tick(1000);
        assert_eq!(h.sent(), vec!["grabrawdata"]);
    }

    #[test]
    fn test_reconnect_without_grab_sends_no_enable() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"EEG-01"}}"#, 0);
        h.hub.on_transport_disconnected();
        h.hub.on_transport_connected();
        h.frame(HELP, 100);
        assert!(!h.sent().iter().any(|f| f == "enabledatagrabmode"));
    }

    #[test]
    fn test_disconnect_keeps_sessions() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"startsearch"}"#, 0);
        h.frame(r#"{"command":"listdevices","devices":[{"name":"EEG-01"}]}"#, 10);
        h.hub.take_events();
        h.hub.start_search();

        h.hub.on_transport_disconnected();
        assert_eq!(h.hub.state(), HubState::Disconnected);
        assert_eq!(h.hub.take_events(), vec![HubEvent::Disconnected]);
        assert!(h.sent().is_empty());
        assert_eq!(h.hub.next_deadline(), None);
        assert!(h.hub.session(DeviceId(0)).unwrap().is_connected());

        // Only one notification per disconnect.
        h.hub.on_transport_disconnected();
        assert!(h.hub.take_events().is_empty());

        // Reconnect: same registry, Connected raised again.
        h.hub.on_transport_connected();
        h.frame(HELP, 100);
        assert!(h.hub.take_events().contains(&HubEvent::Connected));
        assert_eq!(h.hub.find_device("EEG-01"), Some(DeviceId(0)));
    }

    #[test]
    fn test_close_stops_sessions_and_releases_them() {
        let mut h = Harness::handshaken();
        h.frame(r#"{"command":"currentdeviceinfo","result":true,"device":{"name":"a"}}"#, 0);
        h.frame(r#"{"command":"listdevices","devices":[{"name":"b"}]}"#, 1);
        h.sent();

        h.hub.close();
        assert_eq!(h.sent(), vec!["stopdevice", "stopdevice"]);
        assert_eq!(h.hub.device_count(), 0);
        assert!(h.hub.current_device().is_none());
        assert_eq!(h.hub.next_deadline(), None);
    }
}
