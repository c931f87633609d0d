//! # Device Sessions
//!
//! A [`DeviceSession`] is the in-process representative of one device known
//! to the hub: its identity, start state, latest derived values and the
//! grab-mode buffers.
//!
//! Sessions are owned by the [`DeviceRegistry`](crate::registry::DeviceRegistry)
//! inside a [`HubConnection`](crate::hub::HubConnection). Read access goes
//! through `&DeviceSession`; everything that sends a command, arms a timer
//! or drains a buffer goes through a [`DeviceControl`], which borrows the
//! session together with the hub's outbox and scheduler.
//!
//! ## Grab mode
//!
//! Enabling any [`GrabKind`] asks the hub for `enabledatagrabmode`. Once the
//! hub acknowledges, a local timer fires every grab interval and sends one
//! request per enabled kind. Replies are transposed into sample-major
//! entries and queued until drained by a `read_*_history` call. Disabling
//! the last kind sends a single `disabledatagrabmode` and stops the timer.
//! Subscriptions survive a transport drop: the next handshake asks for grab
//! mode again and the timer restarts on its acknowledgement.
//!
//! ## Reply routing
//!
//! Replies carry no device address. Every session sees every reply and
//! filters by command name and its own state: data replies are taken only
//! while the session is started, and grab replies are buffered only while
//! the matching [`GrabKind`] is enabled. Two sessions with the same request
//! in flight cannot be told apart. The hub runs one device at a time, so a
//! session stops being started as soon as the hub reports another device.

use std::collections::VecDeque;
use std::ops::Deref;
use std::time::Duration;

use tokio::time::Instant;

use crate::events::{DeviceEvent, Outbox};
use crate::protocol::codec::OutgoingFrame;
use crate::protocol::constants::Commands;
use crate::protocol::data::{
    ChannelsData, ChannelsRhythms, Sample, TimedValue, samples_to_channels,
};
use crate::protocol::device::{ChannelMode, DeviceInfo};
use crate::protocol::response::Response;
use crate::registry::DeviceId;
use crate::timer::{Scheduler, TimerKind};

/// Default grab-mode polling period.
pub const DEFAULT_GRAB_INTERVAL: Duration = Duration::from_millis(50);

/// One grab-mode subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabKind {
    FilteredData,
    RawData,
    RhythmsHistory,
    MeditationHistory,
    ConcentrationHistory,
}

impl GrabKind {
    pub const ALL: [GrabKind; 5] = [
        GrabKind::FilteredData,
        GrabKind::RawData,
        GrabKind::RhythmsHistory,
        GrabKind::MeditationHistory,
        GrabKind::ConcentrationHistory,
    ];

    /// Command sent on each grab tick.
    #[must_use]
    pub fn command(self) -> &'static str {
        match self {
            GrabKind::FilteredData => Commands::GRAB_FILTERED_DATA,
            GrabKind::RawData => Commands::GRAB_RAW_DATA,
            GrabKind::RhythmsHistory => Commands::RHYTHMS_HISTORY,
            GrabKind::MeditationHistory => Commands::MEDITATION_HISTORY,
            GrabKind::ConcentrationHistory => Commands::CONCENTRATION_HISTORY,
        }
    }
}

/// Enabled grab subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GrabFlags {
    pub filtered_data: bool,
    pub raw_data: bool,
    pub rhythms_history: bool,
    pub meditation_history: bool,
    pub concentration_history: bool,
}

impl GrabFlags {
    #[must_use]
    pub fn get(&self, kind: GrabKind) -> bool {
        match kind {
            GrabKind::FilteredData => self.filtered_data,
            GrabKind::RawData => self.raw_data,
            GrabKind::RhythmsHistory => self.rhythms_history,
            GrabKind::MeditationHistory => self.meditation_history,
            GrabKind::ConcentrationHistory => self.concentration_history,
        }
    }

    pub fn set(&mut self, kind: GrabKind, enabled: bool) {
        let slot = match kind {
            GrabKind::FilteredData => &mut self.filtered_data,
            GrabKind::RawData => &mut self.raw_data,
            GrabKind::RhythmsHistory => &mut self.rhythms_history,
            GrabKind::MeditationHistory => &mut self.meditation_history,
            GrabKind::ConcentrationHistory => &mut self.concentration_history,
        };
        *slot = enabled;
    }

    /// `true` if at least one subscription is enabled.
    #[must_use]
    pub fn any(&self) -> bool {
        GrabKind::ALL.into_iter().any(|kind| self.get(kind))
    }

    /// Enabled kinds in a fixed order.
    pub fn enabled(&self) -> impl Iterator<Item = GrabKind> + '_ {
        GrabKind::ALL.into_iter().filter(|kind| self.get(*kind))
    }
}

/// Owned snapshot of a session's identity and status.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub id: DeviceId,
    pub info: DeviceInfo,
    pub connected: bool,
    pub started: bool,
    pub grab: GrabFlags,
}

/// State of one device known to the hub.
#[derive(Debug)]
pub struct DeviceSession {
    id: DeviceId,
    info: DeviceInfo,

    connected: bool,
    started: bool,

    grab: GrabFlags,
    /// `enabledatagrabmode` sent, acknowledgement not yet seen.
    grab_requested: bool,
    grab_interval: Duration,

    spectrum: ChannelsData,
    spectrum_frequencies: Vec<f64>,
    rhythms: ChannelsRhythms,
    meditation: f64,
    concentration: f64,

    filtered_buffer: VecDeque<Sample>,
    raw_buffer: VecDeque<Sample>,
    rhythms_buffer: VecDeque<ChannelsRhythms>,
    meditation_buffer: VecDeque<TimedValue>,
    concentration_buffer: VecDeque<TimedValue>,
}

impl DeviceSession {
    #[must_use]
    pub fn new(id: DeviceId, info: DeviceInfo, grab_interval: Duration) -> Self {
        Self {
            id,
            info,
            connected: false,
            started: false,
            grab: GrabFlags::default(),
            grab_requested: false,
            grab_interval,
            spectrum: Vec::new(),
            spectrum_frequencies: Vec::new(),
            rhythms: Vec::new(),
            meditation: 0.0,
            concentration: 0.0,
            filtered_buffer: VecDeque::new(),
            raw_buffer: VecDeque::new(),
            rhythms_buffer: VecDeque::new(),
            meditation_buffer: VecDeque::new(),
            concentration_buffer: VecDeque::new(),
        }
    }

    /// Ordinal id, equal to the session's creation rank.
    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[must_use]
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.info.model
    }

    #[must_use]
    pub fn serial_number(&self) -> &str {
        &self.info.serial_number
    }

    #[must_use]
    pub fn max_channels(&self) -> u32 {
        self.info.max_channels
    }

    #[must_use]
    pub fn preferred_channel_count(&self) -> u32 {
        self.info.preferred_channel_count
    }

    #[must_use]
    pub fn channel_modes(&self) -> &[ChannelMode] {
        &self.info.channel_modes
    }

    /// Whether the hub's last discovery reply listed this device.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the hub confirmed this device as running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub fn grab_flags(&self) -> GrabFlags {
        self.grab
    }

    #[must_use]
    pub fn is_grabbing(&self, kind: GrabKind) -> bool {
        self.grab.get(kind)
    }

    #[must_use]
    pub fn grab_interval(&self) -> Duration {
        self.grab_interval
    }

    /// Latest spectrum, `spectrum[channel][bin]`.
    #[must_use]
    pub fn spectrum(&self) -> &ChannelsData {
        &self.spectrum
    }

    /// Bin frequencies for [`spectrum`](Self::spectrum).
    #[must_use]
    pub fn spectrum_frequencies(&self) -> &[f64] {
        &self.spectrum_frequencies
    }

    #[must_use]
    pub fn rhythms(&self) -> &ChannelsRhythms {
        &self.rhythms
    }

    #[must_use]
    pub fn meditation(&self) -> f64 {
        self.meditation
    }

    #[must_use]
    pub fn concentration(&self) -> f64 {
        self.concentration
    }

    /// Number of entries waiting in one grab buffer.
    #[must_use]
    pub fn buffered(&self, kind: GrabKind) -> usize {
        match kind {
            GrabKind::FilteredData => self.filtered_buffer.len(),
            GrabKind::RawData => self.raw_buffer.len(),
            GrabKind::RhythmsHistory => self.rhythms_buffer.len(),
            GrabKind::MeditationHistory => self.meditation_buffer.len(),
            GrabKind::ConcentrationHistory => self.concentration_buffer.len(),
        }
    }

    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            id: self.id,
            info: self.info.clone(),
            connected: self.connected,
            started: self.started,
            grab: self.grab,
        }
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Forget an unacknowledged `enabledatagrabmode`; its reply will not come.
    pub(crate) fn reset_grab_request(&mut self) {
        self.grab_requested = false;
    }
}

/// Mutable access to a session together with the hub resources it drives.
///
/// Obtained from [`HubConnection::device`](crate::hub::HubConnection::device).
/// Dereferences to [`DeviceSession`] for reads.
pub struct DeviceControl<'a> {
    session: &'a mut DeviceSession,
    out: &'a mut Outbox,
    timers: &'a mut Scheduler,
}

impl Deref for DeviceControl<'_> {
    type Target = DeviceSession;

    fn deref(&self) -> &DeviceSession {
        self.session
    }
}

impl<'a> DeviceControl<'a> {
    pub(crate) fn new(
        session: &'a mut DeviceSession,
        out: &'a mut Outbox,
        timers: &'a mut Scheduler,
    ) -> Self {
        Self {
            session,
            out,
            timers,
        }
    }

    fn send(&mut self, frame: impl Into<OutgoingFrame>) {
        self.out.send(frame);
    }

    fn emit(&mut self, event: DeviceEvent) {
        self.out.emit_device(self.session.id, event);
    }

    fn grab_timer(&self) -> TimerKind {
        TimerKind::Grab(self.session.id)
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Ask the hub to start this device with its default channel count.
    ///
    /// The session counts as started only once the hub confirms it.
    pub fn start(&mut self) {
        self.session.started = false;
        let sn = self.session.info.serial_number.clone();
        self.send(OutgoingFrame::object(
            Commands::START_DEVICE,
            [("sn", sn.into())],
        ));
    }

    /// Ask the hub to start this device with `channels` channels.
    pub fn start_with_channels(&mut self, channels: u32) {
        self.session.started = false;
        let sn = self.session.info.serial_number.clone();
        self.send(OutgoingFrame::object(
            Commands::START_DEVICE,
            [("sn", sn.into()), ("channels", channels.into())],
        ));
    }

    /// Stop the device. Every grab subscription is cancelled first.
    pub fn stop(&mut self) {
        self.session.started = false;
        self.session.grab = GrabFlags::default();
        self.switch_grab_mode();
        self.send(Commands::STOP_DEVICE);
    }

    /// Make this device the hub's favorite and refresh the favorite name.
    pub fn make_favorite(&mut self) {
        let name = self.session.info.name.clone();
        self.send(OutgoingFrame::object(
            Commands::MAKE_FAVORITE,
            [("value", name.into())],
        ));
        self.send(Commands::GET_FAVORITE_DEVICE_NAME);
    }

    /// Mark the session started. `Ready` is raised only on the
    /// not-started to started edge; spectrum frequencies are re-requested
    /// every time.
    pub(crate) fn set_started(&mut self) {
        let newly_started = !self.session.started;
        self.session.started = true;
        self.send(Commands::SPECTRUM_FREQUENCIES);
        if newly_started {
            tracing::info!(device = %self.session.info.name, "Device started");
            self.emit(DeviceEvent::Ready);
        }
    }

    // ─── Single-shot requests ───────────────────────────────────────

    pub fn request_filtered_data(&mut self) {
        self.send(Commands::FILTERED_DATA);
    }

    pub fn request_raw_data(&mut self) {
        self.send(Commands::RAW_DATA);
    }

    pub fn request_spectrum(&mut self) {
        self.send(Commands::SPECTRUM);
    }

    pub fn request_rhythms(&mut self) {
        self.send(Commands::RHYTHMS);
    }

    pub fn request_meditation(&mut self) {
        self.send(Commands::MEDITATION);
    }

    pub fn request_concentration(&mut self) {
        self.send(Commands::CONCENTRATION);
    }

    /// Meditation and concentration in one reply.
    pub fn request_bci(&mut self) {
        self.send(Commands::BCI);
    }

    pub fn start_record(&mut self) {
        self.send(Commands::START_RECORD);
    }

    /// Stop recording; the files arrive as [`DeviceEvent::RecordedData`].
    pub fn stop_record(&mut self) {
        self.send(Commands::STOP_RECORD);
    }

    // ─── Grab mode ──────────────────────────────────────────────────

    /// Enable or disable one grab subscription.
    pub fn set_grab(&mut self, kind: GrabKind, enabled: bool) {
        self.session.grab.set(kind, enabled);
        self.switch_grab_mode();
    }

    /// Change the grab polling period. A running timer picks it up at once.
    pub fn set_grab_interval(&mut self, interval: Duration) {
        self.session.grab_interval = interval;
        let kind = self.grab_timer();
        self.timers.set_period(kind, interval);
    }

    fn switch_grab_mode(&mut self) {
        let kind = self.grab_timer();
        let running = self.timers.is_active(kind);

        if self.session.grab.any() {
            if !running && !self.session.grab_requested {
                self.session.grab_requested = true;
                self.send(Commands::ENABLE_DATA_GRAB_MODE);
            }
        } else if running || self.session.grab_requested {
            self.session.grab_requested = false;
            self.timers.stop(kind);
            self.send(Commands::DISABLE_DATA_GRAB_MODE);
        }
    }

    /// Ask for grab mode again if a subscription outlived the transport.
    pub(crate) fn resume_grab(&mut self) {
        self.switch_grab_mode();
    }

    /// Another device became the hub's running device.
    ///
    /// The session stops taking data and drops its grab subscriptions. No
    /// `disabledatagrabmode` is sent; grab mode is hub-wide and the new
    /// device may be using it.
    pub(crate) fn supersede(&mut self) {
        tracing::info!(device = %self.session.info.name, "Device no longer running");
        self.session.started = false;
        self.session.grab = GrabFlags::default();
        self.session.grab_requested = false;
        let kind = self.grab_timer();
        self.timers.stop(kind);
    }

    /// One grab tick: a request per enabled subscription.
    pub(crate) fn on_grab_tick(&mut self) {
        let flags = self.session.grab;
        for kind in flags.enabled() {
            self.send(kind.command());
        }
    }

    // ─── Buffers ────────────────────────────────────────────────────

    /// Drain buffered filtered samples as `data[channel][sample]`.
    pub fn read_filtered_data_history(&mut self) -> ChannelsData {
        samples_to_channels(self.session.filtered_buffer.drain(..))
    }

    /// Drain buffered raw samples as `data[channel][sample]`.
    pub fn read_raw_data_history(&mut self) -> ChannelsData {
        samples_to_channels(self.session.raw_buffer.drain(..))
    }

    pub fn read_rhythms_history(&mut self) -> Vec<ChannelsRhythms> {
        self.session.rhythms_buffer.drain(..).collect()
    }

    pub fn read_meditation_history(&mut self) -> Vec<TimedValue> {
        self.session.meditation_buffer.drain(..).collect()
    }

    pub fn read_concentration_history(&mut self) -> Vec<TimedValue> {
        self.session.concentration_buffer.drain(..).collect()
    }

    // ─── Replies ────────────────────────────────────────────────────

    /// Apply one hub reply to this session.
    pub(crate) fn handle(&mut self, response: &Response, now: Instant) {
        match response {
            Response::EnableDataGrabMode => {
                self.session.grab_requested = false;
                if self.session.grab.any() {
                    let (kind, interval) = (self.grab_timer(), self.session.grab_interval);
                    self.timers.start_periodic(kind, interval, now);
                }
                return;
            }
            Response::DisableDataGrabMode => {
                if !self.session.grab.any() {
                    let kind = self.grab_timer();
                    self.timers.stop(kind);
                }
                return;
            }
            _ => {}
        }

        if !self.session.started {
            return;
        }

        match response {
            Response::Spectrum(spectrum) => {
                self.session.spectrum.clone_from(spectrum);
                self.emit(DeviceEvent::SpectrumReady(spectrum.clone()));
            }
            Response::SpectrumFrequencies(frequencies) => {
                self.session.spectrum_frequencies.clone_from(frequencies);
            }
            Response::Rhythms(rhythms) => {
                self.session.rhythms.clone_from(rhythms);
                self.emit(DeviceEvent::RhythmsReady(rhythms.clone()));
            }
            Response::Meditation(value) => {
                self.session.meditation = *value;
                self.emit(DeviceEvent::MeditationReady(*value));
            }
            Response::Concentration(value) => {
                self.session.concentration = *value;
                self.emit(DeviceEvent::ConcentrationReady(*value));
            }
            Response::Bci {
                meditation,
                concentration,
            } => {
                self.session.meditation = *meditation;
                self.session.concentration = *concentration;
                self.emit(DeviceEvent::BciReady {
                    meditation: *meditation,
                    concentration: *concentration,
                });
            }
            Response::FilteredData(data) => self.emit(DeviceEvent::FilteredData(data.clone())),
            Response::RawData(data) => self.emit(DeviceEvent::RawData(data.clone())),
            Response::GrabFilteredData(samples) => {
                if self.session.grab.filtered_data {
                    self.session.filtered_buffer.extend(samples.iter().cloned());
                }
            }
            Response::GrabRawData(samples) => {
                if self.session.grab.raw_data {
                    self.session.raw_buffer.extend(samples.iter().cloned());
                }
            }
            Response::RhythmsHistory(entries) => {
                if let Some(last) = entries.last() {
                    self.session.rhythms.clone_from(last);
                }
                if self.session.grab.rhythms_history {
                    self.session.rhythms_buffer.extend(entries.iter().cloned());
                }
            }
            Response::MeditationHistory(entries) => {
                if let Some(last) = entries.last() {
                    self.session.meditation = last.value;
                }
                if self.session.grab.meditation_history {
                    self.session.meditation_buffer.extend(entries.iter().copied());
                }
            }
            Response::ConcentrationHistory(entries) => {
                if let Some(last) = entries.last() {
                    self.session.concentration = last.value;
                }
                if self.session.grab.concentration_history {
                    self.session
                        .concentration_buffer
                        .extend(entries.iter().copied());
                }
            }
            Response::RecordStopped { edf, npd } => {
                tracing::info!(
                    device = %self.session.info.name,
                    edf_bytes = edf.len(),
                    npd_bytes = npd.len(),
                    "Recording received"
                );
                self.emit(DeviceEvent::RecordedData {
                    edf: edf.clone(),
                    npd: npd.clone(),
                });
            }
            _ => {}
        }
    }
}
