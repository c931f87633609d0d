//! Notifications raised by the hub connection and its device sessions.
//!
//! The state machines never call back into user code. They append frames
//! and notifications to an [`Outbox`], which the owner drains after every
//! input (socket event, frame, timer expiry, method call). Notifications
//! are therefore observed in the order they were raised.

use crate::protocol::codec::OutgoingFrame;
use crate::protocol::data::{ChannelsData, ChannelsRhythms};
use crate::protocol::device::DeviceInfo;
use crate::registry::DeviceId;

/// Hub-level notification.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// The `help` handshake completed. Raised once per physical connection.
    Connected,
    /// The transport closed.
    Disconnected,
    /// The hub reported an error after the handshake.
    Error(String),
    /// A device name was seen for the first time; its session now exists.
    DeviceDiscovered { id: DeviceId, info: DeviceInfo },
    /// The hub reported this device as its running device.
    DeviceReady(DeviceId),
    /// A notification from one device session.
    Device { id: DeviceId, event: DeviceEvent },
}

/// Device-session notification.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The session became started.
    Ready,
    SpectrumReady(ChannelsData),
    RhythmsReady(ChannelsRhythms),
    MeditationReady(f64),
    ConcentrationReady(f64),
    BciReady { meditation: f64, concentration: f64 },
    /// Reply to a single-shot `filtereddata` request.
    FilteredData(ChannelsData),
    /// Reply to a single-shot `rawdata` request.
    RawData(ChannelsData),
    /// Files returned by a successful `stoprecord`.
    RecordedData { edf: Vec<u8>, npd: Vec<u8> },
}

/// Pending outgoing frames and notifications.
#[derive(Debug, Default)]
pub struct Outbox {
    frames: Vec<OutgoingFrame>,
    events: Vec<HubEvent>,
}

impl Outbox {
    pub fn send(&mut self, frame: impl Into<OutgoingFrame>) {
        self.frames.push(frame.into());
    }

    pub fn emit(&mut self, event: HubEvent) {
        self.events.push(event);
    }

    pub fn emit_device(&mut self, id: DeviceId, event: DeviceEvent) {
        self.events.push(HubEvent::Device { id, event });
    }

    pub fn take_frames(&mut self) -> Vec<OutgoingFrame> {
        std::mem::take(&mut self.frames)
    }

    pub fn take_events(&mut self) -> Vec<HubEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drop queued frames; used when the transport goes away.
    pub fn discard_frames(&mut self) {
        self.frames.clear();
    }
}
