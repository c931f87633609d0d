//! NeuroplayPro hub wire protocol.
//!
//! The hub speaks text frames over a plain WebSocket. Requests are either a
//! bare command string or a JSON object with a `command` field; replies are
//! JSON objects echoing `command`, optionally carrying `result` and `error`.
//! There are no request ids, so replies are matched by command name only.
//!
//! - [`constants`]: command names.
//! - [`codec`]: outgoing frame building and incoming frame decoding.
//! - [`response`]: per-command payload interpretation.
//! - [`device`]: device listing payloads.
//! - [`data`]: spectra, rhythms, scores and the grab-batch reshape.

pub mod codec;
pub mod constants;
pub mod data;
pub mod device;
pub mod response;

pub use codec::{DecodedMessage, OutgoingFrame, decode};
pub use constants::Commands;
pub use data::{ChannelsData, ChannelsRhythms, Rhythms, Sample, TimedValue};
pub use device::{ChannelMode, DeviceInfo};
pub use response::{FilterSettings, Response};
