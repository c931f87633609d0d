//! Device listing payloads (`listdevices`, `currentdeviceinfo`).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{NeuroplayError, NeuroplayResult};
use crate::protocol::codec::value_to_i64;

/// One supported acquisition mode of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelMode {
    /// Number of channels acquired in this mode.
    #[serde(default, deserialize_with = "lenient_count")]
    pub channels: u32,

    /// Sample rate in Hz.
    #[serde(default, deserialize_with = "lenient_count")]
    pub frequency: u32,
}

impl std::fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ch@{}Hz", self.channels, self.frequency)
    }
}

/// Identity and capabilities of a device as reported by the hub.
///
/// Missing fields default to empty / zero. Apart from `name`, a field of the
/// wrong type reads as its default too; counts accept floats and clamp
/// negatives to zero.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Device name; the registry key.
    #[serde(default)]
    pub name: String,

    /// Hardware model, e.g. "NeuroPlay-8Cap".
    #[serde(default, deserialize_with = "lenient_string")]
    pub model: String,

    /// Serial number, used by `startdevice`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub serial_number: String,

    #[serde(default, deserialize_with = "lenient_count")]
    pub max_channels: u32,

    #[serde(default, deserialize_with = "lenient_count")]
    pub preferred_channel_count: u32,

    /// Supported (channel count, sample rate) pairs, in hub order.
    #[serde(default, deserialize_with = "lenient_modes")]
    pub channel_modes: Vec<ChannelMode>,
}

impl DeviceInfo {
    /// Parse a device entry.
    ///
    /// # Errors
    /// Returns [`NeuroplayError::ProtocolError`] if the entry is not an
    /// object or its `name` is not a string.
    pub fn from_value(value: &serde_json::Value) -> NeuroplayResult<Self> {
        Self::deserialize(value).map_err(|e| NeuroplayError::ProtocolError {
            reason: format!("Failed to parse device entry: {e}"),
        })
    }

    /// Channel modes rendered as `"<channels>ch@<frequency>Hz"`.
    #[must_use]
    pub fn channel_mode_labels(&self) -> Vec<String> {
        self.channel_modes.iter().map(ToString::to_string).collect()
    }
}

/// Any JSON number as a non-negative count; anything else is 0.
fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(u32::try_from(value_to_i64(&value).max(0)).unwrap_or(u32::MAX))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().unwrap_or_default().to_string())
}

/// Mode entries that are not objects are skipped.
fn lenient_modes<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<ChannelMode>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_array()
        .map(|modes| {
            modes
                .iter()
                .filter(|mode| mode.is_object())
                .filter_map(|mode| ChannelMode::deserialize(mode).ok())
                .collect()
        })
        .unwrap_or_default())
}
