//! Typed view of hub replies.
//!
//! Every reply is keyed only by its `command` field. [`Response::parse`]
//! maps the command to one variant and pulls its payload out with fixed
//! field names; absent fields fall back to zero / empty.
//!
//! | command | payload fields |
//! |---|---|
//! | `help` | `commands: [{command, description}]` |
//! | `version` | `version` (only when `result` is true) |
//! | `getfavoritedevicename` | `device` |
//! | `getfilters`, `setdefaultfilters` | `LPF`, `HPF`, `BSF` |
//! | `getdatastoragetime` | `storagetime` |
//! | `listdevices` | `devices: [DeviceInfo]` |
//! | `currentdeviceinfo` | `device: DeviceInfo` (when `result` is true) |
//! | `spectrum`, `lastspectrum` | `spectrum: [[f64]]` |
//! | `spectrumfrequencies` | `spectrum: [f64]` |
//! | `rhythms` | `rhythms: [Rhythms]` |
//! | `meditation` / `concentration` | same-named number |
//! | `bci` | `meditation`, `concentration` |
//! | `filtereddata`, `rawdata` | `data: [[f64]]` |
//! | `grabfiltereddata`, `grabrawdata` | `data: [[f64]]`, transposed |
//! | `rhythmshistory` | `history: [[Rhythms]]` |
//! | `meditationhistory`, `concentrationhistory` | `history: [{v, t}]` |
//! | `stoprecord` | `files: [{type, data}]` (when `result` is true) |

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NeuroplayResult;
use crate::protocol::codec::DecodedMessage;
use crate::protocol::constants::Commands;
use crate::protocol::data::{
    ChannelsData, ChannelsRhythms, Sample, TimedValue, parse_matrix, parse_rhythms, parse_vector,
    transpose_batch,
};
use crate::protocol::device::DeviceInfo;

/// Hub filter settings in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Low-pass cutoff.
    pub low_pass: f64,
    /// High-pass cutoff.
    pub high_pass: f64,
    /// Band-stop (mains notch) frequency.
    pub band_stop: f64,
}

/// A hub reply, interpreted by command name.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Help { commands: Vec<(String, String)> },
    Version(String),
    FavoriteDeviceName(String),
    Filters(FilterSettings),
    DataStorageTime(i64),
    StartSearch,
    ListDevices(Vec<DeviceInfo>),
    StartDevice,
    /// `Some` when the hub reports an active device, `None` when it has none.
    CurrentDeviceInfo(Option<DeviceInfo>),
    EnableDataGrabMode,
    DisableDataGrabMode,
    Spectrum(ChannelsData),
    SpectrumFrequencies(Vec<f64>),
    Rhythms(ChannelsRhythms),
    Meditation(f64),
    Concentration(f64),
    Bci { meditation: f64, concentration: f64 },
    FilteredData(ChannelsData),
    RawData(ChannelsData),
    GrabFilteredData(Vec<Sample>),
    GrabRawData(Vec<Sample>),
    RhythmsHistory(Vec<ChannelsRhythms>),
    MeditationHistory(Vec<TimedValue>),
    ConcentrationHistory(Vec<TimedValue>),
    RecordStopped { edf: Vec<u8>, npd: Vec<u8> },
    /// Anything this client does not interpret (setter acks, heartbeats,
    /// unsuccessful `version` / `stoprecord`).
    Other,
}

impl Response {
    /// Interpret a decoded reply.
    ///
    /// # Errors
    /// Returns [`InvalidBatch`](crate::NeuroplayError::InvalidBatch) for a
    /// grab reply whose channels cannot be transposed, and
    /// [`ProtocolError`](crate::NeuroplayError::ProtocolError) for a
    /// `currentdeviceinfo` whose device entry is malformed.
    pub fn parse(msg: &DecodedMessage) -> NeuroplayResult<Self> {
        let command = msg.command().to_ascii_lowercase();
        let response = match command.as_str() {
            Commands::HELP => Response::Help {
                commands: msg
                    .array_field("commands")
                    .iter()
                    .map(|entry| {
                        let text = |key: &str| {
                            entry
                                .get(key)
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string()
                        };
                        (text("command"), text("description"))
                    })
                    .collect(),
            },
            Commands::VERSION if msg.result() => {
                Response::Version(msg.str_field("version").to_string())
            }
            Commands::GET_FAVORITE_DEVICE_NAME => {
                Response::FavoriteDeviceName(msg.str_field("device").to_string())
            }
            Commands::GET_FILTERS | Commands::SET_DEFAULT_FILTERS => {
                Response::Filters(FilterSettings {
                    low_pass: msg.f64_field("LPF"),
                    high_pass: msg.f64_field("HPF"),
                    band_stop: msg.f64_field("BSF"),
                })
            }
            Commands::GET_DATA_STORAGE_TIME => {
                Response::DataStorageTime(msg.i64_field("storagetime"))
            }
            Commands::START_SEARCH => Response::StartSearch,
            Commands::LIST_DEVICES => Response::ListDevices(parse_device_list(msg)),
            Commands::START_DEVICE => Response::StartDevice,
            Commands::CURRENT_DEVICE_INFO => {
                if msg.result() {
                    let device = msg.field("device").cloned().unwrap_or(Value::Null);
                    Response::CurrentDeviceInfo(Some(DeviceInfo::from_value(&device)?))
                } else {
                    Response::CurrentDeviceInfo(None)
                }
            }
            Commands::ENABLE_DATA_GRAB_MODE => Response::EnableDataGrabMode,
            Commands::DISABLE_DATA_GRAB_MODE => Response::DisableDataGrabMode,
            Commands::SPECTRUM | Commands::LAST_SPECTRUM => {
                Response::Spectrum(parse_matrix(msg.array_field("spectrum")))
            }
            Commands::SPECTRUM_FREQUENCIES => {
                Response::SpectrumFrequencies(parse_vector(msg.array_field("spectrum")))
            }
            Commands::RHYTHMS => Response::Rhythms(parse_rhythms(msg.array_field("rhythms"))),
            Commands::MEDITATION => Response::Meditation(msg.f64_field("meditation")),
            Commands::CONCENTRATION => Response::Concentration(msg.f64_field("concentration")),
            "bci" => Response::Bci {
                meditation: msg.f64_field("meditation"),
                concentration: msg.f64_field("concentration"),
            },
            Commands::FILTERED_DATA => Response::FilteredData(parse_matrix(msg.array_field("data"))),
            Commands::RAW_DATA => Response::RawData(parse_matrix(msg.array_field("data"))),
            Commands::GRAB_FILTERED_DATA => {
                Response::GrabFilteredData(transpose_batch(msg.array_field("data"))?)
            }
            Commands::GRAB_RAW_DATA => {
                Response::GrabRawData(transpose_batch(msg.array_field("data"))?)
            }
            Commands::RHYTHMS_HISTORY => Response::RhythmsHistory(
                msg.array_field("history")
                    .iter()
                    .map(|entry| {
                        entry
                            .as_array()
                            .map(|channels| parse_rhythms(channels))
                            .unwrap_or_default()
                    })
                    .collect(),
            ),
            Commands::MEDITATION_HISTORY => Response::MeditationHistory(parse_history(msg)),
            Commands::CONCENTRATION_HISTORY => Response::ConcentrationHistory(parse_history(msg)),
            Commands::STOP_RECORD if msg.result() => {
                let (edf, npd) = parse_recorded_files(msg);
                Response::RecordStopped { edf, npd }
            }
            _ => Response::Other,
        };
        Ok(response)
    }
}

fn parse_device_list(msg: &DecodedMessage) -> Vec<DeviceInfo> {
    msg.array_field("devices")
        .iter()
        .filter_map(|entry| match DeviceInfo::from_value(entry) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable device entry");
                None
            }
        })
        .collect()
}

fn parse_history(msg: &DecodedMessage) -> Vec<TimedValue> {
    msg.array_field("history")
        .iter()
        .map(TimedValue::from_value)
        .collect()
}

fn parse_recorded_files(msg: &DecodedMessage) -> (Vec<u8>, Vec<u8>) {
    let mut edf = Vec::new();
    let mut npd = Vec::new();
    for file in msg.array_field("files") {
        let kind = file.get("type").and_then(Value::as_str).unwrap_or_default();
        let slot = match kind {
            "edf" => &mut edf,
            "npd" => &mut npd,
            _ => continue,
        };
        let encoded = file.get("data").and_then(Value::as_str).unwrap_or_default();
        match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(bytes) => *slot = bytes,
            Err(e) => tracing::warn!(kind, error = %e, "Recorded file is not valid base64"),
        }
    }
    (edf, npd)
}
