//! Value shapes for data replies and the grab-mode reshape.
//!
//! The hub sends multi-channel data channel-major (`data[channel][sample]`).
//! Grab-mode buffers store it sample-major, one [`Sample`] per instant, and
//! drains turn it back into channel-major [`ChannelsData`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NeuroplayError, NeuroplayResult};
use crate::protocol::codec::value_to_i64;

/// Channel-major matrix: `data[channel][sample]`.
pub type ChannelsData = Vec<Vec<f64>>;

/// One instant across all channels: `sample[channel]`.
pub type Sample = Vec<f64>;

/// Band powers of one channel at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rhythms {
    pub delta: f64,
    pub theta: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    /// Hub timestamp in milliseconds.
    pub timestamp: i64,
}

/// Per-channel rhythms snapshot.
pub type ChannelsRhythms = Vec<Rhythms>;

/// A score with its hub timestamp in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimedValue {
    pub value: f64,
    pub timestamp: i64,
}

impl Rhythms {
    /// Parse `{delta, theta, alpha, beta, gamma, t}`; missing fields are zero.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let num = |key: &str| value.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        Self {
            delta: num("delta"),
            theta: num("theta"),
            alpha: num("alpha"),
            beta: num("beta"),
            gamma: num("gamma"),
            timestamp: value.get("t").map_or(0, value_to_i64),
        }
    }
}

impl TimedValue {
    /// Parse `{v, t}`; missing fields are zero.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        Self {
            value: value.get("v").and_then(Value::as_f64).unwrap_or(0.0),
            timestamp: value.get("t").map_or(0, value_to_i64),
        }
    }
}

/// Numbers of a JSON array; non-numbers become `0.0`.
#[must_use]
pub fn parse_vector(values: &[Value]) -> Vec<f64> {
    values.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect()
}

/// Array of arrays of numbers. Non-array rows become empty rows.
#[must_use]
pub fn parse_matrix(rows: &[Value]) -> ChannelsData {
    rows.iter()
        .map(|row| row.as_array().map(|r| parse_vector(r)).unwrap_or_default())
        .collect()
}

/// Per-channel rhythms list.
#[must_use]
pub fn parse_rhythms(channels: &[Value]) -> ChannelsRhythms {
    channels.iter().map(Rhythms::from_value).collect()
}

/// Transpose a channel-major grab batch into sample-major entries.
///
/// The first channel's length is the batch's sample count; every other
/// channel has to match it.
///
/// # Errors
/// Returns [`NeuroplayError::InvalidBatch`] for an empty channel list, a
/// channel that is not an array, or channels of unequal length.
pub fn transpose_batch(channels: &[Value]) -> NeuroplayResult<Vec<Sample>> {
    if channels.is_empty() {
        return Err(NeuroplayError::InvalidBatch {
            reason: "batch has no channels".into(),
        });
    }

    let rows = channels
        .iter()
        .enumerate()
        .map(|(index, channel)| {
            channel
                .as_array()
                .map(|row| parse_vector(row))
                .ok_or_else(|| NeuroplayError::InvalidBatch {
                    reason: format!("channel {index} is not an array"),
                })
        })
        .collect::<NeuroplayResult<Vec<_>>>()?;

    let count = rows[0].len();
    if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != count) {
        return Err(NeuroplayError::InvalidBatch {
            reason: format!(
                "channel {index} has {} samples, channel 0 has {count}",
                row.len()
            ),
        });
    }

    Ok((0..count)
        .map(|i| rows.iter().map(|row| row[i]).collect())
        .collect())
}

/// Turn drained sample-major entries back into channel-major data.
///
/// Entries may differ in width; each channel gets the samples of the
/// entries wide enough to contain it.
#[must_use]
pub fn samples_to_channels(samples: impl IntoIterator<Item = Sample>) -> ChannelsData {
    let mut result: ChannelsData = Vec::new();
    for sample in samples {
        if result.len() < sample.len() {
            result.resize_with(sample.len(), Vec::new);
        }
        for (channel, value) in sample.into_iter().enumerate() {
            result[channel].push(value);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(value: Value) -> Vec<Value> {
        value.as_array().cloned().unwrap()
    }

    #[test]
    fn test_transpose_two_by_three() {
        let samples = transpose_batch(&batch(json!([[1, 2, 3], [4, 5, 6]]))).unwrap();
        assert_eq!(samples, vec![vec![1.0, 4.0], vec![2.0, 5.0], vec![3.0, 6.0]]);
    }

    #[test]
    fn test_transpose_then_drain_restores_shape() {
        let data = json!([[0.5, -1.0, 2.25, 7.0], [3.0, 3.5, 4.0, 4.5], [9.0, 8.0, 7.0, 6.0]]);
        let samples = transpose_batch(&batch(data.clone())).unwrap();
        assert_eq!(samples.len(), 4);

        let restored = samples_to_channels(samples);
        assert_eq!(restored, parse_matrix(&batch(data)));
    }

    #[test]
    fn test_transpose_rejects_empty_channel_list() {
        let err = transpose_batch(&[]).unwrap_err();
        assert!(matches!(err, NeuroplayError::InvalidBatch { .. }));
    }

    #[test]
    fn test_transpose_rejects_ragged_batch() {
        let err = transpose_batch(&batch(json!([[1, 2, 3], [4, 5]]))).unwrap_err();
        assert!(err.to_string().contains("channel 1 has 2 samples"));
    }

    #[test]
    fn test_transpose_rejects_non_array_channel() {
        let err = transpose_batch(&batch(json!([[1, 2], 3]))).unwrap_err();
        assert!(matches!(err, NeuroplayError::InvalidBatch { .. }));
    }

    #[test]
    fn test_transpose_zero_samples_is_empty() {
        let samples = transpose_batch(&batch(json!([[], []]))).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_drain_handles_mixed_widths() {
        let restored = samples_to_channels(vec![vec![1.0], vec![2.0, 3.0]]);
        assert_eq!(restored, vec![vec![1.0, 2.0], vec![3.0]]);
    }

    #[test]
    fn test_rhythms_and_timed_value_parsing() {
        let r = Rhythms::from_value(&json!({
            "delta": 1.0, "theta": 2.0, "alpha": 3.0, "beta": 4.0, "gamma": 5.0, "t": 1200
        }));
        assert_eq!(r.alpha, 3.0);
        assert_eq!(r.timestamp, 1200);

        let missing = Rhythms::from_value(&json!({}));
        assert_eq!(missing, Rhythms::default());

        let tv = TimedValue::from_value(&json!({"v": 61.5, "t": 40}));
        assert_eq!(
            tv,
            TimedValue {
                value: 61.5,
                timestamp: 40
            }
        );
    }

    #[test]
    fn test_parse_matrix_is_lenient() {
        let m = parse_matrix(&batch(json!([[1, "x"], "row", [2.5]])));
        assert_eq!(m, vec![vec![1.0, 0.0], vec![], vec![2.5]]);
    }
}
