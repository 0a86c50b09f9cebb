//! Projects a [`CurrentReading`] onto the 18 host-facing sensor labels
//! (`Temp0..Temp8`, `Humidity0..Humidity8`), with the labels themselves
//! overridable by the caller.

use std::collections::HashMap;

use crate::codec::Reading;
use crate::frame::CurrentReading;

/// The measured quantity an [`Observation`] carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObservationValue {
    Temperature(f64),
    Humidity(u8),
}

/// A single labeled measurement handed to the host application. Channels
/// whose reading decoded to [`Reading::NotPresent`] or
/// [`Reading::OutOfLimits`] never produce an `Observation` -- there is
/// nothing meaningful to hand a caller, so [`SensorMap::project`] omits
/// them rather than surfacing an absent value under a label.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub label: String,
    pub value: ObservationValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Temp(usize),
    Humidity(usize),
}

/// Binds the 18 fixed channel keys to labels an application chooses. The
/// default map uses the channel keys themselves (`Temp0`, `Humidity3`, ...);
/// callers rename channels by overriding individual entries.
#[derive(Debug, Clone)]
pub struct SensorMap {
    labels: HashMap<Channel, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SensorMapError {
    #[error("duplicate sensor label {0:?}")]
    DuplicateLabel(String),
    #[error("channel index {0} out of range (0-8)")]
    ChannelOutOfRange(usize),
}

impl Default for SensorMap {
    fn default() -> Self {
        let mut labels = HashMap::with_capacity(18);
        for i in 0..9 {
            labels.insert(Channel::Temp(i), format!("Temp{i}"));
            labels.insert(Channel::Humidity(i), format!("Humidity{i}"));
        }
        SensorMap { labels }
    }
}

impl SensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename_temperature(&mut self, channel: usize, label: impl Into<String>) -> Result<(), SensorMapError> {
        self.rename(Channel::Temp(channel), label.into())
    }

    pub fn rename_humidity(&mut self, channel: usize, label: impl Into<String>) -> Result<(), SensorMapError> {
        self.rename(Channel::Humidity(channel), label.into())
    }

    fn rename(&mut self, channel: Channel, label: String) -> Result<(), SensorMapError> {
        let idx = match channel {
            Channel::Temp(i) | Channel::Humidity(i) => i,
        };
        if idx >= 9 {
            return Err(SensorMapError::ChannelOutOfRange(idx));
        }
        if self.labels.values().any(|l| l == &label && self.labels.get(&channel) != Some(l)) {
            return Err(SensorMapError::DuplicateLabel(label));
        }
        self.labels.insert(channel, label);
        Ok(())
    }

    /// Validates that every label in the map is unique. Called after a
    /// batch of renames that might individually have passed but collided
    /// pairwise once all applied (the single-rename check above already
    /// prevents this, but this is the cheap authoritative check callers can
    /// run before trusting the map, e.g. after deserializing one).
    pub fn validate(&self) -> Result<(), SensorMapError> {
        let mut seen = std::collections::HashSet::new();
        for label in self.labels.values() {
            if !seen.insert(label) {
                return Err(SensorMapError::DuplicateLabel(label.clone()));
            }
        }
        Ok(())
    }

    /// Projects a decoded current-weather reading into the labeled
    /// observations this map defines, skipping any channel whose value is
    /// absent (see [`Observation`]).
    pub fn project(&self, reading: &CurrentReading) -> Vec<Observation> {
        let mut out = Vec::with_capacity(18);
        for (i, channel) in reading.channels.iter().enumerate() {
            if let Reading::Value(v) = channel.temperature {
                let label = self.labels.get(&Channel::Temp(i)).cloned().unwrap_or_else(|| format!("Temp{i}"));
                out.push(Observation { label, value: ObservationValue::Temperature(v) });
            }
            if let Reading::Value(v) = channel.humidity {
                let label = self.labels.get(&Channel::Humidity(i)).cloned().unwrap_or_else(|| format!("Humidity{i}"));
                out.push(Observation { label, value: ObservationValue::Humidity(v) });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::inbound::SensorChannel;

    fn blank_reading() -> CurrentReading {
        let channel = SensorChannel {
            temperature: Reading::NotPresent,
            temperature_min: Reading::NotPresent,
            temperature_max: Reading::NotPresent,
            temperature_min_ts: None,
            temperature_max_ts: None,
            humidity: Reading::NotPresent,
            humidity_min: Reading::NotPresent,
            humidity_max: Reading::NotPresent,
            humidity_min_ts: None,
            humidity_max_ts: None,
        };
        CurrentReading {
            channels: [channel; 9],
            signal_quality: 0,
            checksum: 0,
        }
    }

    fn filled_reading() -> CurrentReading {
        let mut reading = blank_reading();
        for channel in reading.channels.iter_mut() {
            channel.temperature = Reading::Value(21.3);
            channel.humidity = Reading::Value(55);
        }
        reading
    }

    #[test]
    fn default_map_has_18_distinct_labels() {
        let map = SensorMap::default();
        assert_eq!(map.labels.len(), 18);
        map.validate().unwrap();
    }

    #[test]
    fn rename_rejects_collision_with_existing_label() {
        let mut map = SensorMap::default();
        map.rename_temperature(0, "Outside").unwrap();
        let err = map.rename_humidity(1, "Outside").unwrap_err();
        assert!(matches!(err, SensorMapError::DuplicateLabel(_)));
    }

    #[test]
    fn project_emits_18_observations_when_every_channel_present() {
        let map = SensorMap::default();
        let reading = filled_reading();
        let obs = map.project(&reading);
        assert_eq!(obs.len(), 18);
    }

    #[test]
    fn project_omits_absent_channels_entirely() {
        let map = SensorMap::default();
        let reading = blank_reading();
        let obs = map.project(&reading);
        assert!(obs.is_empty());
    }

    #[test]
    fn rename_is_reflected_in_projection() {
        let mut map = SensorMap::default();
        map.rename_temperature(2, "Greenhouse").unwrap();
        let reading = filled_reading();
        let obs = map.project(&reading);
        assert!(obs
            .iter()
            .any(|o| o.label == "Greenhouse" && matches!(o.value, ObservationValue::Temperature(_))));
    }

    #[test]
    fn renamed_channels_still_omit_absent_readings_independently() {
        // Temp1 -> outTemp, Humidity4 -> leafWet1; when Temp1 decodes NP,
        // its observation is omitted but Humidity4's is still emitted.
        let mut map = SensorMap::default();
        map.rename_temperature(1, "outTemp").unwrap();
        map.rename_humidity(4, "leafWet1").unwrap();
        let mut reading = blank_reading();
        reading.channels[1].temperature = Reading::NotPresent;
        reading.channels[4].humidity = Reading::Value(55);
        let obs = map.project(&reading);
        assert!(!obs.iter().any(|o| o.label == "outTemp"));
        assert!(obs
            .iter()
            .any(|o| o.label == "leafWet1" && o.value == ObservationValue::Humidity(55)));
    }
}
