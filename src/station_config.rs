//! Host-facing view of the console's persistent configuration.
//!
//! The reference driver's own config-write path (`buildConfigFrame`,
//! `testConfigChanged`) is an acknowledged stub -- `testConfigChanged`
//! unconditionally returns false, so a config push is never actually
//! triggered. This module keeps the mechanism real (a host can stage a
//! config it wants written and ask whether it differs from what the
//! console last reported) without inventing semantics for the comfort-zone
//! and alarm settings neither driver revision decodes.

use crate::codec;
use crate::frame::{outbound::Action, DeviceConfig};

/// The console's history-sampling cadence. Values and minute-equivalents
/// are the reference driver's own first-guess table -- it notes these
/// were never confirmed against a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryInterval {
    Min01,
    Min05,
    Min10,
    Min15,
    Min20,
    Min30,
    Min60,
    Hour02,
    Hour04,
    Hour06,
}

impl HistoryInterval {
    pub fn minutes(self) -> u32 {
        match self {
            HistoryInterval::Min01 => 1,
            HistoryInterval::Min05 => 5,
            HistoryInterval::Min10 => 10,
            HistoryInterval::Min15 => 15,
            HistoryInterval::Min20 => 20,
            HistoryInterval::Min30 => 30,
            HistoryInterval::Min60 => 60,
            HistoryInterval::Hour02 => 120,
            HistoryInterval::Hour04 => 240,
            HistoryInterval::Hour06 => 360,
        }
    }
}

/// The length of a config frame (inbound or outbound), matching the
/// reference driver's `0x7D`-byte config message.
pub const CONFIG_FRAME_LEN: usize = 125;

/// A config the host wants written to the console, staged until it is
/// compared against what the console last reported.
///
/// `body` carries the same 125-byte layout [`DeviceConfig::raw`] does;
/// this crate does not interpret the comfort-zone and alarm fields within
/// it. Per the reference driver's explicit warning, leave any
/// alarm/wind-direction flags zero -- an active alarm halts the data
/// stream.
#[derive(Debug, Clone)]
pub struct StationConfig {
    pub body: [u8; CONFIG_FRAME_LEN],
}

impl StationConfig {
    /// Whether `self` differs from the console's last-reported config,
    /// compared over the same byte range the checksum covers
    /// (`bytes[4..116]`). `None` (no config seen yet) counts as "differs":
    /// there is nothing to compare against yet, so nothing to confirm is
    /// unchanged.
    pub fn changed(&self, known: Option<&DeviceConfig>) -> bool {
        match known {
            None => true,
            Some(known) => known.raw.get(4..116) != self.body.get(4..116),
        }
    }
}

/// Builds the outbound config-write frame: the staged config body with the
/// in-buffer checksum field overwritten to the freshly computed
/// out-buffer checksum, so the console's next current-weather frame will
/// echo back a checksum that matches.
pub fn build_config_frame(buffer_id: u16, config: &StationConfig) -> [u8; CONFIG_FRAME_LEN] {
    let mut buf = config.body;
    buf[0] = (buffer_id >> 8) as u8;
    buf[1] = buffer_id as u8;
    buf[2] = Action::SendConfig as u8;
    let out_cs = codec::config_checksum(&buf);
    buf[46] = (out_cs >> 8) as u8;
    buf[47] = out_cs as u8;
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_interval_minutes_match_reference_table() {
        assert_eq!(HistoryInterval::Min05.minutes(), 5);
        assert_eq!(HistoryInterval::Hour06.minutes(), 360);
    }

    #[test]
    fn unseen_config_always_counts_as_changed() {
        let staged = StationConfig { body: [0u8; CONFIG_FRAME_LEN] };
        assert!(staged.changed(None));
    }

    #[test]
    fn config_frame_out_checksum_is_self_consistent() {
        let staged = StationConfig { body: [7u8; CONFIG_FRAME_LEN] };
        let frame = build_config_frame(0x1234, &staged);
        let out_cs = codec::config_checksum(&frame);
        assert_eq!(((frame[46] as u16) << 8) | frame[47] as u16, out_cs);
    }

    #[test]
    fn changed_detects_difference_in_checksummed_range() {
        let mut body = [0u8; CONFIG_FRAME_LEN];
        body[50] = 0xAB;
        let staged = StationConfig { body };
        let known = DeviceConfig { raw: vec![0u8; CONFIG_FRAME_LEN].into_boxed_slice(), in_checksum: 0 };
        assert!(staged.changed(Some(&known)));
    }
}
