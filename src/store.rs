//! Shared mutable state the RF thread publishes and the host thread reads.
//!
//! A single coarse mutex guards the whole snapshot, matching the
//! actor-style `Arc<RwLock<...>>` sharing this crate's driver layer is
//! modeled on, simplified to `std::sync::Mutex` since the RF thread does
//! blocking synchronous I/O rather than running inside an async runtime.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::frame::{CurrentReading, DeviceConfig, HistoryRecord};
use crate::identity::PairingState;
use crate::station_config::StationConfig;

/// Decoded low nibble of the status byte every inbound frame carries. The
/// reference driver is explicit that it isn't fully sure what this nibble
/// means; this crate exposes it as a best-effort bit-per-sensor "low
/// battery" signal rather than guessing at unused bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatteryStatus(pub u8);

impl BatteryStatus {
    pub fn console_low(&self) -> bool {
        self.0 & 0x1 != 0
    }

    pub fn any_sensor_low(&self) -> bool {
        self.0 & 0xE != 0
    }
}

/// Liveness of the link, tracked independently of whether we have decoded
/// weather data yet -- the engine can be "connected" to a console that has
/// not yet produced a current-weather frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No frame has been seen since startup.
    WaitingForConsole,
    /// Last frame seen at `last_seen`.
    Connected { last_seen_age: Duration },
    /// No frame seen for longer than the staleness threshold.
    Lost { silent_for: Duration },
}

/// History-scan bookkeeping for a catchup pass, modelled on the reference
/// driver's history cache.
#[derive(Debug, Clone, Default)]
pub struct HistoryCache {
    pub since: Option<chrono::NaiveDateTime>,
    pub start_index: Option<u32>,
    pub next_index: Option<u32>,
    pub latest_index: Option<u32>,
    pub num_scanned: u32,
    pub num_outstanding: u32,
    pub records: Vec<HistoryRecord>,
}

#[derive(Default)]
struct Inner {
    pairing: PairingState,
    current: Option<CurrentReading>,
    config: Option<DeviceConfig>,
    battery: BatteryStatus,
    history: HistoryCache,
    last_frame_seen: Option<Instant>,
    last_weather_seen: Option<Instant>,
    history_enabled: bool,
    pending_config: Option<StationConfig>,
}

impl Default for PairingState {
    fn default() -> Self {
        PairingState::Unpaired
    }
}

/// Shared handle. Clones are cheap (an `Arc` bump) and all clones see the
/// same underlying state.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
}

/// Threshold after which [`Store::connection_status`] reports the link as
/// lost rather than merely connected-but-quiet.
pub const STALE_AFTER: Duration = Duration::from_secs(300);

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pairing(&self) -> PairingState {
        self.inner.lock().unwrap().pairing
    }

    pub fn set_pairing(&self, state: PairingState) {
        self.inner.lock().unwrap().pairing = state;
    }

    pub fn current_reading(&self) -> Option<CurrentReading> {
        self.inner.lock().unwrap().current.clone()
    }

    pub fn set_current_reading(&self, reading: CurrentReading) {
        let mut inner = self.inner.lock().unwrap();
        inner.current = Some(reading);
        inner.last_weather_seen = Some(Instant::now());
    }

    /// Time since the last decoded current-weather reading, or `None` if
    /// none has ever arrived.
    pub fn weather_age(&self) -> Option<Duration> {
        self.inner.lock().unwrap().last_weather_seen.map(|t| t.elapsed())
    }

    pub fn config(&self) -> Option<DeviceConfig> {
        self.inner.lock().unwrap().config.clone()
    }

    pub fn set_config(&self, config: DeviceConfig) {
        self.inner.lock().unwrap().config = Some(config);
    }

    pub fn battery(&self) -> BatteryStatus {
        self.inner.lock().unwrap().battery
    }

    pub fn set_battery(&self, battery: BatteryStatus) {
        self.inner.lock().unwrap().battery = battery;
    }

    pub fn history(&self) -> HistoryCache {
        self.inner.lock().unwrap().history.clone()
    }

    pub fn update_history<F: FnOnce(&mut HistoryCache)>(&self, f: F) {
        f(&mut self.inner.lock().unwrap().history);
    }

    pub fn history_enabled(&self) -> bool {
        self.inner.lock().unwrap().history_enabled
    }

    pub fn set_history_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().history_enabled = enabled;
    }

    /// A config the host wants written to the console, staged until the RF
    /// thread sees a matching config reconciliation opportunity.
    pub fn pending_config(&self) -> Option<StationConfig> {
        self.inner.lock().unwrap().pending_config.clone()
    }

    pub fn stage_config(&self, config: StationConfig) {
        self.inner.lock().unwrap().pending_config = Some(config);
    }

    /// Clears the staged config, e.g. once the RF thread has sent it.
    pub fn clear_pending_config(&self) {
        self.inner.lock().unwrap().pending_config = None;
    }

    pub fn note_frame_seen(&self) {
        self.inner.lock().unwrap().last_frame_seen = Some(Instant::now());
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let last_seen = self.inner.lock().unwrap().last_frame_seen;
        match last_seen {
            None => ConnectionStatus::WaitingForConsole,
            Some(t) => {
                let age = t.elapsed();
                if age > STALE_AFTER {
                    ConnectionStatus::Lost { silent_for: age }
                } else {
                    ConnectionStatus::Connected { last_seen_age: age }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_reports_waiting_for_console() {
        let store = Store::new();
        assert_eq!(store.connection_status(), ConnectionStatus::WaitingForConsole);
    }

    #[test]
    fn noting_a_frame_marks_connected() {
        let store = Store::new();
        store.note_frame_seen();
        assert!(matches!(store.connection_status(), ConnectionStatus::Connected { .. }));
    }

    #[test]
    fn battery_status_decodes_console_and_sensor_bits() {
        let status = BatteryStatus(0b0101);
        assert!(status.console_low());
        assert!(status.any_sensor_low());
        assert!(!BatteryStatus(0).console_low());
    }

    #[test]
    fn store_clones_share_state() {
        let store = Store::new();
        let clone = store.clone();
        clone.set_pairing(PairingState::Paired(0x1234));
        assert_eq!(store.pairing(), PairingState::Paired(0x1234));
    }

    #[test]
    fn history_update_mutates_through_shared_handle() {
        let store = Store::new();
        store.update_history(|h| h.num_scanned = 5);
        assert_eq!(store.history().num_scanned, 5);
    }
}
