//! Reactive protocol engine.
//!
//! This is not an async task: the transceiver is a synchronous,
//! state-polling device, so the engine owns a real OS thread that blocks on
//! USB control transfers and `sleep()` between polls, exactly as the
//! hardware expects. The host-facing [`crate::store::Store`] is the only
//! thing shared with the outside world; everything else here is local to
//! the RF thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::codec;
use crate::error::{DriverError, Result};
use crate::frame::{self, Action, CurrentReading, DeviceConfig, HistoryBlock, ResponseType};
use crate::identity::{PairingState, BROADCAST_DEVICE_ID};
use crate::radio::{self, DeviceIdentity, Frequency};
use crate::station_config::{self, StationConfig};
use crate::store::{BatteryStatus, Store};
use crate::transport::UsbTransport;

/// Sleep pair the reference driver toggles between: a first sleep before
/// polling starts, and a shorter one between each subsequent poll.
#[derive(Debug, Clone, Copy)]
struct SleepPair {
    first: Duration,
    next: Duration,
}

const SETUP_SLEEP: SleepPair = SleepPair { first: Duration::from_millis(85), next: Duration::from_millis(5) };
const STEADY_SLEEP: SleepPair = SleepPair { first: Duration::from_millis(300), next: Duration::from_millis(10) };

const FRAME_READY_STATE: u8 = 0x16;

/// Result of interpreting one inbound frame: what to hand back to the
/// console and what (if anything) to publish to the store.
struct Plan {
    ack: Option<Vec<u8>>,
    pairing: PairingState,
    data_written: bool,
    current: Option<CurrentReading>,
    history: Option<HistoryBlock>,
    config: Option<DeviceConfig>,
    next_sleep: SleepPair,
}

/// Decides what to do with one inbound frame. Pure function of its inputs
/// so it can be exercised without any hardware.
fn generate_response(
    buf: &[u8],
    own_id: u16,
    pairing: PairingState,
    comm_mode_interval: u8,
    known_config: Option<&DeviceConfig>,
    pending_station_config: Option<&StationConfig>,
    pending_command: Option<Action>,
    weather_age_secs: i64,
    latest_history_index: Option<u32>,
    now: chrono::NaiveDateTime,
) -> Result<Plan> {
    if buf.is_empty() {
        return Err(DriverError::BadResponse("zero length buffer".into()));
    }
    let header = frame::parse_header(buf)?;
    let new_pairing = pairing.on_frame(header.buffer_id, own_id);

    if header.buffer_id == BROADCAST_DEVICE_ID {
        info!(own_id, "console not paired, attempting to pair");
        let ack = frame::build_ack_frame(header.buffer_id, Action::GetConfig, own_id, comm_mode_interval, None);
        return Ok(Plan {
            ack: Some(ack.to_vec()),
            pairing: new_pairing,
            data_written: false,
            current: None,
            history: None,
            config: None,
            next_sleep: SETUP_SLEEP,
        });
    }

    if header.buffer_id != own_id {
        return Err(DriverError::UnknownDevice(header.buffer_id));
    }

    match header.response_type {
        ResponseType::DataWritten => {
            if buf.len() == 7 {
                Ok(Plan {
                    ack: None,
                    pairing: new_pairing,
                    data_written: true,
                    current: None,
                    history: None,
                    config: None,
                    next_sleep: STEADY_SLEEP,
                })
            } else {
                Err(DriverError::BadResponse(format!("len={:#x} resp=DataWritten", buf.len())))
            }
        }
        ResponseType::GetConfig => {
            if buf.len() != 0x7d {
                return Err(DriverError::BadResponse(format!("len={:#x} resp=GetConfig", buf.len())));
            }
            let config = frame::decode_config(buf)?;
            let ack = frame::build_ack_frame(header.buffer_id, Action::GetHistory, config.in_checksum, comm_mode_interval, latest_history_index);
            Ok(Plan {
                ack: Some(ack.to_vec()),
                pairing: new_pairing,
                data_written: false,
                current: None,
                history: None,
                config: Some(config),
                next_sleep: STEADY_SLEEP,
            })
        }
        ResponseType::GetCurrentWeather => {
            if buf.len() != 0xe5 {
                return Err(DriverError::BadResponse(format!("len={:#x} resp=GetCurrentWeather", buf.len())));
            }
            let current = frame::decode_current_weather(buf)?;
            // the weather frame echoes the station's own in-buffer config
            // checksum at the same offset GetHistory carries it at -- this
            // is distinct from `current.checksum`, the sum-based checksum
            // over the weather payload itself.
            let cs = (buf[5] as u16) << 8 | buf[6] as u16;
            let known_config_checksum = known_config.map(DeviceConfig::out_checksum);
            // config reconciliation: ask for config again if we have never
            // seen one, or if the station's echoed checksum no longer
            // matches what we last read from it. Otherwise, a staged host
            // config change takes priority over the regular history poll.
            let action = if known_config_checksum.is_none_or(|known| known != cs) {
                Action::GetConfig
            } else if pending_station_config.is_some_and(|staged| staged.changed(known_config)) {
                Action::RequestSetConfig
            } else {
                Action::GetHistory
            };
            let action = frame::morph_action(pending_command, action, header.buffer_id, weather_age_secs, comm_mode_interval as i64);
            let ack = frame::build_ack_frame(header.buffer_id, action, cs, comm_mode_interval, latest_history_index);
            Ok(Plan {
                ack: Some(ack.to_vec()),
                pairing: new_pairing,
                data_written: false,
                current: Some(current),
                history: None,
                config: None,
                next_sleep: STEADY_SLEEP,
            })
        }
        ResponseType::GetHistory => {
            if buf.len() != 0xb5 {
                return Err(DriverError::BadResponse(format!("len={:#x} resp=GetHistory", buf.len())));
            }
            let history = frame::decode_history(buf)?;
            let cs = (buf[5] as u16) << 8 | buf[6] as u16;
            let next_index = codec::address_to_index(history.latest_addr);
            let ack = frame::build_ack_frame(header.buffer_id, Action::GetHistory, cs, comm_mode_interval, Some(next_index));
            Ok(Plan {
                ack: Some(ack.to_vec()),
                pairing: new_pairing,
                data_written: false,
                current: None,
                history: Some(history),
                config: None,
                next_sleep: STEADY_SLEEP,
            })
        }
        ResponseType::Request(byte) => {
            if buf.len() != 0x07 {
                return Err(DriverError::BadResponse(format!("len={:#x} resp=Request({byte:#04x})", buf.len())));
            }
            let cs = (buf[5] as u16) << 8 | buf[6] as u16;
            // 0x52 (set-config-data): deliver the staged config body in
            // reply, if the host actually has one staged. With nothing
            // staged there is nothing to write, so fall through to a plain
            // history poll same as any other request byte.
            let staged_for_write = (byte == 0x52).then_some(pending_station_config).flatten();
            let (ack, next_sleep) = if let Some(staged) = staged_for_write {
                (station_config::build_config_frame(header.buffer_id, staged).to_vec(), SETUP_SLEEP)
            } else {
                match byte {
                    0x51 => (frame::build_first_config_frame(comm_mode_interval).to_vec(), SETUP_SLEEP),
                    0x53 => {
                        // avoid setting the console's clock right on top of
                        // its own minute rollover; substitute a shortened
                        // poll interval and catch it on the next request
                        // instead of sending the time frame now.
                        if frame::is_near_minute_boundary(now, 6) {
                            let shortened = frame::quantised_time_interval(now);
                            (
                                frame::build_ack_frame(header.buffer_id, Action::GetHistory, cs, shortened, latest_history_index).to_vec(),
                                SETUP_SLEEP,
                            )
                        } else {
                            (frame::build_time_frame(header.buffer_id, cs, now).to_vec(), SETUP_SLEEP)
                        }
                    }
                    _ => (frame::build_ack_frame(header.buffer_id, Action::GetHistory, cs, comm_mode_interval, latest_history_index).to_vec(), STEADY_SLEEP),
                }
            };
            Ok(Plan {
                ack: Some(ack),
                pairing: new_pairing,
                data_written: false,
                current: None,
                history: None,
                config: None,
                next_sleep,
            })
        }
    }
}

/// Host-selectable policy for whether decoded history records accumulate in
/// the store as they arrive during ordinary operation, independent of the
/// bounded startup catchup [`scan_history_since`] performs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryCollectionPolicy {
    /// History frames still update the latest/next index bookkeeping, but
    /// records are not retained.
    #[default]
    Disabled,
    /// Every decoded history record is appended to the store's cache.
    Enabled,
}

/// Configuration the engine is started with.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub frequency: Frequency,
    pub comm_mode_interval: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { frequency: Frequency::Eu, comm_mode_interval: 3 }
    }
}

/// Handle to a running RF thread. Dropping this does not stop the thread --
/// call [`Engine::stop`] and [`Engine::join`] for a clean shutdown.
pub struct Engine {
    running: Arc<AtomicBool>,
    store: Store,
    join: Option<JoinHandle<()>>,
}

impl Engine {
    /// Opens the dongle, initializes the transceiver, and spawns the RF
    /// thread. Returns once the thread is running; pairing and data
    /// exchange happen asynchronously and are observed through `store()`.
    pub fn start(config: EngineConfig) -> Result<Engine> {
        let transport = UsbTransport::open()?;
        let identity = radio::init_transceiver(&transport, config.frequency)?;
        let store = Store::new();
        let running = Arc::new(AtomicBool::new(true));

        let thread_running = Arc::clone(&running);
        let thread_store = store.clone();
        let join = std::thread::Builder::new()
            .name("klimalogg-rf".into())
            .spawn(move || rf_thread_main(transport, identity, config, thread_store, thread_running))
            .map_err(|e| DriverError::Init(format!("failed to spawn RF thread: {e}")))?;

        Ok(Engine { running, store, join: Some(join) })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Arms history-record collection, off by default. A caller that just
    /// wants the live current-weather feed has no reason to pay for it.
    pub fn start_caching_history(&self) {
        self.store.set_history_enabled(true);
    }

    pub fn stop_caching_history(&self) {
        self.store.set_history_enabled(false);
    }

    pub fn history_collection_policy(&self) -> HistoryCollectionPolicy {
        if self.store.history_enabled() {
            HistoryCollectionPolicy::Enabled
        } else {
            HistoryCollectionPolicy::Disabled
        }
    }

    /// Stages a config for the RF thread to push on its next opportunity
    /// (see the config-reconciliation branch of `generate_response`).
    /// Per the reference driver's explicit warning, leave any alarm or
    /// wind-direction flags zero in `config` -- an active alarm halts the
    /// console's data stream.
    pub fn set_pending_config(&self, config: StationConfig) {
        self.store.stage_config(config);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Blocks until the RF thread exits. Call after [`Engine::stop`].
    pub fn join(&mut self) -> Result<()> {
        if let Some(handle) = self.join.take() {
            handle
                .join()
                .map_err(|_| DriverError::ThreadFatal("RF thread panicked".into()))?;
        }
        Ok(())
    }
}

fn sleep(d: Duration) {
    std::thread::sleep(d);
}

/// The double-preamble setup ritual the transceiver requires before it will
/// accept RX/TX commands. Run once, before the communication loop starts.
fn rf_setup(transport: &UsbTransport) -> Result<()> {
    transport.execute(5)?;
    transport.set_preamble_pattern(0xaa)?;
    transport.set_state(0)?;
    sleep(Duration::from_secs(1));
    transport.set_rx()?;

    transport.set_preamble_pattern(0xaa)?;
    transport.set_state(0x1e)?;
    sleep(Duration::from_secs(1));
    transport.set_rx()?;
    Ok(())
}

fn poll_for_frame(transport: &UsbTransport, running: &AtomicBool, sleep_pair: SleepPair) -> Result<Option<Vec<u8>>> {
    sleep(sleep_pair.first);
    loop {
        if !running.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let state = transport.get_state()?;
        if state[0] == FRAME_READY_STATE {
            break;
        }
        sleep(sleep_pair.next);
    }
    Ok(Some(transport.get_frame()?))
}

fn rf_thread_main(
    transport: UsbTransport,
    identity: DeviceIdentity,
    config: EngineConfig,
    store: Store,
    running: Arc<AtomicBool>,
) {
    if let Err(e) = rf_setup(&transport) {
        warn!(error = %e, "RF setup failed, thread exiting");
        running.store(false, Ordering::SeqCst);
        return;
    }

    let mut sleep_pair = SETUP_SLEEP;
    let mut weather_seen_at: Option<std::time::Instant> = None;

    while running.load(Ordering::SeqCst) {
        let frame_buf = match poll_for_frame(&transport, &running, sleep_pair) {
            Ok(Some(buf)) => buf,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "get_state/get_frame failed");
                continue;
            }
        };

        let own_id = identity.transceiver_id;
        let pairing = store.pairing();
        let known_config = store.config();
        let pending_station_config = store.pending_config();
        let weather_age = weather_seen_at.map(|t| t.elapsed().as_secs() as i64).unwrap_or(i64::MAX);
        let latest_history_index = store.history().latest_index;
        // the morphing rule only ever applies while a caller has opted into
        // history caching; outside that, requests stay on GetCurrent/GetConfig
        let pending_command = store.history_enabled().then_some(Action::GetHistory);

        match generate_response(
            &frame_buf,
            own_id,
            pairing,
            config.comm_mode_interval,
            known_config.as_ref(),
            pending_station_config.as_ref(),
            pending_command,
            weather_age,
            latest_history_index,
            chrono::Local::now().naive_local(),
        ) {
            Ok(plan) => {
                store.set_pairing(plan.pairing);
                store.note_frame_seen();
                store.set_battery(BatteryStatus(frame::inbound::battery_nibble(&frame_buf)));

                if let Some(current) = plan.current {
                    store.set_current_reading(current);
                    weather_seen_at = Some(std::time::Instant::now());
                }
                if let Some(history) = plan.history {
                    let caching = store.history_enabled();
                    store.update_history(|h| {
                        h.latest_index = Some(codec::address_to_index(history.latest_addr));
                        h.next_index = Some(codec::address_to_index(history.this_addr));
                        h.num_scanned += 1;
                        if caching {
                            h.records.extend(history.records.iter().cloned());
                        }
                    });
                }
                if let Some(cfg) = plan.config {
                    // a config frame just arrived echoing what the console
                    // now has stored; if it matches what we staged, the
                    // write is done and there is nothing left to push.
                    if pending_station_config.as_ref().is_some_and(|staged| !staged.changed(Some(&cfg))) {
                        store.clear_pending_config();
                    }
                    store.set_config(cfg);
                }

                sleep_pair = plan.next_sleep;
                if plan.data_written {
                    if let Err(e) = transport.set_rx() {
                        warn!(error = %e, "set_rx after data-written failed");
                    }
                    continue;
                }
                if let Some(ack) = plan.ack {
                    if let Err(e) = transport.set_frame(&ack) {
                        warn!(error = %e, "set_frame failed");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "generate_response failed");
            }
        }

        if let Err(e) = transport.set_tx() {
            warn!(error = %e, "set_tx failed");
            break;
        }
    }
}

/// Runs a bounded catchup scan of history records since `since` (or the
/// start of the console's buffer when `None`), polling the store at
/// `poll_interval` until scanning stalls for `max_stalled_polls` in a row.
/// Mirrors the startup history-scan loop that logs progress while waiting
/// for the RF thread to catch up on a fresh console.
pub fn scan_history_since(
    store: &Store,
    since: Option<chrono::NaiveDateTime>,
    poll_interval: Duration,
    max_stalled_polls: u32,
) -> Vec<frame::HistoryRecord> {
    store.update_history(|h| {
        h.since = since;
        h.records.clear();
        h.num_scanned = 0;
    });
    store.set_history_enabled(true);

    let mut last_scanned = 0u32;
    let mut stalled = 0u32;
    loop {
        sleep(poll_interval);
        let history = store.history();
        if history.num_scanned == last_scanned {
            stalled += 1;
            if stalled >= max_stalled_polls {
                warn!(scanned = history.num_scanned, "history scan stalled, giving up");
                break;
            }
        } else {
            stalled = 0;
            last_scanned = history.num_scanned;
        }
        info!(scanned = history.num_scanned, next = ?history.next_index, latest = ?history.latest_index, "scanning historical records");
        if let (Some(next), Some(latest)) = (history.next_index, history.latest_index) {
            if next == latest {
                break;
            }
        }
    }

    store.set_history_enabled(false);
    store.history().records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn header_bytes(buffer_id: u16, resp: u8) -> Vec<u8> {
        vec![(buffer_id >> 8) as u8, buffer_id as u8, 0x00, resp]
    }

    /// A fixed instant safely away from any minute boundary, for tests that
    /// don't care about send-time quantisation.
    fn steady_now() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2014, 1, 1).unwrap().and_hms_opt(12, 0, 30).unwrap()
    }

    #[test]
    fn broadcast_frame_pairs_and_acks_get_config() {
        let mut buf = header_bytes(BROADCAST_DEVICE_ID, 0x20);
        buf.resize(7, 0);
        let plan = generate_response(&buf, 0x1234, PairingState::Unpaired, 3, None, None, None, 0, None, steady_now()).unwrap();
        assert_eq!(plan.pairing, PairingState::Paired(0x1234));
        assert!(plan.ack.is_some());
    }

    #[test]
    fn unknown_device_id_is_rejected() {
        let mut buf = header_bytes(0x9999, 0x20);
        buf.resize(7, 0);
        let err = generate_response(&buf, 0x1234, PairingState::Paired(0x1234), 3, None, None, None, 0, None, steady_now()).unwrap_err();
        assert!(matches!(err, DriverError::UnknownDevice(0x9999)));
    }

    #[test]
    fn data_written_requires_exact_length() {
        let mut buf = header_bytes(0x1234, 0x10);
        buf.resize(7, 0);
        let plan = generate_response(&buf, 0x1234, PairingState::Paired(0x1234), 3, None, None, None, 0, None, steady_now()).unwrap();
        assert!(plan.data_written);
        assert!(plan.ack.is_none());
    }

    #[test]
    fn data_written_rejects_wrong_length() {
        let mut buf = header_bytes(0x1234, 0x10);
        buf.resize(5, 0);
        assert!(generate_response(&buf, 0x1234, PairingState::Paired(0x1234), 3, None, None, None, 0, None, steady_now()).is_err());
    }

    #[test]
    fn missing_config_checksum_requests_config() {
        let mut buf = header_bytes(0x1234, 0x30);
        buf.resize(0xe5, 0xAA);
        buf[0] = 0x12;
        buf[1] = 0x34;
        buf[3] = 0x30;
        let plan = generate_response(&buf, 0x1234, PairingState::Paired(0x1234), 3, None, None, None, 0, None, steady_now()).unwrap();
        let ack = plan.ack.unwrap();
        assert_eq!(ack[3] & 0x0F, Action::GetConfig as u8);
    }

    #[test]
    fn matching_config_checksum_requests_history() {
        let mut buf = header_bytes(0x1234, 0x30);
        buf.resize(0xe5, 0xAA);
        buf[0] = 0x12;
        buf[1] = 0x34;
        buf[3] = 0x30;
        let known = DeviceConfig { raw: vec![0u8; 125].into_boxed_slice(), in_checksum: 0 };
        let cs = known.out_checksum();
        buf[5] = (cs >> 8) as u8;
        buf[6] = cs as u8;
        let plan = generate_response(&buf, 0x1234, PairingState::Paired(0x1234), 3, Some(&known), None, None, 0, None, steady_now()).unwrap();
        let ack = plan.ack.unwrap();
        assert_eq!(ack[3] & 0x0F, Action::GetHistory as u8);
    }

    #[test]
    fn pending_config_change_requests_set_config_once_checksum_matches() {
        let mut buf = header_bytes(0x1234, 0x30);
        buf.resize(0xe5, 0xAA);
        buf[0] = 0x12;
        buf[1] = 0x34;
        buf[3] = 0x30;
        let known = DeviceConfig { raw: vec![0u8; 125].into_boxed_slice(), in_checksum: 0 };
        let cs = known.out_checksum();
        buf[5] = (cs >> 8) as u8;
        buf[6] = cs as u8;
        let mut staged_body = [0u8; station_config::CONFIG_FRAME_LEN];
        staged_body[50] = 0xAB;
        let staged = StationConfig { body: staged_body };
        let plan = generate_response(&buf, 0x1234, PairingState::Paired(0x1234), 3, Some(&known), Some(&staged), None, 0, None, steady_now()).unwrap();
        let ack = plan.ack.unwrap();
        assert_eq!(ack[3] & 0x0F, Action::RequestSetConfig as u8);
    }

    #[test]
    fn set_config_data_request_delivers_staged_frame() {
        let mut buf = header_bytes(0x1234, 0x52);
        buf.resize(7, 0);
        let staged = StationConfig { body: [7u8; station_config::CONFIG_FRAME_LEN] };
        let plan = generate_response(&buf, 0x1234, PairingState::Paired(0x1234), 3, None, Some(&staged), None, 0, None, steady_now()).unwrap();
        let ack = plan.ack.unwrap();
        assert_eq!(ack.len(), station_config::CONFIG_FRAME_LEN);
        assert_eq!(ack[2], Action::SendConfig as u8);
    }

    #[test]
    fn scan_history_since_gives_up_when_stalled() {
        let store = Store::new();
        let records = scan_history_since(&store, None, Duration::from_millis(1), 2);
        assert!(records.is_empty());
        assert!(!store.history_enabled());
    }

    #[test]
    fn scan_history_since_stops_once_caught_up() {
        let store = Store::new();
        store.update_history(|h| {
            h.next_index = Some(5);
            h.latest_index = Some(5);
        });
        let records = scan_history_since(&store, None, Duration::from_millis(1), 50);
        assert!(records.is_empty());
        assert!(!store.history_enabled());
    }

    #[test]
    fn first_time_request_emits_broadcast_config_frame() {
        let mut buf = header_bytes(0x1234, 0x51);
        buf.resize(7, 0);
        let plan = generate_response(&buf, 0x1234, PairingState::Paired(0x1234), 3, None, None, None, 0, None, steady_now()).unwrap();
        let ack = plan.ack.unwrap();
        assert_eq!(&ack[0..2], &[0xF0, 0xF0]);
    }

    #[test]
    fn send_time_request_sets_clock_away_from_minute_boundary() {
        let mut buf = header_bytes(0x1234, 0x53);
        buf.resize(7, 0);
        let plan = generate_response(&buf, 0x1234, PairingState::Paired(0x1234), 3, None, None, None, 0, None, steady_now()).unwrap();
        let ack = plan.ack.unwrap();
        assert_eq!(ack[3], Action::SendTime as u8);
    }

    #[test]
    fn send_time_request_near_minute_boundary_sends_shortened_ack() {
        let mut buf = header_bytes(0x1234, 0x53);
        buf.resize(7, 0);
        let near_boundary = NaiveDate::from_ymd_opt(2014, 1, 1).unwrap().and_hms_opt(12, 3, 57).unwrap();
        let plan = generate_response(&buf, 0x1234, PairingState::Paired(0x1234), 3, None, None, None, 0, None, near_boundary).unwrap();
        let ack = plan.ack.unwrap();
        assert_eq!(ack[3] & 0x0F, Action::GetHistory as u8);
        assert_eq!(ack[7], 9);
    }
}
