//! Builders for frames sent to the console.

use chrono::NaiveDateTime;

use crate::codec;

/// Action codes carried in byte 3 of every outbound frame (or byte 2 for a
/// config write).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    GetHistory = 0x00,
    RequestSetTime = 0x01,
    RequestSetConfig = 0x02,
    GetConfig = 0x03,
    GetCurrent = 0x04,
    SendConfig = 0x40,
    SendTime = 0x60,
}

const NO_HISTORY_ADDR: u32 = 0xFF_FFFF;

/// The first frame sent to an unpaired console: a broadcast requesting
/// config, carrying the comm-mode interval and the base history address.
pub fn build_first_config_frame(comm_mode_interval: u8) -> [u8; 11] {
    let history_address: u32 = 0x01_0700;
    [
        0xF0,
        0xF0,
        0xFF,
        Action::GetConfig as u8,
        0xFF,
        0xFF,
        0x80,
        comm_mode_interval,
        (history_address >> 16) as u8,
        (history_address >> 8) as u8,
        history_address as u8,
    ]
}

/// The send-time frame: `buffer_id`/checksum header followed by the 7-byte
/// packed timestamp from [`codec::encode_time`].
pub fn build_time_frame(buffer_id: u16, checksum: u16, now: NaiveDateTime) -> [u8; 13] {
    let mut frame = [0u8; 13];
    frame[0] = (buffer_id >> 8) as u8;
    frame[1] = buffer_id as u8;
    frame[3] = Action::SendTime as u8;
    frame[4] = (checksum >> 8) as u8;
    frame[5] = checksum as u8;
    let mut time_bytes = [0u8; 7];
    codec::encode_time(&mut time_bytes, now);
    frame[6..13].copy_from_slice(&time_bytes);
    frame
}

/// Whether `now` falls within the exclusion window around a minute
/// boundary that the send-time logic uses to avoid landing a time-set
/// request right as the console's own clock rolls over.
pub fn is_near_minute_boundary(now: NaiveDateTime, margin_secs: u32) -> bool {
    use chrono::Timelike;
    let sec = now.second();
    sec < margin_secs || sec > 60 - margin_secs
}

/// Shortened comm-mode interval (in seconds) substituted for a send-time
/// request that falls inside the minute-boundary exclusion window, so the
/// console is polled again just after the boundary has passed rather than
/// having its clock set right on top of it.
pub fn quantised_time_interval(now: NaiveDateTime) -> u8 {
    use chrono::Timelike;
    let sec = now.second();
    if sec < 6 { (6 - sec) as u8 } else { (60 - sec + 6) as u8 }
}

/// Applies the "morphing rule": during a long history catchup, if current
/// weather data has gone stale, a pending [`Action::GetHistory`] ack is
/// overridden to [`Action::GetCurrent`] instead -- but never for the very
/// first, pairing-broadcast ack (`buffer_id == 0xF0F0`).
pub fn morph_action(
    pending_command: Option<Action>,
    action: Action,
    buffer_id: u16,
    weather_age_secs: i64,
    comm_mode_interval_secs: i64,
) -> Action {
    if pending_command == Some(Action::GetHistory)
        && action == Action::GetHistory
        && weather_age_secs >= (comm_mode_interval_secs + 1) * 2
        && buffer_id != 0xF0F0
    {
        Action::GetCurrent
    } else {
        action
    }
}

/// Builds the acknowledgement frame the engine sends after every inbound
/// frame, carrying the next action to take and (if known) the history
/// address to resume from.
pub fn build_ack_frame(
    buffer_id: u16,
    action: Action,
    checksum: u16,
    comm_mode_interval: u8,
    next_history_index: Option<u32>,
) -> [u8; 11] {
    let haddr = match next_history_index {
        Some(idx) if idx < codec::MAX_RECORDS => codec::index_to_address(idx),
        _ => NO_HISTORY_ADDR,
    };
    [
        (buffer_id >> 8) as u8,
        buffer_id as u8,
        0xFF,
        action as u8 & 0x0F,
        (checksum >> 8) as u8,
        checksum as u8,
        0x80,
        comm_mode_interval,
        (haddr >> 16) as u8,
        (haddr >> 8) as u8,
        haddr as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn first_config_frame_broadcasts_and_requests_config() {
        let frame = build_first_config_frame(5);
        assert_eq!(&frame[0..2], &[0xF0, 0xF0]);
        assert_eq!(frame[3], Action::GetConfig as u8);
        assert_eq!(frame[7], 5);
    }

    #[test]
    fn ack_frame_encodes_no_history_sentinel_when_unknown() {
        let frame = build_ack_frame(0x1234, Action::GetCurrent, 0xBEEF, 5, None);
        assert_eq!(&frame[8..11], &[0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn ack_frame_encodes_history_address_when_known() {
        let frame = build_ack_frame(0x1234, Action::GetHistory, 0x0000, 5, Some(3));
        let addr = codec::index_to_address(3);
        assert_eq!(
            &frame[8..11],
            &[(addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
        );
    }

    #[test]
    fn morphing_only_applies_to_pending_get_history_and_not_broadcast() {
        let tm = Action::GetHistory;
        assert_eq!(
            morph_action(Some(Action::GetHistory), tm, 0x1234, 100, 5),
            Action::GetCurrent
        );
        assert_eq!(
            morph_action(Some(Action::GetHistory), tm, 0xF0F0, 100, 5),
            Action::GetHistory,
            "pairing broadcast ack must never morph"
        );
        assert_eq!(
            morph_action(Some(Action::GetCurrent), tm, 0x1234, 100, 5),
            Action::GetHistory,
            "only applies when the pending command was GetHistory"
        );
    }

    #[test]
    fn time_frame_packs_sec_min_hour_as_bcd() {
        let tm = NaiveDate::from_ymd_opt(2014, 10, 25).unwrap().and_hms_opt(13, 7, 42).unwrap();
        let frame = build_time_frame(0x1234, 0x0102, tm);
        assert_eq!(frame[3], Action::SendTime as u8);
        assert_eq!(frame[6], 0x42);
        assert_eq!(frame[7], 0x07);
        assert_eq!(frame[8], 0x13);
    }

    #[test]
    fn near_minute_boundary_detects_edges() {
        let far = NaiveDate::from_ymd_opt(2014, 1, 1).unwrap().and_hms_opt(0, 0, 30).unwrap();
        let near_start = NaiveDate::from_ymd_opt(2014, 1, 1).unwrap().and_hms_opt(0, 0, 2).unwrap();
        assert!(!is_near_minute_boundary(far, 6));
        assert!(is_near_minute_boundary(near_start, 6));
    }

    #[test]
    fn quantised_interval_matches_scenario_five() {
        let at_57 = NaiveDate::from_ymd_opt(2014, 1, 1).unwrap().and_hms_opt(12, 3, 57).unwrap();
        assert!(is_near_minute_boundary(at_57, 6));
        assert_eq!(quantised_time_interval(at_57), 9);

        let at_3 = NaiveDate::from_ymd_opt(2014, 1, 1).unwrap().and_hms_opt(12, 3, 3).unwrap();
        assert!(is_near_minute_boundary(at_3, 6));
        assert_eq!(quantised_time_interval(at_3), 3);
    }
}
