//! No-data / no-contact logging cadence.
//!
//! Mirrored from the reference driver's packet-generator loop, which tracks
//! two independent conditions (no new weather data, no console contact) and
//! rate-limits how often each is logged so a long outage doesn't spam the
//! log once per tick.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::store::{ConnectionStatus, Store};

/// Age past which a missing weather update or missing console contact is
/// worth logging.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(300);
/// Minimum spacing between repeated log lines for the same condition.
pub const LOG_INTERVAL: Duration = Duration::from_secs(600);

/// Rate-limits the "no new weather data" / "no contact with console"
/// warnings a host emits on its own poll cadence. Stateless with respect to
/// the store itself -- a caller polls this once per tick alongside reading
/// `Store::observation`-style accessors.
#[derive(Debug, Default)]
pub struct StalenessMonitor {
    last_nodata_log: Option<Instant>,
    last_nocontact_log: Option<Instant>,
}

impl StalenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks both conditions against explicit ages. `None` means nothing
    /// has ever been seen, which counts as maximally stale.
    pub fn poll(&mut self, weather_age: Option<Duration>, contact_age: Option<Duration>) {
        if Self::is_stale(weather_age) && self.due(self.last_nodata_log) {
            match weather_age {
                Some(age) => warn!(after_secs = age.as_secs(), "no new weather data"),
                None => warn!("no new weather data"),
            }
            self.last_nodata_log = Some(Instant::now());
        }
        if Self::is_stale(contact_age) && self.due(self.last_nocontact_log) {
            match contact_age {
                Some(age) => warn!(after_secs = age.as_secs(), "no contact with console: press [USB] to sync"),
                None => warn!("no contact with console: press [USB] to sync"),
            }
            self.last_nocontact_log = Some(Instant::now());
        }
    }

    /// Convenience wrapper deriving both ages from a [`Store`] snapshot.
    pub fn poll_store(&mut self, store: &Store) {
        let contact_age = match store.connection_status() {
            ConnectionStatus::WaitingForConsole => None,
            ConnectionStatus::Connected { last_seen_age } => Some(last_seen_age),
            ConnectionStatus::Lost { silent_for } => Some(silent_for),
        };
        self.poll(store.weather_age(), contact_age);
    }

    fn is_stale(age: Option<Duration>) -> bool {
        age.is_none_or(|a| a > STALE_THRESHOLD)
    }

    fn due(&self, last_logged: Option<Instant>) -> bool {
        last_logged.is_none_or(|t| t.elapsed() > LOG_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_nodata_when_never_seen() {
        let mut monitor = StalenessMonitor::new();
        monitor.poll(None, Some(Duration::from_secs(1)));
        assert!(monitor.last_nodata_log.is_some());
        assert!(monitor.last_nocontact_log.is_none());
    }

    #[test]
    fn does_not_log_when_fresh() {
        let mut monitor = StalenessMonitor::new();
        monitor.poll(Some(Duration::from_secs(1)), Some(Duration::from_secs(1)));
        assert!(monitor.last_nodata_log.is_none());
        assert!(monitor.last_nocontact_log.is_none());
    }

    #[test]
    fn repeated_polls_within_log_interval_only_log_once() {
        let mut monitor = StalenessMonitor::new();
        monitor.poll(Some(Duration::from_secs(400)), None);
        let first = monitor.last_nodata_log;
        monitor.poll(Some(Duration::from_secs(401)), None);
        assert_eq!(monitor.last_nodata_log, first, "log should not repeat within the interval");
    }

    #[test]
    fn poll_store_uses_connection_status_for_contact_age() {
        let store = Store::new();
        let mut monitor = StalenessMonitor::new();
        monitor.poll_store(&store);
        assert!(monitor.last_nodata_log.is_some());
        assert!(monitor.last_nocontact_log.is_some());
    }
}
