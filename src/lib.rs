//! Protocol driver for TFA KlimaLogg-family weather consoles.
//!
//! This crate owns exactly the USB-dongle-to-console driver middle: radio
//! setup, the reactive frame state machine, the nibble codec, pairing, and
//! history bookkeeping. It does not know about units, archival, or the
//! surrounding weather-station service -- those are a host application's
//! job, built on top of [`engine::Engine`] and [`store::Store`].

pub mod codec;
pub mod engine;
pub mod error;
pub mod frame;
pub mod identity;
pub mod radio;
pub mod sensor_map;
pub mod staleness;
pub mod station_config;
pub mod store;
pub mod transport;

pub use engine::{Engine, EngineConfig, HistoryCollectionPolicy};
pub use error::{DriverError, Result};
pub use identity::PairingState;
pub use radio::{DeviceIdentity, Frequency};
pub use sensor_map::{Observation, SensorMap, SensorMapError};
pub use staleness::StalenessMonitor;
pub use station_config::{HistoryInterval, StationConfig};
pub use store::{ConnectionStatus, Store};
