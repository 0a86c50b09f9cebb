//! Error taxonomy for the KlimaLogg link.
//!
//! Mirrors the structured-error style of the driver layer this crate is
//! descended from: one enum, one `#[error(...)]` message per failure mode,
//! so callers can match on variants instead of parsing strings.

use thiserror::Error;

/// Everything that can go wrong while talking to a console over the dongle.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A USB control transfer failed at the libusb layer.
    #[error("usb transport error: {0}")]
    Transport(#[from] rusb::Error),

    /// A frame arrived with a response-type byte, length, or buffer id the
    /// engine does not know how to interpret.
    #[error("bad response from console: {0}")]
    BadResponse(String),

    /// The dongle answered but the bound console id does not match the one
    /// this driver paired with.
    #[error("unknown device id {0:04x}")]
    UnknownDevice(u16),

    /// Startup failed before the RF thread could enter its main loop.
    #[error("failed to initialize transceiver: {0}")]
    Init(String),

    /// The RF thread died; the handle is no longer usable.
    #[error("RF thread terminated: {0}")]
    ThreadFatal(String),
}

/// Not a failure: signals that a write completed and the caller should wait
/// for the console to acknowledge on the next poll rather than retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataWritten;

pub type Result<T> = std::result::Result<T, DriverError>;
