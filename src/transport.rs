//! Synchronous USB control-transfer transport to the dongle.
//!
//! The dongle exposes its entire protocol surface through vendor control
//! transfers on endpoint 0 -- there is no bulk or interrupt pipe. Every
//! operation here is a single blocking `read_control`/`write_control` call
//! with a fixed timeout, matching how the reference driver talks to the
//! hardware.

use std::time::Duration;

use rusb::{Device, DeviceHandle, GlobalContext};
use tracing::{debug, trace};

use crate::error::{DriverError, Result};

pub const VENDOR_ID: u16 = 0x6666;
pub const PRODUCT_ID: u16 = 0x5555;

const IFACE: u8 = 0;
const TIMEOUT: Duration = Duration::from_millis(1000);

// Control-transfer `value` codes. Names match the registers they drive on
// the CC1010-family transceiver inside the dongle.
const REQ_SET_RX: u16 = 0x3d0;
const REQ_SET_TX: u16 = 0x3d1;
const REQ_SET_FRAME: u16 = 0x3d5;
const REQ_GET_FRAME: u16 = 0x3d6;
const REQ_SET_STATE: u16 = 0x3d7;
const REQ_SET_PREAMBLE: u16 = 0x3d8;
const REQ_EXECUTE: u16 = 0x3d9;
const REQ_READ_CONFIG_FLASH_REQUEST: u16 = 0x3dd;
const REQ_READ_CONFIG_FLASH_DATA: u16 = 0x3dc;
const REQ_GET_STATE: u16 = 0x3de;
const REQ_WRITE_REG: u16 = 0x3f0;

/// Thin synchronous wrapper around a claimed control interface.
pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
}

impl UsbTransport {
    /// Finds and opens the first matching dongle, detaching the kernel
    /// driver from its interface if one is attached.
    pub fn open() -> Result<Self> {
        let device = Self::find_device()?;
        let mut handle = device.open()?;

        if handle.kernel_driver_active(IFACE).unwrap_or(false) {
            handle.detach_kernel_driver(IFACE)?;
        }
        handle.claim_interface(IFACE)?;

        Ok(Self { handle })
    }

    fn find_device() -> Result<Device<GlobalContext>> {
        let devices = rusb::devices()?;
        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID {
                return Ok(device);
            }
        }
        Err(DriverError::Init(format!(
            "no device found with vid={VENDOR_ID:04x} pid={PRODUCT_ID:04x}"
        )))
    }

    fn write_control(&self, value: u16, data: &[u8]) -> Result<()> {
        let request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        self.handle
            .write_control(request_type, 0x09, value, IFACE as u16, data, TIMEOUT)?;
        Ok(())
    }

    fn read_control(&self, value: u16, len: usize) -> Result<Vec<u8>> {
        let request_type = rusb::request_type(
            rusb::Direction::In,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        let mut buf = vec![0u8; len];
        let n = self
            .handle
            .read_control(request_type, 0x01, value, IFACE as u16, &mut buf, TIMEOUT)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn set_rx(&self) -> Result<()> {
        trace!("set_rx");
        self.write_control(REQ_SET_RX, &[0; 9])
    }

    pub fn set_tx(&self) -> Result<()> {
        trace!("set_tx");
        self.write_control(REQ_SET_TX, &[0; 9])
    }

    /// Reads the two transceiver-state bytes. Byte 0 is the state code the
    /// engine polls for (`0x16` means "frame ready").
    pub fn get_state(&self) -> Result<[u8; 2]> {
        let buf = self.read_control(REQ_GET_STATE, 8)?;
        if buf.len() < 3 {
            return Err(DriverError::BadResponse(
                "get_state returned short buffer".into(),
            ));
        }
        Ok([buf[1], buf[2]])
    }

    pub fn set_state(&self, state: u8) -> Result<()> {
        self.write_control(REQ_SET_STATE, &[state, 0])
    }

    pub fn set_preamble_pattern(&self, pattern: u8) -> Result<()> {
        self.write_control(REQ_SET_PREAMBLE, &[pattern])
    }

    pub fn execute(&self, value: u8) -> Result<()> {
        self.write_control(REQ_EXECUTE, &[value, 0, 0])
    }

    /// Sends an outbound frame: a fixed `0xD5` marker, a 16-bit big-endian
    /// length, then the frame bytes themselves.
    pub fn set_frame(&self, frame: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(frame.len() + 3);
        buf.push(0xd5);
        buf.push((frame.len() >> 8) as u8);
        buf.push(frame.len() as u8);
        buf.extend_from_slice(frame);
        debug!(len = frame.len(), "set_frame");
        self.write_control(REQ_SET_FRAME, &buf)
    }

    /// Reads the most recently received inbound frame. The reported length
    /// is packed big-endian across bytes 1-2 of the response, masked to 9
    /// bits.
    pub fn get_frame(&self) -> Result<Vec<u8>> {
        let buf = self.read_control(REQ_GET_FRAME, 0x111)?;
        if buf.len() < 3 {
            return Err(DriverError::BadResponse(
                "get_frame returned short buffer".into(),
            ));
        }
        let num_bytes = (((buf[1] as usize) << 8) | buf[2] as usize) & 0x1ff;
        let available = buf.len() - 3;
        let n = num_bytes.min(available);
        Ok(buf[3..3 + n].to_vec())
    }

    /// Writes a single radio register.
    pub fn write_reg(&self, addr: u8, data: u8) -> Result<()> {
        self.write_control(REQ_WRITE_REG, &[0xf0, addr & 0x7f, 0x01, data, 0x00])
    }

    /// Reads 16 bytes of the factory config flash starting at `addr`.
    pub fn read_config_flash(&self, addr: u16) -> Result<[u8; 16]> {
        let req = [
            0xdd,
            0x0a,
            0x01,
            0x05,
            (addr >> 8) as u8,
            addr as u8,
            0x10,
            0x00,
            0x00,
            0x00,
            0x00,
        ];
        self.write_control(REQ_READ_CONFIG_FLASH_REQUEST, &req)?;
        let buf = self.read_control(REQ_READ_CONFIG_FLASH_DATA, 0x15)?;
        if buf.len() < 20 {
            return Err(DriverError::BadResponse(
                "read_config_flash returned short buffer".into(),
            ));
        }
        let mut out = [0u8; 16];
        out.copy_from_slice(&buf[4..20]);
        Ok(out)
    }
}
