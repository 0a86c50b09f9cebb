//! AX5051-family radio configurator.
//!
//! Programs the transceiver's register file for the FSK modulation scheme
//! the console family uses, and derives the operating frequency from a
//! factory correction word stored in config flash.

use tracing::{info, warn};

use crate::error::Result;
use crate::transport::UsbTransport;

/// One entry in the register table: logical address and the value this
/// driver programs it to.
#[derive(Debug, Clone, Copy)]
pub struct Register {
    pub name: &'static str,
    pub addr: u8,
    pub value: u8,
}

/// Full 50-register table, addresses and configured values taken verbatim
/// from the reference driver's `configureRegisterNames` register dump for
/// FSK operation. FREQ3..FREQ0 are placeholders here -- the operating
/// frequency is written over them separately by [`configure_frequency`].
pub const REGISTERS: [Register; 50] = [
    Register { name: "IFMODE", addr: 0x08, value: 0x00 },
    Register { name: "MODULATION", addr: 0x10, value: 0x41 },
    Register { name: "ENCODING", addr: 0x11, value: 0x07 },
    Register { name: "FRAMING", addr: 0x12, value: 0x84 },
    Register { name: "CRCINIT3", addr: 0x14, value: 0xff },
    Register { name: "CRCINIT2", addr: 0x15, value: 0xff },
    Register { name: "CRCINIT1", addr: 0x16, value: 0xff },
    Register { name: "CRCINIT0", addr: 0x17, value: 0xff },
    Register { name: "FREQ3", addr: 0x20, value: 0x38 },
    Register { name: "FREQ2", addr: 0x21, value: 0x90 },
    Register { name: "FREQ1", addr: 0x22, value: 0x00 },
    Register { name: "FREQ0", addr: 0x23, value: 0x01 },
    Register { name: "FSKDEV2", addr: 0x25, value: 0x00 },
    Register { name: "FSKDEV1", addr: 0x26, value: 0x31 },
    Register { name: "FSKDEV0", addr: 0x27, value: 0x27 },
    Register { name: "IFFREQHI", addr: 0x28, value: 0x20 },
    Register { name: "IFFREQLO", addr: 0x29, value: 0x00 },
    Register { name: "PLLLOOP", addr: 0x2c, value: 0x1d },
    Register { name: "PLLRANGING", addr: 0x2d, value: 0x08 },
    Register { name: "PLLRNGCLK", addr: 0x2e, value: 0x03 },
    Register { name: "TXPWR", addr: 0x30, value: 0x03 },
    Register { name: "TXRATEHI", addr: 0x31, value: 0x00 },
    Register { name: "TXRATEMID", addr: 0x32, value: 0x51 },
    Register { name: "TXRATELO", addr: 0x33, value: 0xec },
    Register { name: "MODMISC", addr: 0x34, value: 0x03 },
    Register { name: "ADCMISC", addr: 0x38, value: 0x01 },
    Register { name: "AGCTARGET", addr: 0x39, value: 0x0e },
    Register { name: "AGCATTACK", addr: 0x3a, value: 0x11 },
    Register { name: "AGCDECAY", addr: 0x3b, value: 0x0e },
    Register { name: "CICDEC", addr: 0x3f, value: 0x3f },
    Register { name: "DATARATEHI", addr: 0x40, value: 0x19 },
    Register { name: "DATARATELO", addr: 0x41, value: 0x66 },
    Register { name: "TMGGAINHI", addr: 0x42, value: 0x01 },
    Register { name: "TMGGAINLO", addr: 0x43, value: 0x96 },
    Register { name: "PHASEGAIN", addr: 0x44, value: 0x03 },
    Register { name: "FREQGAIN", addr: 0x45, value: 0x04 },
    Register { name: "FREQGAIN2", addr: 0x46, value: 0x0a },
    Register { name: "AMPLGAIN", addr: 0x47, value: 0x06 },
    Register { name: "SPAREOUT", addr: 0x60, value: 0x00 },
    Register { name: "TESTOBS", addr: 0x68, value: 0x00 },
    Register { name: "APEOVER", addr: 0x70, value: 0x00 },
    Register { name: "TMMUX", addr: 0x71, value: 0x00 },
    Register { name: "PLLVCOI", addr: 0x72, value: 0x01 },
    Register { name: "PLLCPEN", addr: 0x73, value: 0x01 },
    Register { name: "AGCMANUAL", addr: 0x78, value: 0x00 },
    Register { name: "ADCDCLEVEL", addr: 0x79, value: 0x10 },
    Register { name: "RFMISC", addr: 0x7a, value: 0xb0 },
    Register { name: "TXDRIVER", addr: 0x7b, value: 0x88 },
    Register { name: "REF", addr: 0x7c, value: 0x23 },
    Register { name: "RXMISC", addr: 0x7d, value: 0x35 },
];

/// EU/US band defaults; callers pick which one matches their console.
#[derive(Debug, Clone, Copy)]
pub enum Frequency {
    Eu,
    Us,
}

impl Frequency {
    fn hz(self) -> f64 {
        match self {
            Frequency::Eu => 868_300_000.0,
            Frequency::Us => 905_000_000.0,
        }
    }
}

/// Identity read off the dongle's config flash at startup: a per-unit
/// transceiver id and a two-digit-group factory serial number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub transceiver_id: u16,
    pub serial: String,
}

fn frequency_correction(transport: &UsbTransport) -> Result<i32> {
    let flash = transport.read_config_flash(0x1F5)?;
    // four-byte signed correction word, big-endian
    let raw = ((flash[0] as u32) << 24)
        | ((flash[1] as u32) << 16)
        | ((flash[2] as u32) << 8)
        | flash[3] as u32;
    Ok(raw as i32)
}

/// Writes every register in [`REGISTERS`] to the transceiver.
pub fn configure_registers(transport: &UsbTransport) -> Result<()> {
    for reg in REGISTERS {
        transport.write_reg(reg.addr, reg.value)?;
    }
    Ok(())
}

/// Computes and programs the frequency registers, applying the factory
/// correction word and the "round up to odd" adjustment the reference
/// driver applies after adding it.
pub fn configure_frequency(transport: &UsbTransport, band: Frequency) -> Result<()> {
    let correction = frequency_correction(transport)?;
    let mut freq_val = (band.hz() / 16_000_000.0 * 16_777_216.0) as i64 + correction as i64;
    if freq_val % 2 == 0 {
        freq_val += 1;
    }
    let bytes = (freq_val as u32).to_be_bytes();
    transport.write_reg(0x20, bytes[0])?;
    transport.write_reg(0x21, bytes[1])?;
    transport.write_reg(0x22, bytes[2])?;
    transport.write_reg(0x23, bytes[3])?;
    info!(freq_val, ?band, "configured frequency");
    Ok(())
}

/// Reads the dongle's transceiver id and factory serial out of config flash.
pub fn read_identity(transport: &UsbTransport) -> Result<DeviceIdentity> {
    let flash = transport.read_config_flash(0x1F9)?;
    let transceiver_id = (flash[5] as u16) << 8 | flash[6] as u16;
    let serial: String = flash[0..7]
        .iter()
        .map(|b| format!("{:02}", b))
        .collect();
    if transceiver_id == 0 {
        warn!("transceiver id read as zero, flash may be uninitialized");
    }
    Ok(DeviceIdentity { transceiver_id, serial })
}

/// Runs the double-preamble initialization ritual the transceiver requires
/// before it will accept RX/TX commands.
pub fn init_transceiver(transport: &UsbTransport, band: Frequency) -> Result<DeviceIdentity> {
    transport.execute(5)?;
    configure_registers(transport)?;
    configure_frequency(transport, band)?;
    let identity = read_identity(transport)?;
    info!(?identity, "transceiver initialized");
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_table_has_50_entries() {
        assert_eq!(REGISTERS.len(), 50);
    }

    #[test]
    fn modulation_register_selects_fsk() {
        let modulation = REGISTERS.iter().find(|r| r.name == "MODULATION").unwrap();
        assert_eq!(modulation.value, 0x41);
    }

    #[test]
    fn register_addresses_are_unique() {
        let mut addrs: Vec<u8> = REGISTERS.iter().map(|r| r.addr).collect();
        addrs.sort_unstable();
        let before = addrs.len();
        addrs.dedup();
        assert_eq!(addrs.len(), before);
    }
}
