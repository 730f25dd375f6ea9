//! The data bank: the server's entire addressable state, and the only thing worker
//! threads actually contend on.
//!
//! Coils and holding registers live behind independent [`RwLock`]s so a read of one
//! space never blocks a write to the other. Discrete inputs and input registers are
//! not modeled separately: per this server's design, FC 0x02 reads the coil space and
//! FC 0x04 reads the holding register space (see the glossary entry on the two
//! read-only function codes).

use std::sync::RwLock;

use crate::consts::SPACE_SIZE;
use crate::error::DataBankError;
use crate::util;

/// Thread-safe storage for 65536 coils and 65536 holding registers.
///
/// Cloning a `DataBank` is not supported; share it behind an [`std::sync::Arc`] across
/// worker threads instead, the way [`crate::server::ModbusTcpServer`] does.
#[derive(Debug)]
pub struct DataBank {
    coils: RwLock<Vec<bool>>,
    holdings: RwLock<Vec<u16>>,
}

impl Default for DataBank {
    fn default() -> Self {
        Self::new()
    }
}

impl DataBank {
    /// A fresh bank: every coil `false`, every register `0`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            coils: RwLock::new(vec![false; SPACE_SIZE]),
            holdings: RwLock::new(vec![0u16; SPACE_SIZE]),
        }
    }

    /// Resets every coil and register to its zero value. The two locks are taken and
    /// released independently, so this is not atomic with respect to a concurrent
    /// reader that spans both spaces.
    pub fn clear_all(&self) {
        self.coils.write().unwrap().iter_mut().for_each(|c| *c = false);
        self.holdings.write().unwrap().iter_mut().for_each(|h| *h = 0);
    }

    fn check_bounds(addr: u16, count: u16) -> Result<(), DataBankError> {
        Self::check_bounds_len(addr, usize::from(count))
    }

    /// Like [`check_bounds`](Self::check_bounds), but takes a `usize` length so a
    /// slice's real length is never truncated to `u16` before the range check runs -
    /// a slice far longer than the address space must still be rejected, not wrap
    /// around and slip past the check.
    fn check_bounds_len(addr: u16, count: usize) -> Result<(), DataBankError> {
        if usize::from(addr) + count > SPACE_SIZE {
            #[allow(clippy::cast_possible_truncation)]
            let count = count.min(usize::from(u16::MAX)) as u16;
            return Err(DataBankError::AddressOutOfRange { addr, count });
        }
        Ok(())
    }

    // -- coils --------------------------------------------------------------

    pub fn read_coil(&self, addr: u16) -> Result<bool, DataBankError> {
        Self::check_bounds(addr, 1)?;
        Ok(self.coils.read().unwrap()[usize::from(addr)])
    }

    pub fn write_coil(&self, addr: u16, value: bool) -> Result<(), DataBankError> {
        Self::check_bounds(addr, 1)?;
        self.coils.write().unwrap()[usize::from(addr)] = value;
        Ok(())
    }

    pub fn read_coils(&self, addr: u16, count: u16) -> Result<Vec<bool>, DataBankError> {
        Self::check_bounds(addr, count)?;
        let coils = self.coils.read().unwrap();
        Ok(coils[usize::from(addr)..usize::from(addr) + usize::from(count)].to_vec())
    }

    pub fn write_coils(&self, addr: u16, values: &[bool]) -> Result<(), DataBankError> {
        Self::check_bounds_len(addr, values.len())?;
        let mut coils = self.coils.write().unwrap();
        let start = usize::from(addr);
        coils[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Coils packed into bytes, LSB of the first byte holding the lowest address - the
    /// wire layout the read-coils response uses directly.
    pub fn read_coils_as_bytes(&self, addr: u16, count: u16) -> Result<Vec<u8>, DataBankError> {
        let coils = self.read_coils(addr, count)?;
        let byte_count = (usize::from(count) + 7) / 8;
        let mut bytes = vec![0u8; byte_count];
        for (i, &bit) in coils.iter().enumerate() {
            if bit {
                bytes[i / 8] = util::set_bit(u32::from(bytes[i / 8]), (i % 8) as u32) as u8;
            }
        }
        Ok(bytes)
    }

    pub fn write_coils_from_bytes(
        &self,
        addr: u16,
        count: u16,
        bytes: &[u8],
    ) -> Result<(), DataBankError> {
        Self::check_bounds(addr, count)?;
        let values: Vec<bool> = (0..count)
            .map(|i| {
                let byte = bytes[usize::from(i) / 8];
                util::test_bit(u32::from(byte), u32::from(i) % 8)
            })
            .collect();
        self.write_coils(addr, &values)
    }

    // -- holding registers ----------------------------------------------------

    pub fn read_holding(&self, addr: u16) -> Result<u16, DataBankError> {
        Self::check_bounds(addr, 1)?;
        Ok(self.holdings.read().unwrap()[usize::from(addr)])
    }

    pub fn write_holding(&self, addr: u16, value: u16) -> Result<(), DataBankError> {
        Self::check_bounds(addr, 1)?;
        self.holdings.write().unwrap()[usize::from(addr)] = value;
        Ok(())
    }

    pub fn read_holdings(&self, addr: u16, count: u16) -> Result<Vec<u16>, DataBankError> {
        Self::check_bounds(addr, count)?;
        let holdings = self.holdings.read().unwrap();
        Ok(holdings[usize::from(addr)..usize::from(addr) + usize::from(count)].to_vec())
    }

    pub fn write_holdings(&self, addr: u16, values: &[u16]) -> Result<(), DataBankError> {
        Self::check_bounds_len(addr, values.len())?;
        let mut holdings = self.holdings.write().unwrap();
        let start = usize::from(addr);
        holdings[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Registers as big-endian byte pairs - the wire layout the read-holding-registers
    /// response uses directly.
    pub fn read_holdings_as_bytes(&self, addr: u16, count: u16) -> Result<Vec<u8>, DataBankError> {
        let regs = self.read_holdings(addr, count)?;
        let mut bytes = Vec::with_capacity(regs.len() * 2);
        for r in regs {
            bytes.extend_from_slice(&r.to_be_bytes());
        }
        Ok(bytes)
    }

    // -- typed register views --------------------------------------------------

    /// Two consecutive holding registers, big-endian, as a `u32`.
    pub fn read_holdings_as_u32(&self, addr: u16) -> Result<u32, DataBankError> {
        let w = self.read_holdings(addr, 2)?;
        Ok(util::words_to_longs(&w, true)[0])
    }

    pub fn write_holdings_from_u32(&self, addr: u16, value: u32) -> Result<(), DataBankError> {
        self.write_holdings(addr, &util::longs_to_words(&[value], true))
    }

    /// Four consecutive holding registers, big-endian, as a `u64`.
    pub fn read_holdings_as_u64(&self, addr: u16) -> Result<u64, DataBankError> {
        let w = self.read_holdings(addr, 4)?;
        let longs = util::words_to_longs(&w, true);
        Ok((u64::from(longs[0]) << 32) | u64::from(longs[1]))
    }

    pub fn write_holdings_from_u64(&self, addr: u16, value: u64) -> Result<(), DataBankError> {
        #[allow(clippy::cast_possible_truncation)]
        let longs = [(value >> 32) as u32, value as u32];
        self.write_holdings(addr, &util::longs_to_words(&longs, true))
    }

    /// Two consecutive holding registers, big-endian, as an IEEE-754 `f32`.
    pub fn read_holdings_as_f32(&self, addr: u16) -> Result<f32, DataBankError> {
        Ok(util::decode_ieee(self.read_holdings_as_u32(addr)?))
    }

    pub fn write_holdings_from_f32(&self, addr: u16, value: f32) -> Result<(), DataBankError> {
        self.write_holdings_from_u32(addr, util::encode_ieee(value))
    }

    /// Four consecutive holding registers, big-endian, as an IEEE-754 `f64`.
    pub fn read_holdings_as_f64(&self, addr: u16) -> Result<f64, DataBankError> {
        Ok(f64::from_bits(self.read_holdings_as_u64(addr)?))
    }

    pub fn write_holdings_from_f64(&self, addr: u16, value: f64) -> Result<(), DataBankError> {
        self.write_holdings_from_u64(addr, value.to_bits())
    }

    /// A run of holding registers decoded as ASCII, one register per two characters
    /// (high byte first), trimmed of nothing - callers decide how to treat padding.
    pub fn read_holdings_as_ascii(&self, addr: u16, count: u16) -> Result<String, DataBankError> {
        let bytes = self.read_holdings_as_bytes(addr, count)?;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    /// Writes `value` two ASCII characters per register, high byte first. An
    /// odd-length `value` writes its final character into the high byte of the last
    /// register touched and zero-fills that register's low byte.
    pub fn write_holdings_from_ascii(&self, addr: u16, value: &str) -> Result<(), DataBankError> {
        let mut bytes: Vec<u8> = value.bytes().collect();
        if bytes.len() % 2 != 0 {
            bytes.push(0x00);
        }
        let registers: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        self.write_holdings(addr, &registers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bank_is_all_zero() {
        let bank = DataBank::new();
        assert_eq!(bank.read_coils(0, 16).unwrap(), vec![false; 16]);
        assert_eq!(bank.read_holdings(0, 4).unwrap(), vec![0u16; 4]);
    }

    #[test]
    fn coil_round_trip() {
        let bank = DataBank::new();
        bank.write_coil(100, true).unwrap();
        assert!(bank.read_coil(100).unwrap());
        assert!(!bank.read_coil(99).unwrap());
    }

    #[test]
    fn coil_bulk_round_trip_packs_lsb_first() {
        let bank = DataBank::new();
        bank.write_coils(0, &[true, false, true, false, false, false, false, false, true])
            .unwrap();
        let bytes = bank.read_coils_as_bytes(0, 9).unwrap();
        assert_eq!(bytes, vec![0b0000_0101, 0b0000_0001]);
    }

    #[test]
    fn holding_round_trip() {
        let bank = DataBank::new();
        bank.write_holdings(10, &[1, 2, 3]).unwrap();
        assert_eq!(bank.read_holdings(10, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let bank = DataBank::new();
        assert!(bank.read_coil(65535).is_ok());
        assert!(matches!(
            bank.read_coils(65535, 2),
            Err(DataBankError::AddressOutOfRange { .. })
        ));
        assert!(matches!(
            bank.read_holdings(60000, 10000),
            Err(DataBankError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn write_slice_longer_than_the_address_space_is_rejected_not_truncated() {
        let bank = DataBank::new();
        let values = vec![false; usize::from(u16::MAX) + 2];
        assert!(matches!(
            bank.write_coils(0, &values),
            Err(DataBankError::AddressOutOfRange { .. })
        ));

        let regs = vec![0u16; usize::from(u16::MAX) + 2];
        assert!(matches!(
            bank.write_holdings(0, &regs),
            Err(DataBankError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn u32_f32_round_trip_big_endian() {
        let bank = DataBank::new();
        bank.write_holdings_from_u32(0, 0x1234_5678).unwrap();
        assert_eq!(bank.read_holdings(0, 2).unwrap(), vec![0x1234, 0x5678]);
        assert_eq!(bank.read_holdings_as_u32(0).unwrap(), 0x1234_5678);

        bank.write_holdings_from_f32(2, -1.5).unwrap();
        assert_eq!(bank.read_holdings_as_f32(2).unwrap(), -1.5);
    }

    #[test]
    fn u64_round_trip() {
        let bank = DataBank::new();
        bank.write_holdings_from_u64(0, 0x0011_2233_4455_6677).unwrap();
        assert_eq!(bank.read_holdings_as_u64(0).unwrap(), 0x0011_2233_4455_6677);
    }

    #[test]
    fn f64_round_trip() {
        let bank = DataBank::new();
        bank.write_holdings_from_f64(0, -12345.6789).unwrap();
        assert_eq!(bank.read_holdings_as_f64(0).unwrap(), -12345.6789);
    }

    #[test]
    fn ascii_round_trip_even_length() {
        let bank = DataBank::new();
        bank.write_holdings_from_ascii(0, "OK").unwrap();
        assert_eq!(bank.read_holdings_as_ascii(0, 1).unwrap(), "OK");
    }

    #[test]
    fn ascii_odd_length_pads_final_low_byte_with_zero() {
        let bank = DataBank::new();
        bank.write_holdings_from_ascii(0, "ABC").unwrap();
        assert_eq!(bank.read_holdings(0, 2).unwrap(), vec![0x4142, 0x4300]);
    }

    #[test]
    fn clear_all_zeroes_everything() {
        let bank = DataBank::new();
        bank.write_coil(5, true).unwrap();
        bank.write_holding(5, 42).unwrap();
        bank.clear_all();
        assert!(!bank.read_coil(5).unwrap());
        assert_eq!(bank.read_holding(5).unwrap(), 0);
    }
}
