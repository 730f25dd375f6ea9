//! Bit/word utilities shared by the frame codec and the data bank's typed accessors.
//!
//! Every function here is pure: inputs are never mutated, and nothing allocates beyond
//! the returned `Vec`. Precondition violations (e.g. an odd-length word list passed to
//! [`words_to_longs`]) are caller errors and are documented rather than defended
//! against, matching the contract of the protocol this was distilled from.

/// Returns the bits of `v`, least-significant bit first, as a `size`-element list.
///
/// `size` is normally 8, 16 or 32; any larger size is simply a wider shift.
#[must_use]
pub fn bits_from_int(v: u32, size: u32) -> Vec<bool> {
    (0..size).map(|i| (v >> i) & 1 == 1).collect()
}

/// True if bit `off` (0 = LSB) of `v` is set.
#[inline]
#[must_use]
pub fn test_bit(v: u32, off: u32) -> bool {
    v & (1 << off) != 0
}

/// `v` with bit `off` set.
#[inline]
#[must_use]
pub fn set_bit(v: u32, off: u32) -> u32 {
    v | (1 << off)
}

/// `v` with bit `off` cleared.
#[inline]
#[must_use]
pub fn reset_bit(v: u32, off: u32) -> u32 {
    v & !(1 << off)
}

/// `v` with bit `off` flipped.
#[inline]
#[must_use]
pub fn toggle_bit(v: u32, off: u32) -> u32 {
    v ^ (1 << off)
}

/// Bit-preserving reinterpretation of an IEEE-754 single-precision float as its
/// big-endian-agnostic bit pattern. NaNs round-trip bit-for-bit through
/// [`decode_ieee`].
#[inline]
#[must_use]
pub fn encode_ieee(f: f32) -> u32 {
    f.to_bits()
}

/// Inverse of [`encode_ieee`].
#[inline]
#[must_use]
pub fn decode_ieee(v: u32) -> f32 {
    f32::from_bits(v)
}

/// Pairs up a list of 16-bit words into 32-bit longs.
///
/// # Panics
///
/// Panics if `words` has an odd length; an even-length list is a precondition the
/// caller must uphold, exactly as in the reference implementation this was derived
/// from.
#[must_use]
pub fn words_to_longs(words: &[u16], big_endian: bool) -> Vec<u32> {
    assert!(words.len() % 2 == 0, "words_to_longs requires an even-length list");
    words
        .chunks_exact(2)
        .map(|pair| {
            let (hi, lo) = if big_endian {
                (pair[0], pair[1])
            } else {
                (pair[1], pair[0])
            };
            (u32::from(hi) << 16) | u32::from(lo)
        })
        .collect()
}

/// Splits a list of 32-bit longs back into 16-bit words; the inverse of
/// [`words_to_longs`].
#[must_use]
pub fn longs_to_words(longs: &[u32], big_endian: bool) -> Vec<u16> {
    let mut words = Vec::with_capacity(longs.len() * 2);
    for &l in longs {
        #[allow(clippy::cast_possible_truncation)]
        let (hi, lo) = ((l >> 16) as u16, l as u16);
        if big_endian {
            words.push(hi);
            words.push(lo);
        } else {
            words.push(lo);
            words.push(hi);
        }
    }
    words
}

/// Two's-complement reinterpretation of `v` as a `size`-bit signed quantity, returned
/// widened to `i64`. If the sign bit (bit `size - 1`) is clear, `v` is returned
/// unchanged.
#[must_use]
pub fn to_2comp(v: u32, size: u32) -> i64 {
    if v & (1 << (size - 1)) != 0 {
        i64::from(v) - (1i64 << size)
    } else {
        i64::from(v)
    }
}

/// Element-wise [`to_2comp`] over a list.
#[must_use]
pub fn to_2comp_list(values: &[u32], size: u32) -> Vec<i64> {
    values.iter().map(|&v| to_2comp(v, size)).collect()
}

/// Modbus CRC16: initial value `0xFFFF`, polynomial `0xA001`, reflected.
///
/// Retained for future RTU/ASCII transports; unused on the TCP path, which frames
/// requests with the MBAP length field instead of a checksum.
#[must_use]
pub fn crc16(frame: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in frame {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_ops_round_trip() {
        for off in 0..16 {
            let v: u32 = 0;
            assert!(test_bit(set_bit(v, off), off));
            assert!(!test_bit(reset_bit(set_bit(v, off), off), off));
            assert_eq!(toggle_bit(toggle_bit(v, off), off), v);
        }
    }

    #[test]
    fn bits_from_int_is_lsb_first() {
        assert_eq!(
            bits_from_int(0b0000_0101, 8),
            vec![true, false, true, false, false, false, false, false]
        );
    }

    #[test]
    fn ieee_round_trips_non_nan() {
        for f in [0.0f32, -0.0, 1.0, -1234.5, f32::MAX, f32::MIN_POSITIVE] {
            assert_eq!(decode_ieee(encode_ieee(f)), f);
        }
    }

    #[test]
    fn ieee_nan_round_trips_bit_for_bit() {
        let nan_bits: u32 = 0x7FC0_0001;
        let decoded = decode_ieee(nan_bits);
        assert!(decoded.is_nan());
        assert_eq!(encode_ieee(decoded), nan_bits);
    }

    #[test]
    fn words_longs_round_trip_both_endians() {
        let words = [0x1234u16, 0x5678, 0x9ABC, 0xDEF0];
        for &be in &[true, false] {
            let longs = words_to_longs(&words, be);
            assert_eq!(longs_to_words(&longs, be), words);
        }
    }

    #[test]
    #[should_panic(expected = "even-length")]
    fn words_to_longs_rejects_odd_length() {
        let _ = words_to_longs(&[0x0001], true);
    }

    #[test]
    fn to_2comp_respects_sign_bit() {
        assert_eq!(to_2comp(0x0000_7FFF, 16), 0x7FFF);
        assert_eq!(to_2comp(0x0000_8000, 16), -32768);
        assert_eq!(to_2comp(0x0000_FFFF, 16), -1);
    }

    #[test]
    fn crc16_matches_reference_vectors() {
        assert_eq!(crc16(&[]), 0xFFFF);
        // Read Holding Registers, unit 1, addr 0, count 10 - textbook reference frame.
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
    }

    #[test]
    fn crc16_matches_external_crate() {
        use crc16::{State, MODBUS};
        let frame = [0x11, 0x06, 0x00, 0x01, 0x00, 0x03];
        assert_eq!(crc16(&frame), State::<MODBUS>::calculate(&frame));
    }
}
