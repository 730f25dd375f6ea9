//! MBAP header parsing and per-function-code dispatch.
//!
//! Everything here is synchronous and I/O-free: [`MbapHeader::parse`] only looks at
//! the 7 header bytes already in hand, and [`process_request`] only needs the body
//! bytes and a [`DataBank`] reference. The connection worker in [`crate::server`] owns
//! all the socket reads/writes and the framing-error-vs-exception policy split.

use thiserror::Error;

use crate::consts::{
    EXCEPTION_BIT, EXC_ILLEGAL_DATA_ADDRESS, EXC_ILLEGAL_DATA_VALUE, EXC_ILLEGAL_FUNCTION,
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS,
    MAX_WRITE_REGISTERS,
};
use crate::databank::DataBank;

pub const MBAP_HEADER_LEN: usize = 7;

/// The 7-byte MBAP header, decoded.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

/// A frame that fails validation steps 1-2 of the framing rules: the connection is
/// closed without a response, never converted to an in-band exception.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum FramingError {
    #[error("protocol_id {0} is not 0")]
    BadProtocolId(u16),
    #[error("length {0} is outside the 3..256 range")]
    BadLength(u16),
    #[error("function code {0:#04x} has the high bit set on a request")]
    HighBitFunctionCode(u8),
}

impl MbapHeader {
    /// Parses and validates a header. `length` must satisfy `2 < length < 256`
    /// (a lone function-code byte with no body is a framing violation, not a request
    /// that reaches function-code dispatch).
    pub fn parse(buf: &[u8; MBAP_HEADER_LEN]) -> Result<Self, FramingError> {
        let transaction_id = u16::from_be_bytes([buf[0], buf[1]]);
        let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
        let length = u16::from_be_bytes([buf[4], buf[5]]);
        let unit_id = buf[6];
        if protocol_id != 0 {
            return Err(FramingError::BadProtocolId(protocol_id));
        }
        if !(2 < length && length < 256) {
            return Err(FramingError::BadLength(length));
        }
        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
        })
    }

    /// Number of PDU bytes following the header (`length - 1`; `length` counts the
    /// unit_id byte that the header already carries).
    #[must_use]
    pub fn body_len(&self) -> usize {
        usize::from(self.length) - 1
    }
}

/// Rejects a PDU whose function code has the high bit set; this is a framing
/// violation (the connection closes), not something function-code dispatch ever sees.
pub fn check_function_code(fc: u8) -> Result<(), FramingError> {
    if fc & EXCEPTION_BIT != 0 {
        return Err(FramingError::HighBitFunctionCode(fc));
    }
    Ok(())
}

/// Dispatches a parsed request body against `bank` and returns the full response
/// frame (header + PDU), success or exception. `body` is the PDU: function code byte
/// followed by function-specific data, exactly `header.body_len()` bytes.
#[must_use]
pub fn process_request(header: &MbapHeader, body: &[u8], bank: &DataBank) -> Vec<u8> {
    let fc = body[0];
    let data = &body[1..];
    match fc {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => read_bits(header, fc, data, bank),
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            read_registers(header, fc, data, bank)
        }
        FC_WRITE_SINGLE_COIL => write_single_coil(header, data, bank),
        FC_WRITE_SINGLE_REGISTER => write_single_register(header, data, bank),
        FC_WRITE_MULTIPLE_COILS => write_multiple_coils(header, data, bank),
        FC_WRITE_MULTIPLE_REGISTERS => write_multiple_registers(header, data, bank),
        _ => exception_response(header, fc, EXC_ILLEGAL_FUNCTION),
    }
}

fn success_response(header: &MbapHeader, fc: u8, body: &[u8]) -> Vec<u8> {
    let pdu_len = 1 + body.len();
    let mut resp = Vec::with_capacity(MBAP_HEADER_LEN + pdu_len);
    resp.extend_from_slice(&header.transaction_id.to_be_bytes());
    resp.extend_from_slice(&0u16.to_be_bytes());
    #[allow(clippy::cast_possible_truncation)]
    resp.extend_from_slice(&((1 + pdu_len) as u16).to_be_bytes());
    resp.push(header.unit_id);
    resp.push(fc);
    resp.extend_from_slice(body);
    resp
}

fn exception_response(header: &MbapHeader, fc: u8, exception: u8) -> Vec<u8> {
    success_response(header, fc | EXCEPTION_BIT, &[exception])
}

fn parse_addr_count(data: &[u8]) -> Option<(u16, u16)> {
    if data.len() != 4 {
        return None;
    }
    Some((
        u16::from_be_bytes([data[0], data[1]]),
        u16::from_be_bytes([data[2], data[3]]),
    ))
}

fn read_bits(header: &MbapHeader, fc: u8, data: &[u8], bank: &DataBank) -> Vec<u8> {
    let Some((addr, count)) = parse_addr_count(data) else {
        return exception_response(header, fc, EXC_ILLEGAL_DATA_VALUE);
    };
    if count == 0 || count > MAX_READ_BITS {
        return exception_response(header, fc, EXC_ILLEGAL_DATA_VALUE);
    }
    match bank.read_coils_as_bytes(addr, count) {
        Ok(bytes) => {
            let mut body = Vec::with_capacity(1 + bytes.len());
            #[allow(clippy::cast_possible_truncation)]
            body.push(bytes.len() as u8);
            body.extend_from_slice(&bytes);
            success_response(header, fc, &body)
        }
        Err(_) => exception_response(header, fc, EXC_ILLEGAL_DATA_ADDRESS),
    }
}

fn read_registers(header: &MbapHeader, fc: u8, data: &[u8], bank: &DataBank) -> Vec<u8> {
    let Some((addr, count)) = parse_addr_count(data) else {
        return exception_response(header, fc, EXC_ILLEGAL_DATA_VALUE);
    };
    if count == 0 || count > MAX_READ_REGISTERS {
        return exception_response(header, fc, EXC_ILLEGAL_DATA_VALUE);
    }
    match bank.read_holdings_as_bytes(addr, count) {
        Ok(bytes) => {
            let mut body = Vec::with_capacity(1 + bytes.len());
            #[allow(clippy::cast_possible_truncation)]
            body.push(bytes.len() as u8);
            body.extend_from_slice(&bytes);
            success_response(header, fc, &body)
        }
        Err(_) => exception_response(header, fc, EXC_ILLEGAL_DATA_ADDRESS),
    }
}

fn write_single_coil(header: &MbapHeader, data: &[u8], bank: &DataBank) -> Vec<u8> {
    if data.len() != 4 {
        return exception_response(header, FC_WRITE_SINGLE_COIL, EXC_ILLEGAL_DATA_VALUE);
    }
    let addr = u16::from_be_bytes([data[0], data[1]]);
    let value = match u16::from_be_bytes([data[2], data[3]]) {
        0xFF00 => true,
        0x0000 => false,
        _ => return exception_response(header, FC_WRITE_SINGLE_COIL, EXC_ILLEGAL_DATA_VALUE),
    };
    match bank.write_coil(addr, value) {
        Ok(()) => success_response(header, FC_WRITE_SINGLE_COIL, data),
        Err(_) => exception_response(header, FC_WRITE_SINGLE_COIL, EXC_ILLEGAL_DATA_ADDRESS),
    }
}

fn write_single_register(header: &MbapHeader, data: &[u8], bank: &DataBank) -> Vec<u8> {
    if data.len() != 4 {
        return exception_response(header, FC_WRITE_SINGLE_REGISTER, EXC_ILLEGAL_DATA_VALUE);
    }
    let addr = u16::from_be_bytes([data[0], data[1]]);
    let value = u16::from_be_bytes([data[2], data[3]]);
    match bank.write_holding(addr, value) {
        Ok(()) => success_response(header, FC_WRITE_SINGLE_REGISTER, data),
        Err(_) => exception_response(header, FC_WRITE_SINGLE_REGISTER, EXC_ILLEGAL_DATA_ADDRESS),
    }
}

fn write_multiple_coils(header: &MbapHeader, data: &[u8], bank: &DataBank) -> Vec<u8> {
    const FC: u8 = FC_WRITE_MULTIPLE_COILS;
    if data.len() < 5 {
        return exception_response(header, FC, EXC_ILLEGAL_DATA_VALUE);
    }
    let addr = u16::from_be_bytes([data[0], data[1]]);
    let count = u16::from_be_bytes([data[2], data[3]]);
    let byte_count = usize::from(data[4]);
    if count == 0 || count > MAX_WRITE_BITS {
        return exception_response(header, FC, EXC_ILLEGAL_DATA_VALUE);
    }
    let expected_bytes = (usize::from(count) + 7) / 8;
    if byte_count != expected_bytes || data.len() != 5 + byte_count {
        return exception_response(header, FC, EXC_ILLEGAL_DATA_VALUE);
    }
    match bank.write_coils_from_bytes(addr, count, &data[5..5 + byte_count]) {
        Ok(()) => success_response(header, FC, &data[0..4]),
        Err(_) => exception_response(header, FC, EXC_ILLEGAL_DATA_ADDRESS),
    }
}

fn write_multiple_registers(header: &MbapHeader, data: &[u8], bank: &DataBank) -> Vec<u8> {
    const FC: u8 = FC_WRITE_MULTIPLE_REGISTERS;
    if data.len() < 5 {
        return exception_response(header, FC, EXC_ILLEGAL_DATA_VALUE);
    }
    let addr = u16::from_be_bytes([data[0], data[1]]);
    let count = u16::from_be_bytes([data[2], data[3]]);
    let byte_count = usize::from(data[4]);
    if count == 0 || count > MAX_WRITE_REGISTERS {
        return exception_response(header, FC, EXC_ILLEGAL_DATA_VALUE);
    }
    if byte_count != usize::from(count) * 2 || data.len() != 5 + byte_count {
        return exception_response(header, FC, EXC_ILLEGAL_DATA_VALUE);
    }
    // All registers are decoded and written before the response is built - unlike the
    // source this was distilled from, which assembled a response inside the loop.
    let registers: Vec<u16> = data[5..5 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    match bank.write_holdings(addr, &registers) {
        Ok(()) => success_response(header, FC, &data[0..4]),
        Err(_) => exception_response(header, FC, EXC_ILLEGAL_DATA_ADDRESS),
    }
}
