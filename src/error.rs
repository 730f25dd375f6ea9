//! Error taxonomy for the data bank and the server loop.
//!
//! Frame-level protocol errors (bad header, illegal function/address/value) are not
//! part of this enum: they are folded into the wire protocol itself as either a
//! dropped connection or an in-band exception response, and never surface as a Rust
//! `Result` to the caller.

use thiserror::Error;

/// A data bank access fell outside `[0, 65536)`.
///
/// Per-function-code quantity limits (e.g. "at most 125 registers per read") are
/// validated in `frame.rs` before the bank is ever called, so they never reach this
/// type - only address-range violations do.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum DataBankError {
    #[error("address {addr} + count {count} is out of range")]
    AddressOutOfRange { addr: u16, count: u16 },
}

/// Errors surfaced by the server's process-level wiring: binding the listener,
/// loading configuration, or a worker's I/O failing outside the protocol loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}
