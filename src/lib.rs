//! A Modbus/TCP server library: MBAP framing, a thread-safe coil/holding-register
//! bank, and a multi-client TCP listener built on one OS thread per connection.
//!
//! ```no_run
//! use std::sync::Arc;
//! use modbus_tcpd::config::ServerConfig;
//! use modbus_tcpd::server::ModbusTcpServer;
//!
//! let config = ServerConfig {
//!     host: "0.0.0.0".into(),
//!     port: 1502,
//!     unit_id: 1,
//!     ipv6: false,
//!     blocking: false,
//! };
//! let mut server = ModbusTcpServer::new(config);
//! server.start().unwrap();
//! let bank = server.bank();
//! bank.write_holding(0, 42).unwrap();
//! server.stop();
//! ```

pub mod config;
pub mod consts;
pub mod databank;
pub mod error;
pub mod frame;
pub mod server;
pub mod util;

pub use databank::DataBank;
pub use error::{DataBankError, ServerError};
pub use server::ModbusTcpServer;
