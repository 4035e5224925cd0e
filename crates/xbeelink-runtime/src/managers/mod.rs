//! Gateway managers
//!
//! Cheap views over the shared runtime state, one per protocol concern:
//! - `connection`: per-link lifecycle actors, mutation and write gates
//! - `relay`: the user-data relay multiplexer
//! - `transfer`: the chunked file-transfer driver

pub mod connection;
pub mod relay;
pub mod transfer;

pub use connection::ConnectionManager;
pub use relay::RelayChannel;
pub use transfer::{TransferManager, TransferTicket};
