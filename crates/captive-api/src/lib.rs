// captive-api: Async Rust client for a RouterOS-style device command bridge

pub mod command;
pub mod error;
pub mod rest;
pub mod transport;

pub use command::{ID_KEY, RET_KEY, Record, Request, Word};
pub use error::Error;
pub use rest::{FileChannel, RestClient};
pub use transport::{TlsMode, TransportConfig};
