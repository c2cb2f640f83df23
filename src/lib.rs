#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod operation;
pub mod pool;
pub mod transport;

pub use config::{DEFAULT_INTERVAL, Settings};
pub use connection::{Connection, ConnectionState};
pub use operation::{Firing, Handler, OperationSpec};
pub use pool::ConnectionPool;

pub type Result<T> = std::result::Result<T, error::Error>;
