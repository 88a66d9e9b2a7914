pub mod config;
pub mod error;
pub mod marker;
pub mod types;
pub mod usage;

pub use error::{BridgeError, Result};
