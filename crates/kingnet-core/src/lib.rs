pub mod config;
pub mod constants;
pub mod error;

pub use config::ConnectionConfig;
pub use error::{Error, Result};
