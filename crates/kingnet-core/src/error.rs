use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid buffer size: {size} (must be between {min} and {max})")]
    InvalidBufferSize { size: usize, min: usize, max: usize },

    #[error("Invalid connect timeout: {0}ms")]
    InvalidTimeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
