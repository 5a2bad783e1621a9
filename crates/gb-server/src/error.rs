//! Top-level error type for the gateway binary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("GB_CONFIG: {0}")]
    Config(String),

    /// A listener task panicked or was aborted; distinct from `Config`
    /// since it's a runtime fault, not a bad startup setting.
    #[error("GB_TASK_FAILED: {0}")]
    TaskFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Session(#[from] gb_session::Error),
}
