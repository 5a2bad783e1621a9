//! Error types for the session controller and registry.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No unique SSRC found in 16 tries.
    #[error("GB_SSRC_GENERATE: exhausted 16 attempts to allocate a unique SSRC")]
    SsrcExhausted,

    /// The connecting state exceeded the configured retry budget.
    #[error("GB_TIMEOUT: session {0} exceeded connecting retries")]
    Timeout(String),

    /// A device-id was already bound to another session.
    #[error("device-id {0} already has an active session")]
    DuplicateDevice(String),
}
