//! Error types for the GB28181 SIP engine.

use thiserror::Error;

/// A type alias for handling `Result`s with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing or handling a single SIP message.
///
/// Every variant here is a `GB_SIP_HEADER` or `GB_SIP_MESSAGE` failure:
/// parse failures are per-message, logged, and never tear down the
/// owning connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Neither a request-line nor a status-line matched.
    #[error("GB_SIP_MESSAGE: not a SIP/2.0 start line: {0:?}")]
    BadStartLine(String),

    /// Request method outside {REGISTER, MESSAGE, INVITE, ACK, BYE}.
    #[error("GB_SIP_MESSAGE: unsupported method: {0}")]
    UnsupportedMethod(String),

    /// A mandatory header (Via/From/To/Call-ID/CSeq) is absent.
    #[error("GB_SIP_HEADER: missing required header: {0}")]
    MissingHeader(&'static str),

    /// Via is present but malformed.
    #[error("GB_SIP_HEADER: malformed Via: {0}")]
    BadVia(String),

    /// From is present but lacks `tag=`.
    #[error("GB_SIP_HEADER: From header missing tag parameter")]
    MissingFromTag,

    /// CSeq is not `"<uint32> <method>"`, or its method disagrees with the
    /// request method.
    #[error("GB_SIP_HEADER: malformed CSeq: {0}")]
    BadCSeq(String),

    /// Expires is present but not a non-negative decimal integer.
    #[error("GB_SIP_HEADER: malformed Expires: {0}")]
    BadExpires(String),

    /// Max-Forwards is present but zero or non-decimal.
    #[error("GB_SIP_HEADER: malformed Max-Forwards: {0}")]
    BadMaxForwards(String),

    /// To-address user differs from the Request-URI user on a non-REGISTER
    /// request.
    #[error("GB_SIP_HEADER: To user does not match Request-URI user")]
    ToUriMismatch,

    /// Address-of-record (`sip:user@host`) could not be parsed.
    #[error("GB_SIP_HEADER: malformed address: {0}")]
    BadAddress(String),

    /// Content-Length did not match the supplied body length.
    #[error("GB_SIP_MESSAGE: Content-Length mismatch: expected {expected}, got {actual}")]
    ContentLengthMismatch { expected: usize, actual: usize },
}
