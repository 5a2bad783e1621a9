//! Error types for the PS/RTP demultiplexer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure categories raised while framing, decoding, or recovering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// RFC 4571 length prefix was zero.
    #[error("GB_PS_MEDIA: zero-length RTP-over-TCP frame")]
    ZeroLengthFrame,

    /// An RTP payload arrived larger than 1500 bytes while already in
    /// recover mode: one of the two escape hatches.
    #[error("GB_PS_MEDIA: oversize packet ({0} bytes) while recovering")]
    OversizeWhileRecovering(usize),

    /// `recover_counter` exceeded 16: the other escape hatch.
    #[error("GB_PS_MEDIA: recover counter exceeded bound")]
    RecoverBoundExceeded,

    /// Truncated or malformed RTP header.
    #[error("GB_PS_MEDIA: truncated RTP header")]
    TruncatedRtp,

    /// Malformed PS pack, system header, or PSM.
    #[error("GB_PS_HEADER: {0}")]
    BadPsHeader(&'static str),

    /// Malformed PES header.
    #[error("GB_PS_HEADER: bad PES header: {0}")]
    BadPesHeader(&'static str),

    /// PSM declared HEVC but the build has no H.265 support.
    #[error("HEVC_DISABLED: PSM declares HEVC but H.265 support is not compiled in")]
    HevcDisabled,
}
