//! Error types for the FLV muxer bridge.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An IDR/non-IDR NALU arrived before any SPS/PPS (or VPS/SPS/PPS)
    /// sequence header had been emitted.
    #[error("H264_DROP_BEFORE_SPS_PPS: video frame dropped, no sequence header emitted yet")]
    DropBeforeSpsPps,

    /// ADTS header was malformed; cannot synthesize AudioSpecificConfig.
    #[error("STREAM_CASTER_TS_CODEC: malformed ADTS header")]
    BadAdtsHeader,

    /// PSM declared HEVC but this build has no H.265 support.
    #[error("HEVC_DISABLED: incoming stream is H.265 but H.265 support is not compiled in")]
    HevcDisabled,

    /// The downstream RTMP sink rejected a write or the connection reset.
    #[error("RTMP sink error: {0}")]
    Sink(String),
}
