//! `gb-mux`: converts decoded PS elementary streams into FLV tags and
//! drives them into an RTMP sink.

pub mod aac;
pub mod annexb;
pub mod bridge;
pub mod error;
pub mod flv;
pub mod h264;
#[cfg(feature = "hevc")]
pub mod h265;
pub mod queue;
pub mod sink;

pub use bridge::MuxerBridge;
pub use error::{Error, Result};
pub use flv::FlvTag;
pub use sink::{NullSink, RtmpSink};
