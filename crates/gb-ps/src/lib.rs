//! `gb-ps`: RFC 4571 RTP-over-TCP framing and the MPEG-PS demultiplexer
//! with bounded error recovery.
//!
//! The interesting part of this crate is [`ps::PsDecodeContext`]: a
//! pack-scoped decode loop with a resync-on-magic recovery mode, mirrored
//! from the original GB28181 gateway this one replaces.

pub mod connection;
pub mod error;
pub mod framing;
pub mod ps;
pub mod rtp;

pub use connection::{MediaConnEvent, MediaConnectionHandle};
pub use error::{Error, Result};
pub use ps::{PackInfo, PesMessage, PsDecodeContext, PsHandler, PsStats, RtpInfo, StreamClass};
pub use rtp::RtpHeader;
