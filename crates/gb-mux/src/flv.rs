//! The FLV tag model shared by the H.264/H.265 and AAC encoders: a tiny
//! subset of the FLV spec (video/audio tag headers only — no container,
//! no script-data tags) since the only consumer is the RTMP sink.

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Key = 1,
    Inter = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Avc = 7,
    Hevc = 12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    SequenceHeader = 0,
    Nalu = 1,
}

/// A muxed video or audio tag, ready for the RTMP sink. `dts_ms` is the
/// FLV timestamp (milliseconds); composition time is folded into the
/// payload for video tags per the FLV AVCVIDEOPACKET layout.
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub is_video: bool,
    pub dts_ms: u32,
    pub payload: Bytes,
}

/// Build a video tag payload: `frame_type<<4 | codec_id`, packet type,
/// 3-byte signed composition time, then `body`.
pub fn video_tag(
    codec: VideoCodec,
    frame_type: FrameType,
    packet_type: AvcPacketType,
    composition_time: i32,
    dts_ms: u32,
    body: &[u8],
) -> FlvTag {
    let mut buf = BytesMut::with_capacity(5 + body.len());
    buf.put_u8(((frame_type as u8) << 4) | (codec as u8));
    buf.put_u8(packet_type as u8);
    let cts = composition_time.to_be_bytes();
    buf.put_slice(&cts[1..4]); // 24-bit signed, big-endian
    buf.put_slice(body);
    FlvTag { is_video: true, dts_ms, payload: buf.freeze() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    SequenceHeader = 0,
    Raw = 1,
}

/// Sound format 10 = AAC, rate/size/type bits are fixed by convention
/// for AAC-in-FLV (44 kHz/16-bit/stereo markers, ignored by real decoders).
pub fn audio_tag(packet_type: AacPacketType, dts_ms: u32, body: &[u8]) -> FlvTag {
    let mut buf = BytesMut::with_capacity(2 + body.len());
    buf.put_u8(0xAF); // soundFormat=10(AAC) | rate=3 | size=1 | type=1
    buf.put_u8(packet_type as u8);
    buf.put_slice(body);
    FlvTag { is_video: false, dts_ms, payload: buf.freeze() }
}
