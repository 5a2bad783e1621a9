//! Wires PS packs into the codec encoders, the reorder queue, and the
//! RTMP sink: the orchestration layer the standalone codec modules
//! don't own.

use bytes::BytesMut;
use gb_ps::{PackInfo, PesMessage, StreamClass};
use tracing::warn;

use crate::aac::AacEncoder;
use crate::error::{Error, Result};
use crate::h264::H264Encoder;
#[cfg(feature = "hevc")]
use crate::h265::H265Encoder;
use crate::queue::ReorderQueue;
use crate::sink::RtmpSink;

const VIDEO_STREAM_H265: u8 = 0x24;

enum VideoEncoder {
    H264(H264Encoder),
    #[cfg(feature = "hevc")]
    H265(H265Encoder),
}

impl VideoEncoder {
    fn encode(&mut self, payload: &[u8], dts_ms: u32) -> Result<Vec<crate::flv::FlvTag>> {
        match self {
            VideoEncoder::H264(e) => e.encode(payload, dts_ms),
            #[cfg(feature = "hevc")]
            VideoEncoder::H265(e) => e.encode(payload, dts_ms),
        }
    }

    fn reset(&mut self) {
        match self {
            VideoEncoder::H264(e) => e.reset(),
            #[cfg(feature = "hevc")]
            VideoEncoder::H265(e) => e.reset(),
        }
    }
}

/// One bridge per `Session`: owns its codec state and its RTMP sink
/// exclusively.
pub struct MuxerBridge<S: RtmpSink> {
    video: Option<VideoEncoder>,
    audio: AacEncoder,
    queue: ReorderQueue,
    sink: S,
}

impl<S: RtmpSink> MuxerBridge<S> {
    pub fn new(sink: S) -> Self {
        MuxerBridge { video: None, audio: AacEncoder::new(), queue: ReorderQueue::new(), sink }
    }

    pub async fn connect(&mut self, url: &str) -> Result<()> {
        self.sink.connect(url).await
    }

    /// Feed one decoded PS pack. Aggregates every video message in the
    /// pack into one logical video message before encoding, muxes audio
    /// messages one-by-one, and drops private-stream messages.
    pub async fn on_ps_pack(&mut self, pack: &PackInfo, messages: Vec<PesMessage>) -> Result<()> {
        let mut video_payload = BytesMut::new();
        let mut video_dts: Option<u64> = None;

        for msg in &messages {
            if msg.stream_class == StreamClass::Video {
                if video_dts.is_none() {
                    video_dts = Some(msg.dts);
                }
                video_payload.extend_from_slice(&msg.payload);
            }
        }

        if !video_payload.is_empty() {
            let dts_ms = (video_dts.unwrap_or(0) / 90) as u32;
            let encoder = self.video_encoder_for(pack.video_stream_type)?;
            match encoder.encode(&video_payload, dts_ms) {
                Ok(tags) => tags.into_iter().for_each(|t| self.queue.push(t)),
                Err(Error::DropBeforeSpsPps) => warn!("dropping video frame before sequence header"),
                Err(e) => return Err(e),
            }
        }

        for msg in messages {
            match msg.stream_class {
                StreamClass::Audio => match self.audio.encode(&msg.payload, msg.dts) {
                    Ok(tags) => tags.into_iter().for_each(|t| self.queue.push(t)),
                    Err(e) => warn!(error = %e, "dropping malformed audio frame"),
                },
                StreamClass::Private => {}
                StreamClass::Video => {}
            }
        }

        self.drain_ready().await
    }

    async fn drain_ready(&mut self) -> Result<()> {
        while self.queue.ready() {
            let Some(tag) = self.queue.pop() else { break };
            self.sink.publish(&tag).await?;
        }
        Ok(())
    }

    fn video_encoder_for(&mut self, stream_type: Option<u8>) -> Result<&mut VideoEncoder> {
        if self.video.is_none() {
            let encoder = match stream_type {
                Some(VIDEO_STREAM_H265) => {
                    #[cfg(feature = "hevc")]
                    {
                        VideoEncoder::H265(H265Encoder::new())
                    }
                    #[cfg(not(feature = "hevc"))]
                    {
                        return Err(Error::HevcDisabled);
                    }
                }
                _ => VideoEncoder::H264(H264Encoder::new()),
            };
            self.video = Some(encoder);
        }
        Ok(self.video.as_mut().unwrap())
    }

    /// Discard codec state (cached SPS/PPS/VPS, AAC config) on RTMP
    /// error or bridge reset; the next sequence headers are re-emitted.
    pub fn reset(&mut self) {
        if let Some(v) = &mut self.video {
            v.reset();
        }
        self.audio.reset();
    }

    pub async fn close(&mut self) {
        self.sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use gb_ps::RtpInfo;

    fn video_msg(payload: &[u8], dts: u64) -> PesMessage {
        PesMessage {
            stream_class: StreamClass::Video,
            stream_id: 0xE0,
            dts,
            pts: dts,
            payload: bytes::BytesMut::from(payload),
            declared_len: Some(payload.len()),
            rtp: RtpInfo::default(),
        }
    }

    #[tokio::test]
    async fn drops_video_before_sequence_header_without_failing_pack() {
        let mut bridge = MuxerBridge::new(NullSink);
        let pack = PackInfo { video_stream_type: Some(0x1B), ..Default::default() };
        let idr = vec![0, 0, 0, 1, 0x65, 1, 2, 3];
        let result = bridge.on_ps_pack(&pack, vec![video_msg(&idr, 90_000)]).await;
        assert!(result.is_ok());
    }
}
