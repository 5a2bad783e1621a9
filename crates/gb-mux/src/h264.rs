//! Annex-B H.264 to FLV AVC packaging.

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::annexb::split_nalus;
use crate::error::{Error, Result};
use crate::flv::{video_tag, AvcPacketType, FlvTag, FrameType, VideoCodec};

const NALU_SEI: u8 = 6;
const NALU_AUD: u8 = 9;
const NALU_IDR: u8 = 5;
const NALU_NON_IDR: u8 = 1;
const NALU_SPS: u8 = 7;
const NALU_PPS: u8 = 8;

/// Per-session encoder state: cached SPS/PPS and whether a sequence
/// header has been emitted yet. One instance per `Session`.
pub struct H264Encoder {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    sps_changed: bool,
    pps_changed: bool,
    header_emitted: bool,
}

impl Default for H264Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Encoder {
    pub fn new() -> Self {
        H264Encoder { sps: None, pps: None, sps_changed: false, pps_changed: false, header_emitted: false }
    }

    /// Discard cached parameter sets and the emitted flag. Called on
    /// RTMP error / bridge reset so sequence headers are re-emitted.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Encode one aggregated video message (the concatenation of every
    /// video PES payload in a pack) into zero or more FLV tags.
    pub fn encode(&mut self, payload: &[u8], dts_ms: u32) -> Result<Vec<FlvTag>> {
        let mut tags = Vec::new();
        let mut vcl: Vec<&[u8]> = Vec::new();
        let mut saw_idr = false;

        for nalu in split_nalus(payload) {
            if nalu.is_empty() {
                continue;
            }
            match nalu[0] & 0x1F {
                NALU_SEI | NALU_AUD => continue,
                NALU_SPS => {
                    if self.sps.as_deref() != Some(nalu) {
                        self.sps = Some(nalu.to_vec());
                        self.sps_changed = true;
                    }
                }
                NALU_PPS => {
                    if self.pps.as_deref() != Some(nalu) {
                        self.pps = Some(nalu.to_vec());
                        self.pps_changed = true;
                    }
                }
                NALU_IDR => {
                    saw_idr = true;
                    vcl.push(nalu);
                }
                NALU_NON_IDR => vcl.push(nalu),
                other => warn!(nalu_type = other, "dropping unsupported H.264 NALU type"),
            }
        }

        if self.sps_changed && self.pps_changed {
            if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                let record = build_avc_decoder_config(sps, pps);
                tags.push(video_tag(VideoCodec::Avc, FrameType::Key, AvcPacketType::SequenceHeader, 0, dts_ms, &record));
                self.header_emitted = true;
                self.sps_changed = false;
                self.pps_changed = false;
            }
        }

        if !vcl.is_empty() {
            if !self.header_emitted {
                return Err(Error::DropBeforeSpsPps);
            }
            let body = nalus_to_avcc(&vcl);
            let frame_type = if saw_idr { FrameType::Key } else { FrameType::Inter };
            tags.push(video_tag(VideoCodec::Avc, frame_type, AvcPacketType::Nalu, 0, dts_ms, &body));
        }

        Ok(tags)
    }
}

fn nalus_to_avcc(nalus: &[&[u8]]) -> BytesMut {
    let total: usize = nalus.iter().map(|n| 4 + n.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for nalu in nalus {
        buf.put_u32(nalu.len() as u32);
        buf.put_slice(nalu);
    }
    buf
}

/// Build an AVCDecoderConfigurationRecord (ISO/IEC 14496-15 §5.2.4.1)
/// with exactly one SPS and one PPS, 4-byte NALU length fields.
fn build_avc_decoder_config(sps: &[u8], pps: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
    buf.put_u8(1); // configurationVersion
    buf.put_u8(sps.get(1).copied().unwrap_or(0)); // AVCProfileIndication
    buf.put_u8(sps.get(2).copied().unwrap_or(0)); // profile_compatibility
    buf.put_u8(sps.get(3).copied().unwrap_or(0)); // AVCLevelIndication
    buf.put_u8(0xFC | 0x03); // reserved(6) + lengthSizeMinusOne=3 (4-byte lengths)
    buf.put_u8(0xE0 | 0x01); // reserved(3) + numOfSequenceParameterSets=1
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);
    buf.put_u8(1); // numOfPictureParameterSets
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annexb(nalus: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for n in nalus {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(n);
        }
        out
    }

    #[test]
    fn drops_frame_before_sequence_header() {
        let mut enc = H264Encoder::new();
        let data = annexb(&[&[0x65, 1, 2, 3]]); // IDR, no SPS/PPS yet
        let err = enc.encode(&data, 0).unwrap_err();
        assert_eq!(err, Error::DropBeforeSpsPps);
    }

    #[test]
    fn emits_sequence_header_then_keyframe() {
        let mut enc = H264Encoder::new();
        let sps = [0x67, 0x42, 0x00, 0x1F, 0xAA];
        let pps = [0x68, 0xCE, 0x3C, 0x80];
        let idr = [0x65, 1, 2, 3];
        let data = annexb(&[&sps, &pps, &idr]);
        let tags = enc.encode(&data, 1000).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].dts_ms, 1000);
    }

    #[test]
    fn skips_sei_and_aud() {
        let mut enc = H264Encoder::new();
        let sps = [0x67, 0x42, 0x00, 0x1F];
        let pps = [0x68, 0xCE, 0x3C, 0x80];
        let sei = [0x06, 0xFF];
        let aud = [0x09, 0xF0];
        let idr = [0x65, 1, 2];
        let data = annexb(&[&sps, &pps, &sei, &aud, &idr]);
        let tags = enc.encode(&data, 0).unwrap();
        assert_eq!(tags.len(), 2);
    }
}
