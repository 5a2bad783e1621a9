//! ADTS AAC to FLV AAC packaging. Timestamps arrive as 90 kHz PS DTS
//! ticks and are converted to milliseconds here.

use crate::error::{Error, Result};
use crate::flv::{audio_tag, AacPacketType, FlvTag};

struct AdtsHeader {
    profile: u8,
    sampling_freq_index: u8,
    channel_config: u8,
    header_len: usize,
    frame_len: usize,
}

fn parse_adts_header(frame: &[u8]) -> Result<AdtsHeader> {
    if frame.len() < 7 || frame[0] != 0xFF || (frame[1] & 0xF0) != 0xF0 {
        return Err(Error::BadAdtsHeader);
    }
    let protection_absent = frame[1] & 0x01;
    let profile = (frame[2] >> 6) & 0x03;
    let sampling_freq_index = (frame[2] >> 2) & 0x0F;
    let channel_config = ((frame[2] & 0x01) << 2) | ((frame[3] >> 6) & 0x03);
    let frame_len = (((frame[3] & 0x03) as usize) << 11) | ((frame[4] as usize) << 3) | ((frame[5] as usize) >> 5);
    let header_len = if protection_absent == 1 { 7 } else { 9 };
    if frame_len < header_len || frame.len() < frame_len {
        return Err(Error::BadAdtsHeader);
    }
    Ok(AdtsHeader { profile, sampling_freq_index, channel_config, header_len, frame_len })
}

/// Builds the 2-byte MPEG-4 AudioSpecificConfig implied by an ADTS
/// fixed header (ISO/IEC 14496-3 §1.6.2.1), the common no-SBR/no-PS case.
fn build_audio_specific_config(hdr: &AdtsHeader) -> [u8; 2] {
    let audio_object_type = hdr.profile + 1;
    let b0 = (audio_object_type << 3) | (hdr.sampling_freq_index >> 1);
    let b1 = ((hdr.sampling_freq_index & 0x01) << 7) | (hdr.channel_config << 3);
    [b0, b1]
}

/// Converts a 90 kHz PS timestamp to milliseconds.
pub fn pts_90khz_to_ms(ts: u64) -> u32 {
    (ts / 90) as u32
}

pub struct AacEncoder {
    header_emitted: bool,
}

impl Default for AacEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AacEncoder {
    pub fn new() -> Self {
        AacEncoder { header_emitted: false }
    }

    pub fn reset(&mut self) {
        self.header_emitted = false;
    }

    /// Encode every ADTS frame packed into one PES payload into FLV audio
    /// tags. `dts_90khz` is the PS DTS in 90 kHz ticks, shared by every
    /// frame in the payload since GB28181 devices don't timestamp them
    /// individually. The sequence header is emitted only once, before the
    /// first frame this encoder has ever seen.
    pub fn encode(&mut self, payload: &[u8], dts_90khz: u64) -> Result<Vec<FlvTag>> {
        let dts_ms = pts_90khz_to_ms(dts_90khz);
        let mut tags = Vec::new();
        let mut offset = 0;

        while offset < payload.len() {
            let hdr = parse_adts_header(&payload[offset..])?;

            if !self.header_emitted {
                let config = build_audio_specific_config(&hdr);
                tags.push(audio_tag(AacPacketType::SequenceHeader, dts_ms, &config));
                self.header_emitted = true;
            }

            let raw = &payload[offset + hdr.header_len..offset + hdr.frame_len];
            tags.push(audio_tag(AacPacketType::Raw, dts_ms, raw));
            offset += hdr.frame_len;
        }

        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adts_frame(profile: u8, sfi: u8, channels: u8, payload: &[u8]) -> Vec<u8> {
        let frame_len = 7 + payload.len();
        let mut buf = vec![0u8; 7];
        buf[0] = 0xFF;
        buf[1] = 0xF1; // MPEG-4, no CRC
        buf[2] = (profile << 6) | (sfi << 2) | (channels >> 2);
        buf[3] = ((channels & 0x03) << 6) | (((frame_len >> 11) & 0x03) as u8);
        buf[4] = ((frame_len >> 3) & 0xFF) as u8;
        buf[5] = (((frame_len & 0x07) << 5) as u8) | 0x1F;
        buf[6] = 0xFC;
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn emits_sequence_header_once() {
        let mut enc = AacEncoder::new();
        let frame = adts_frame(1, 4, 2, b"audio-frame-one");
        let tags = enc.encode(&frame, 90_000).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].dts_ms, 1000);

        let frame2 = adts_frame(1, 4, 2, b"audio-frame-two");
        let tags2 = enc.encode(&frame2, 180_000).unwrap();
        assert_eq!(tags2.len(), 1);
        assert_eq!(tags2[0].dts_ms, 2000);
    }

    #[test]
    fn muxes_every_adts_frame_packed_into_one_payload() {
        let mut enc = AacEncoder::new();
        let mut payload = adts_frame(1, 4, 2, b"frame-one");
        payload.extend(adts_frame(1, 4, 2, b"frame-two"));
        payload.extend(adts_frame(1, 4, 2, b"frame-three"));

        let tags = enc.encode(&payload, 90_000).unwrap();
        // One sequence header plus one raw tag per ADTS frame present.
        assert_eq!(tags.len(), 4);
        assert_eq!(&tags[1].payload[2..], &b"frame-one"[..]);
        assert_eq!(&tags[2].payload[2..], &b"frame-two"[..]);
        assert_eq!(&tags[3].payload[2..], &b"frame-three"[..]);
    }

    #[test]
    fn rejects_bad_sync_word() {
        let mut enc = AacEncoder::new();
        let bad = vec![0x00u8; 10];
        assert_eq!(enc.encode(&bad, 0).unwrap_err(), Error::BadAdtsHeader);
    }
}
