//! RTP fixed header decoding (RFC 3550 §5.1).
//!
//! Modeled on `rtp-core/src/packet.rs`, which parses the same twelve-byte
//! header with `bytes::Buf` plus `bitvec` for the
//! sub-byte flag fields. GB28181 devices never set the extension or CSRC
//! fields in practice, but we still skip over them correctly rather than
//! assuming they are absent.

use bitvec::prelude::*;
use bytes::Buf;

use crate::error::{Error, Result};

pub const RTP_VERSION: u8 = 2;
pub const RTP_MIN_HEADER_LEN: usize = 12;

/// A decoded RTP header, with `payload_offset` pointing at the first byte
/// of the payload within the original buffer.
#[derive(Debug, Clone, Copy)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload_offset: usize,
}

impl RtpHeader {
    /// Parse the fixed header (and skip any CSRC list / extension header)
    /// from `buf`. Returns [`Error::TruncatedRtp`] if `buf` is shorter
    /// than the header it declares.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTP_MIN_HEADER_LEN {
            return Err(Error::TruncatedRtp);
        }

        let byte0 = buf[0];
        let bits0 = byte0.view_bits::<Msb0>();
        let version = bits0[0..2].load::<u8>();
        let padding = bits0[2];
        let extension = bits0[3];
        let cc = bits0[4..8].load::<u8>();

        let byte1 = buf[1];
        let bits1 = byte1.view_bits::<Msb0>();
        let marker = bits1[0];
        let payload_type = bits1[1..8].load::<u8>();

        let mut cursor = &buf[2..];
        let sequence_number = cursor.get_u16();
        let timestamp = cursor.get_u32();
        let ssrc = cursor.get_u32();

        let mut offset = RTP_MIN_HEADER_LEN + 4 * cc as usize;
        if extension {
            if buf.len() < offset + 4 {
                return Err(Error::TruncatedRtp);
            }
            let ext_len_words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4 + 4 * ext_len_words;
        }
        if buf.len() < offset {
            return Err(Error::TruncatedRtp);
        }

        Ok(RtpHeader {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            payload_offset: offset,
        })
    }

    pub fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        let mut end = buf.len();
        if self.padding && end > self.payload_offset {
            let pad_len = buf[end - 1] as usize;
            if pad_len <= end - self.payload_offset {
                end -= pad_len;
            }
        }
        &buf[self.payload_offset..end]
    }
}

/// RTCP payload types occupy 192..=223 (SR/RR/SDES/BYE/APP); a gateway
/// that only expects RTP-over-TCP media still sees these on shared
/// connections and should discard them quietly rather than erroring.
pub fn looks_like_rtcp(payload_type: u8) -> bool {
    (192..=223).contains(&payload_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(pt: u8, seq: u16, ts: u32, ssrc: u32) -> Vec<u8> {
        let mut buf = vec![0x80, pt];
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&ssrc.to_be_bytes());
        buf
    }

    #[test]
    fn parses_minimal_header() {
        let mut buf = sample_header(96, 42, 90000, 0xdead_beef);
        buf.extend_from_slice(b"payload");
        let hdr = RtpHeader::parse(&buf).unwrap();
        assert_eq!(hdr.version, RTP_VERSION);
        assert!(!hdr.padding);
        assert!(!hdr.extension);
        assert_eq!(hdr.payload_type, 96);
        assert_eq!(hdr.sequence_number, 42);
        assert_eq!(hdr.timestamp, 90000);
        assert_eq!(hdr.ssrc, 0xdead_beef);
        assert_eq!(hdr.payload(&buf), b"payload");
    }

    #[test]
    fn rejects_truncated_header() {
        let buf = vec![0x80, 96, 0, 1];
        assert!(matches!(RtpHeader::parse(&buf), Err(Error::TruncatedRtp)));
    }

    #[test]
    fn classifies_rtcp_payload_types() {
        assert!(looks_like_rtcp(200));
        assert!(!looks_like_rtcp(96));
    }

    #[test]
    fn strips_padding() {
        let mut buf = sample_header(96, 1, 0, 1);
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&[0, 0, 3]); // 3 bytes of padding, last = count
        let mut header_with_padding = buf.clone();
        header_with_padding[0] = 0xA0; // set padding bit
        let hdr = RtpHeader::parse(&header_with_padding).unwrap();
        assert!(hdr.padding);
        assert_eq!(hdr.payload(&header_with_padding), b"data");
    }
}
