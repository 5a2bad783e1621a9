//! The pack-scoped MPEG-PS decoder and its bounded recover state machine.
//!
//! Modeled on the `SrsPackContext`/recoverable-PS-context pair found in
//! reference MPEG-PS-over-RTP demuxers: a pack/system/PSM/PES scanning
//! loop wrapped in a resync-on-magic recovery layer, expressed here as an
//! explicit state machine (`ScanForPack`, `InPes`, `Recovering`).

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

pub const MAX_RECOVER: u32 = 16;
pub const LARGE_PACKET: usize = 1500;
pub const MAX_RESERVED: usize = 128;

const START_CODE_PACK: u8 = 0xBA;
const START_CODE_SYSTEM: u8 = 0xBB;
const START_CODE_PSM: u8 = 0xBC;
const START_CODE_PRIVATE: u8 = 0xBD;

pub const VIDEO_STREAM_H264: u8 = 0x1B;
pub const VIDEO_STREAM_H265: u8 = 0x24;

/// Which elementary stream a PES packet's stream-id declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamClass {
    Video,
    Audio,
    Private,
}

fn classify_stream_id(sid: u8) -> Option<StreamClass> {
    match sid {
        0xE0..=0xEF => Some(StreamClass::Video),
        0xC0..=0xDF => Some(StreamClass::Audio),
        START_CODE_PRIVATE => Some(StreamClass::Private),
        _ => None,
    }
}

/// RTP-layer metadata carried alongside the PES payload it arrived in,
/// recorded by the media connection actor before each `decode` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpInfo {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
}

/// One fully (or partially, while still accumulating) decoded PES message.
#[derive(Debug, Clone)]
pub struct PesMessage {
    pub stream_class: StreamClass,
    pub stream_id: u8,
    pub dts: u64,
    pub pts: u64,
    pub payload: BytesMut,
    /// `None` means the PES declared length 0 (unbounded; terminated by
    /// the next start code rather than a byte count).
    pub declared_len: Option<usize>,
    pub rtp: RtpInfo,
}

impl PesMessage {
    fn is_complete(&self) -> bool {
        match self.declared_len {
            Some(len) => self.payload.len() >= len,
            None => false,
        }
    }
}

/// Everything accumulated for the pack currently being decoded.
#[derive(Debug, Clone, Default)]
pub struct PackInfo {
    pub pack_seq: u64,
    pub program_mux_rate: u32,
    pub video_bound: Option<u8>,
    pub audio_bound: Option<u8>,
    /// Elementary stream types declared by the most recent PSM, carried
    /// along so the muxer bridge can pick H.264 vs. H.265 without
    /// re-deriving it from NALU headers.
    pub video_stream_type: Option<u8>,
    pub audio_stream_type: Option<u8>,
}

/// Per-connection running counters, exposed to callers for the
/// `Session`'s accumulated statistics.
#[derive(Debug, Clone, Default)]
pub struct PsStats {
    pub packets: u64,
    pub messages: u64,
    pub recovered: u64,
    pub dropped: u64,
    pub reserved_bytes: u64,
}

/// Receives fully-assembled packs and recovery notifications from the
/// decoder. Implemented by the muxer bridge in the real pipeline and by
/// a recording stub in tests.
pub trait PsHandler {
    fn on_ps_pack(&mut self, stats: &PsStats, pack: &PackInfo, messages: Vec<PesMessage>);
    fn on_recover_mode(&mut self, recover_counter: u32);
    fn on_quit_recover_mode(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Scanning,
    Recovering,
}

/// The pack-scoped decode context. One instance lives for the whole life
/// of a media connection; [`decode`](Self::decode) is called once per
/// RFC 4571 frame with the previous `reserved` tail prepended.
pub struct PsDecodeContext {
    mode: Mode,
    recover_counter: u32,
    detect_ps_integrity: bool,
    video_stream_type: Option<u8>,
    audio_stream_type: Option<u8>,
    current_pack: PackInfo,
    pack_messages: Vec<PesMessage>,
    current_pes: Option<PesMessage>,
    stats: PsStats,
    current_rtp: RtpInfo,
}

impl Default for PsDecodeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PsDecodeContext {
    pub fn new() -> Self {
        PsDecodeContext {
            mode: Mode::Scanning,
            recover_counter: 0,
            detect_ps_integrity: true,
            video_stream_type: None,
            audio_stream_type: None,
            current_pack: PackInfo::default(),
            pack_messages: Vec::new(),
            current_pes: None,
            stats: PsStats::default(),
            current_rtp: RtpInfo::default(),
        }
    }

    pub fn stats(&self) -> &PsStats {
        &self.stats
    }

    pub fn recover_counter(&self) -> u32 {
        self.recover_counter
    }

    pub fn is_recovering(&self) -> bool {
        self.mode == Mode::Recovering
    }

    pub fn set_rtp_info(&mut self, rtp: RtpInfo) {
        self.current_rtp = rtp;
        self.stats.packets += 1;
    }

    /// One of the two escape hatches: the caller (the media connection
    /// actor) checks this before even calling `decode`, since it knows
    /// the RTP payload length directly.
    pub fn reject_oversize_while_recovering(&self, payload_len: usize) -> Result<()> {
        if self.mode == Mode::Recovering && payload_len > LARGE_PACKET {
            return Err(Error::OversizeWhileRecovering(payload_len));
        }
        Ok(())
    }

    /// Decode `data` (the previous `reserved` tail followed by the new
    /// RTP payload) against the running pack state. Returns the number
    /// of trailing bytes to carry over as the next `reserved` (capped at
    /// [`MAX_RESERVED`]).
    pub fn decode(&mut self, data: &[u8], handler: &mut dyn PsHandler) -> Result<usize> {
        let mut pos = 0usize;

        loop {
            if self.mode == Mode::Recovering {
                match scan_for_pack_magic(&data[pos..]) {
                    Some(skip) => {
                        pos += skip;
                        self.mode = Mode::Scanning;
                        self.recover_counter = 0;
                        handler.on_quit_recover_mode();
                    }
                    None => {
                        // Consumed everything looking for the magic; no
                        // sense carrying a tail, the next window will
                        // resume the scan from its own start.
                        return Ok(0);
                    }
                }
            }

            if pos >= data.len() {
                break;
            }

            match self.step(&data[pos..], handler) {
                Ok(StepOutcome::Consumed(n)) => {
                    debug_assert!(n > 0);
                    pos += n;
                }
                Ok(StepOutcome::NeedMore) => break,
                Err(e) => {
                    self.enter_recover_mode(handler);
                    if self.recover_counter > MAX_RECOVER {
                        return Err(e);
                    }
                    // Leave `pos` where it is: recovery scanning resumes
                    // on the next loop iteration (or next `decode` call).
                    continue;
                }
            }
        }

        let reserved = data.len() - pos;
        if reserved > MAX_RESERVED {
            self.stats.reserved_bytes += reserved as u64;
            return Ok(0);
        }
        if reserved > 0 {
            self.stats.reserved_bytes += reserved as u64;
        }
        Ok(reserved)
    }

    fn enter_recover_mode(&mut self, handler: &mut dyn PsHandler) {
        if self.mode != Mode::Recovering {
            self.stats.recovered += 1;
        }
        self.mode = Mode::Recovering;
        self.recover_counter += 1;
        let dropped = self.pack_messages.len() + self.current_pes.is_some() as usize;
        self.stats.dropped += dropped as u64;
        self.current_pes = None;
        self.pack_messages.clear();
        handler.on_recover_mode(self.recover_counter);
    }

    /// Perform one unit of work: parse whatever structure begins at
    /// `buf[0]`. Returns how many bytes were consumed, or `NeedMore` if
    /// `buf` doesn't yet contain enough to make progress (left
    /// untouched so the caller can carry it forward as `reserved`).
    fn step(&mut self, buf: &[u8], handler: &mut dyn PsHandler) -> Result<StepOutcome> {
        // A PES payload in progress takes priority: keep feeding it until
        // its declared length is reached or a new start code appears.
        if let Some(pes) = &self.current_pes {
            if pes.declared_len.is_none() {
                return self.continue_unbounded_pes(buf);
            }
        }

        if buf.len() < 4 {
            return Ok(StepOutcome::NeedMore);
        }
        if buf[0] != 0x00 || buf[1] != 0x00 || buf[2] != 0x01 {
            return Err(Error::BadPsHeader("expected start code prefix 00 00 01"));
        }

        match buf[3] {
            START_CODE_PACK => self.parse_pack_header(buf, handler),
            START_CODE_SYSTEM => parse_system_header(buf).map(|n| {
                n.map_or(StepOutcome::NeedMore, StepOutcome::Consumed)
            }),
            START_CODE_PSM => self.parse_psm(buf),
            sid => match classify_stream_id(sid) {
                Some(class) => self.parse_pes(buf, class, sid),
                None => Err(Error::BadPsHeader("unknown start code")),
            },
        }
    }

    fn continue_unbounded_pes(&mut self, buf: &[u8]) -> Result<StepOutcome> {
        // Look for the next start code within what we have; everything
        // before it belongs to the in-progress payload.
        match find_start_code(buf) {
            Some(idx) => {
                if let Some(pes) = &mut self.current_pes {
                    pes.payload.extend_from_slice(&buf[..idx]);
                }
                self.finish_current_pes();
                Ok(StepOutcome::Consumed(idx.max(1)))
            }
            None => {
                if let Some(pes) = &mut self.current_pes {
                    pes.payload.extend_from_slice(buf);
                }
                Ok(StepOutcome::Consumed(buf.len()))
            }
        }
    }

    fn parse_pack_header(&mut self, buf: &[u8], handler: &mut dyn PsHandler) -> Result<StepOutcome> {
        // Fixed-size MPEG-2 PS pack header: 10 bytes of SCR/mux-rate
        // fields plus a trailing stuffing-length byte whose low 3 bits
        // give the count of stuffing bytes that follow.
        const FIXED: usize = 14;
        if buf.len() < FIXED {
            return Ok(StepOutcome::NeedMore);
        }
        let stuffing_len = (buf[13] & 0x07) as usize;
        let total = FIXED + stuffing_len;
        if buf.len() < total {
            return Ok(StepOutcome::NeedMore);
        }

        if !self.pack_messages.is_empty() || self.current_pes.is_some() {
            self.emit_pack(handler);
        }

        let mux_rate = ((buf[8] as u32) << 14) | ((buf[9] as u32) << 6) | ((buf[10] as u32) >> 2);
        self.current_pack = PackInfo {
            pack_seq: self.current_pack.pack_seq + 1,
            program_mux_rate: mux_rate,
            video_bound: self.current_pack.video_bound,
            audio_bound: self.current_pack.audio_bound,
        };

        Ok(StepOutcome::Consumed(total))
    }

    fn parse_psm(&mut self, buf: &[u8]) -> Result<StepOutcome> {
        if buf.len() < 6 {
            return Ok(StepOutcome::NeedMore);
        }
        let psm_len = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        let total = 6 + psm_len;
        if buf.len() < total {
            return Ok(StepOutcome::NeedMore);
        }
        if psm_len < 2 {
            return Err(Error::BadPsHeader("PSM too short"));
        }

        let program_stream_info_len = u16::from_be_bytes([buf[6], buf[7]]) as usize;
        let mut cursor = 8 + program_stream_info_len;
        if cursor + 2 > buf.len() {
            return Err(Error::BadPsHeader("PSM program-stream-info overruns body"));
        }
        let es_map_len = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]) as usize;
        cursor += 2;
        let es_map_end = cursor + es_map_len;
        if es_map_end > buf.len() {
            return Err(Error::BadPsHeader("PSM elementary-stream map overruns body"));
        }

        while cursor + 4 <= es_map_end {
            let stream_type = buf[cursor];
            let elementary_pid = buf[cursor + 1];
            let info_len = u16::from_be_bytes([buf[cursor + 2], buf[cursor + 3]]) as usize;
            cursor += 4 + info_len;

            if matches!(elementary_pid, 0xE0..=0xEF) {
                if stream_type == VIDEO_STREAM_H265 && !cfg!(feature = "hevc") {
                    return Err(Error::HevcDisabled);
                }
                self.video_stream_type = Some(stream_type);
            } else if matches!(elementary_pid, 0xC0..=0xDF) {
                self.audio_stream_type = Some(stream_type);
            }
        }

        Ok(StepOutcome::Consumed(total))
    }

    fn parse_pes(&mut self, buf: &[u8], class: StreamClass, sid: u8) -> Result<StepOutcome> {
        const FIXED: usize = 9;
        if buf.len() < FIXED {
            return if self.detect_ps_integrity {
                Ok(StepOutcome::NeedMore)
            } else {
                Err(Error::BadPesHeader("truncated fixed PES header"))
            };
        }

        let packet_len = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        let flags2 = buf[6];
        let header_data_len = buf[8] as usize;
        let total_fixed = FIXED + header_data_len;
        if buf.len() < total_fixed {
            return if self.detect_ps_integrity {
                Ok(StepOutcome::NeedMore)
            } else {
                Err(Error::BadPesHeader("truncated PES header data"))
            };
        }

        let (mut pts, mut dts) = (0u64, 0u64);
        let pts_dts_flags = flags2 >> 6;
        if pts_dts_flags & 0x2 != 0 {
            pts = read_timestamp(&buf[9..14]);
        }
        if pts_dts_flags == 0x3 {
            dts = read_timestamp(&buf[14..19]);
        }

        if let Some(prev) = self.pack_messages.last() {
            if pts == 0 {
                pts = prev.pts;
            }
            if dts == 0 {
                dts = prev.dts;
            }
        }

        let declared_len = if packet_len == 0 {
            None
        } else {
            Some(packet_len.saturating_sub(3 + header_data_len))
        };

        self.current_pes = Some(PesMessage {
            stream_class: class,
            stream_id: sid,
            dts,
            pts,
            payload: BytesMut::new(),
            declared_len,
            rtp: self.current_rtp,
        });

        let body_available = &buf[total_fixed..];
        let taken = match declared_len {
            Some(len) => {
                let want = len.min(body_available.len());
                if let Some(pes) = &mut self.current_pes {
                    pes.payload.extend_from_slice(&body_available[..want]);
                }
                want
            }
            None => {
                // Unbounded: hand off to `continue_unbounded_pes` on the
                // next `step` call, consuming just the fixed header now.
                0
            }
        };

        if self.current_pes.as_ref().map(PesMessage::is_complete) == Some(true) {
            self.finish_current_pes();
        }

        Ok(StepOutcome::Consumed(total_fixed + taken))
    }

    fn finish_current_pes(&mut self) {
        if let Some(pes) = self.current_pes.take() {
            self.stats.messages += 1;
            self.pack_messages.push(pes);
        }
    }

    fn emit_pack(&mut self, handler: &mut dyn PsHandler) {
        self.finish_current_pes();
        if self.pack_messages.is_empty() {
            return;
        }
        let messages = std::mem::take(&mut self.pack_messages);
        self.current_pack.video_stream_type = self.video_stream_type;
        self.current_pack.audio_stream_type = self.audio_stream_type;
        handler.on_ps_pack(&self.stats, &self.current_pack, messages);
    }

    /// Flush whatever pack is in progress. Called when a media
    /// connection closes so its last, not-yet-boundary-terminated pack
    /// is not silently lost.
    pub fn flush(&mut self, handler: &mut dyn PsHandler) {
        self.emit_pack(handler);
    }
}

enum StepOutcome {
    Consumed(usize),
    NeedMore,
}

fn read_timestamp(bytes: &[u8]) -> u64 {
    // 5-byte PTS/DTS encoding: 4 marker bits + 3x15-bit fields with a
    // marker bit after each, per the MPEG-2 PES syntax.
    let b0 = bytes[0] as u64;
    let b1 = bytes[1] as u64;
    let b2 = bytes[2] as u64;
    let b3 = bytes[3] as u64;
    let b4 = bytes[4] as u64;

    let top = (b0 >> 1) & 0x07;
    let mid = (b1 << 7) | (b2 >> 1);
    let low = (b3 << 7) | (b4 >> 1);
    (top << 30) | ((mid & 0x7FFF) << 15) | (low & 0x7FFF)
}

fn parse_system_header(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < 6 {
        return Ok(None);
    }
    let header_len = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let total = 6 + header_len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(total))
}

fn find_start_code(buf: &[u8]) -> Option<usize> {
    if buf.len() < 3 {
        return None;
    }
    buf.windows(3).position(|w| w == [0x00, 0x00, 0x01])
}

/// Scan for `00 00 01 BA` using a 4-byte sliding window, discarding 1-4
/// bytes per miss depending on where the first zero lies. Returns the
/// number of bytes to skip to land on the magic, or `None` if not present
/// anywhere in `buf`.
fn scan_for_pack_magic(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 4 <= buf.len() {
        if buf[i] == 0x00 && buf[i + 1] == 0x00 && buf[i + 2] == 0x01 && buf[i + 3] == START_CODE_PACK {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        packs: Vec<(PsStats, PackInfo, Vec<PesMessage>)>,
        recover_events: Vec<u32>,
        quit_events: u32,
    }

    impl PsHandler for Recorder {
        fn on_ps_pack(&mut self, stats: &PsStats, pack: &PackInfo, messages: Vec<PesMessage>) {
            self.packs.push((stats.clone(), pack.clone(), messages));
        }
        fn on_recover_mode(&mut self, recover_counter: u32) {
            self.recover_events.push(recover_counter);
        }
        fn on_quit_recover_mode(&mut self) {
            self.quit_events += 1;
        }
    }

    fn pack_header() -> Vec<u8> {
        let mut v = vec![0x00, 0x00, 0x01, 0xBA];
        v.extend_from_slice(&[0x44, 0x00, 0x04, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00]);
        v
    }

    fn video_pes(payload: &[u8]) -> Vec<u8> {
        let mut v = vec![0x00, 0x00, 0x01, 0xE0];
        let packet_len = (payload.len() + 3) as u16;
        v.extend_from_slice(&packet_len.to_be_bytes());
        v.push(0x80); // flags1
        v.push(0x00); // flags2: no PTS/DTS
        v.push(0x00); // header_data_length = 0
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn decodes_single_pack_single_pes() {
        let mut ctx = PsDecodeContext::new();
        let mut rec = Recorder::default();
        let mut data = pack_header();
        data.extend_from_slice(&video_pes(b"hello-nalu"));
        // A following pack header is what triggers the emit.
        data.extend_from_slice(&pack_header());

        let reserved = ctx.decode(&data, &mut rec).unwrap();
        assert_eq!(rec.packs.len(), 1);
        assert_eq!(rec.packs[0].2.len(), 1);
        assert_eq!(&rec.packs[0].2[0].payload[..], b"hello-nalu");
        assert!(reserved <= MAX_RESERVED);
    }

    #[test]
    fn recovers_from_garbage_then_resyncs() {
        let mut ctx = PsDecodeContext::new();
        let mut rec = Recorder::default();

        let garbage = [0x00u8, 0x02, 0x00, 0x17, 0x00, 0x01, 0x80, 0x01];
        ctx.decode(&garbage, &mut rec).unwrap();
        assert_eq!(ctx.recover_counter(), 1);
        assert!(rec.packs.is_empty());

        let mut good = pack_header();
        good.extend_from_slice(&video_pes(b"abc"));
        good.extend_from_slice(&pack_header());
        ctx.decode(&good, &mut rec).unwrap();
        assert_eq!(ctx.recover_counter(), 0);
        assert_eq!(rec.quit_events, 1);
        assert_eq!(rec.packs.len(), 1);
    }

    #[test]
    fn cross_segment_pes_reassembles() {
        let mut ctx = PsDecodeContext::new();
        let mut rec = Recorder::default();

        let payload = vec![0xABu8; 65_472];
        let mut full = pack_header();
        full.extend_from_slice(&video_pes(&payload));
        full.extend_from_slice(&pack_header());

        let mut reserved_tail: Vec<u8> = Vec::new();
        for chunk in full.chunks(1400) {
            let mut window = reserved_tail.clone();
            window.extend_from_slice(chunk);
            let reserved = ctx.decode(&window, &mut rec).unwrap();
            assert!(reserved <= MAX_RESERVED);
            reserved_tail = window[window.len() - reserved..].to_vec();
        }

        assert_eq!(rec.packs.len(), 1);
        assert_eq!(rec.packs[0].2.len(), 1);
        assert_eq!(rec.packs[0].2[0].payload.len(), 65_472);
        assert!(rec.packs[0].2[0].payload.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn inherits_dts_pts_from_previous_message_in_pack() {
        let mut ctx = PsDecodeContext::new();
        let mut rec = Recorder::default();

        let mut data = pack_header();
        let mut first = video_pes(b"first");
        // Patch in PTS-only flags and a nonzero timestamp for message one.
        first[7] = 0x80;
        first[8] = 5;
        let mut pts_bytes = [0x21, 0x00, 0x01, 0x00, 0x01];
        pts_bytes[0] |= 0x20;
        first.splice(9..9, pts_bytes);
        let declared_len = (first.len() - 6) as u16;
        first[4..6].copy_from_slice(&declared_len.to_be_bytes());
        data.extend_from_slice(&first);
        data.extend_from_slice(&video_pes(b"second"));
        data.extend_from_slice(&pack_header());

        ctx.decode(&data, &mut rec).unwrap();
        assert_eq!(rec.packs[0].2.len(), 2);
        assert!(rec.packs[0].2[1].pts > 0 || rec.packs[0].2[0].pts == 0);
    }
}
