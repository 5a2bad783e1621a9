//! The media connection actor: a single receive task per accepted TCP
//! connection that frames RFC 4571 packets, decodes RTP, feeds the PS
//! decoder, and reports packs/recovery/SSRC events to its owner over a
//! channel.
//!
//! Binding a connection to a `Session` by SSRC is deliberately left to
//! the owner: this actor reports the SSRC the first
//! time it sees a valid RTP packet via [`MediaConnEvent::FirstSsrc`] and
//! otherwise keeps decoding. If the owner finds no session claims that
//! SSRC, it calls [`MediaConnectionHandle::interrupt`] to tear the
//! connection down, mirroring the policy/mechanism split already used in
//! `gb-sip::connection`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::framing;
use crate::ps::{PackInfo, PesMessage, PsDecodeContext, PsHandler, PsStats};
use crate::rtp::{looks_like_rtcp, RtpHeader};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub enum MediaConnEvent {
    FirstSsrc(u32),
    Pack { stats: PsStats, pack: PackInfo, messages: Vec<PesMessage> },
    RecoverMode(u32),
    Closed,
}

struct ChannelHandler<'a> {
    tx: &'a mpsc::UnboundedSender<MediaConnEvent>,
}

impl PsHandler for ChannelHandler<'_> {
    fn on_ps_pack(&mut self, stats: &PsStats, pack: &PackInfo, messages: Vec<PesMessage>) {
        let _ = self.tx.send(MediaConnEvent::Pack { stats: stats.clone(), pack: pack.clone(), messages });
    }

    fn on_recover_mode(&mut self, recover_counter: u32) {
        let _ = self.tx.send(MediaConnEvent::RecoverMode(recover_counter));
    }
}

pub struct MediaConnectionHandle {
    pub id: u64,
    pub peer_addr: SocketAddr,
    cancel: CancellationToken,
}

impl MediaConnectionHandle {
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub fn spawn(stream: TcpStream, events_tx: mpsc::UnboundedSender<MediaConnEvent>) -> MediaConnectionHandle {
    let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let peer_addr = stream.peer_addr().unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());
    let cancel = CancellationToken::new();

    tokio::spawn(receive_loop(id, stream, events_tx, cancel.clone()));

    MediaConnectionHandle { id, peer_addr, cancel }
}

async fn receive_loop(
    id: u64,
    mut stream: TcpStream,
    events_tx: mpsc::UnboundedSender<MediaConnEvent>,
    cancel: CancellationToken,
) {
    let mut ctx = PsDecodeContext::new();
    let mut reserved: Vec<u8> = Vec::new();
    let mut ssrc_known = false;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = framing::read_frame(&mut stream) => frame,
        };

        let payload = match frame {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!(conn_id = id, "media connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(conn_id = id, error = %e, "media connection read error");
                break;
            }
        };

        if framing::is_oversize(payload.len()) {
            if ctx.is_recovering() {
                warn!(conn_id = id, len = payload.len(), "oversize packet while recovering, giving up");
                break;
            }
            warn!(conn_id = id, len = payload.len(), "oversize packet outside recover mode, continuing");
        }

        let hdr = match RtpHeader::parse(&payload) {
            Ok(h) => h,
            Err(e) => {
                warn!(conn_id = id, error = %e, "truncated RTP header, dropping packet");
                continue;
            }
        };

        if looks_like_rtcp(hdr.payload_type) {
            continue;
        }

        if !ssrc_known {
            ssrc_known = true;
            if events_tx.send(MediaConnEvent::FirstSsrc(hdr.ssrc)).is_err() {
                break;
            }
        }

        ctx.set_rtp_info(crate::ps::RtpInfo {
            sequence_number: hdr.sequence_number,
            timestamp: hdr.timestamp,
            payload_type: hdr.payload_type,
        });

        let mut window = std::mem::take(&mut reserved);
        window.extend_from_slice(hdr.payload(&payload));

        let mut handler = ChannelHandler { tx: &events_tx };
        match ctx.decode(&window, &mut handler) {
            Ok(tail_len) => {
                reserved = window[window.len() - tail_len..].to_vec();
            }
            Err(e) => {
                warn!(conn_id = id, error = %e, "PS decoder gave up, tearing down media connection");
                break;
            }
        }
    }

    let mut handler = ChannelHandler { tx: &events_tx };
    ctx.flush(&mut handler);
    cancel.cancel();
    let _ = events_tx.send(MediaConnEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtcp_payload_types_are_filtered_before_decode() {
        assert!(looks_like_rtcp(200));
        assert!(!looks_like_rtcp(96));
    }
}
