//! The per-TCP-connection SIP actor: a receive task that parses and
//! dispatches, a sender task draining a FIFO outgoing queue, and the
//! small bit of per-connection state (dialog state, cached REGISTER/
//! 200-OK, cached SSRC) that the owning [`Session`] snapshots across a
//! reconnect.
//!
//! Modeled on `dialog-core/src/manager/mod.rs`'s task-per-direction
//! transaction spawn: each connection is an actor with an owned inbox
//! channel and a cancellation token.
//!
//! [`Session`]: https://docs.rs/gb-session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dialog::DialogState;
use crate::message::Message;
use crate::parser;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection SIP-domain state, independent of the transport. The
/// owner (a `Session` in `gb-session`) copies this across a reconnect:
/// dialog state, SSRC, cached REGISTER, cached 200-OK all carry over to
/// the new SIP connection.
#[derive(Debug, Clone, Default)]
pub struct SipConnectionState {
    pub dialog: Option<DialogState>,
    pub last_register: Option<Message>,
    pub last_invite_ok: Option<Message>,
    pub ssrc_decimal: Option<String>,
    pub ssrc: Option<u32>,
}

impl SipConnectionState {
    pub fn dialog_or_init(&self) -> DialogState {
        self.dialog.unwrap_or(DialogState::Init)
    }
}

/// Events the connection actor reports to its owner.
#[derive(Debug)]
pub enum SipConnEvent {
    Message(Box<Message>),
    ParseError(String),
    Closed,
}

/// A handle the owner keeps. The receive/send tasks run independently
/// until [`SipConnectionHandle::interrupt`] is called or the socket
/// closes on its own.
pub struct SipConnectionHandle {
    pub id: u64,
    pub peer_addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

impl SipConnectionHandle {
    /// Enqueue an outgoing message. The policy is unbounded in-memory; the
    /// sender writes one message at a time and never reorders.
    pub fn send(&self, msg: Message) {
        let _ = self.outgoing.send(msg);
    }

    /// Wake the receiver and sender so they unwind. Any partially written
    /// message may be truncated; the far side will time out and reset.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Spawn the receive and send tasks for one accepted TCP connection.
/// `events_tx` carries every successfully parsed message (and terminal
/// parse failures / closure notifications) back to the owner.
pub fn spawn(stream: TcpStream, events_tx: mpsc::UnboundedSender<SipConnEvent>) -> SipConnectionHandle {
    let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let peer_addr = stream.peer_addr().unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());
    let (read_half, write_half) = stream.into_split();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    tokio::spawn(receive_loop(id, read_half, events_tx, cancel.clone()));
    tokio::spawn(send_loop(id, write_half, outgoing_rx, cancel.clone()));

    SipConnectionHandle { id, peer_addr, outgoing: outgoing_tx, cancel }
}

async fn receive_loop(
    id: u64,
    read_half: OwnedReadHalf,
    events_tx: mpsc::UnboundedSender<SipConnEvent>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(read_half);
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = read_one_message(&mut reader) => outcome,
        };

        match outcome {
            Ok(Some((start_line, headers, body))) => match parser::parse(&start_line, &headers, body) {
                Ok(msg) => {
                    if events_tx.send(SipConnEvent::Message(Box::new(msg))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // A malformed message is logged and dropped; the
                    // connection itself keeps running.
                    warn!(conn_id = id, error = %e, "dropping malformed SIP message");
                    let _ = events_tx.send(SipConnEvent::ParseError(e.to_string()));
                }
            },
            Ok(None) => {
                debug!(conn_id = id, "peer closed SIP connection");
                break;
            }
            Err(e) => {
                warn!(conn_id = id, error = %e, "SIP connection read error");
                break;
            }
        }
    }
    cancel.cancel();
    let _ = events_tx.send(SipConnEvent::Closed);
}

/// Read one CRLF-framed SIP message: a start line, header lines up to the
/// blank line, and a Content-Length-sized body. This is thin framing glue
/// over a generic HTTP-style byte tokenizer; [`crate::parser::parse`]
/// does the actual SIP-level work once the lines are in hand.
async fn read_one_message<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<(String, Vec<(String, String)>, String)>> {
    let mut start_line = String::new();
    loop {
        start_line.clear();
        if reader.read_line(&mut start_line).await? == 0 {
            return Ok(None);
        }
        let trimmed = start_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue; // tolerate keep-alive blank lines between messages
        }
        start_line = trimmed.to_string();
        break;
    }

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            let name = name.trim().to_string();
            let value = value.trim().to_string();
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((name, value));
        }
    }

    let mut body_bytes = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body_bytes).await?;
    }
    let body = String::from_utf8_lossy(&body_bytes).into_owned();
    Ok(Some((start_line, headers, body)))
}

async fn send_loop(
    id: u64,
    mut write_half: OwnedWriteHalf,
    mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe_msg = outgoing_rx.recv() => {
                let Some(msg) = maybe_msg else { break };
                let wire = parser::serialize(&msg);
                if let Err(e) = write_half.write_all(wire.as_bytes()).await {
                    warn!(conn_id = id, error = %e, "SIP send error");
                    break;
                }
            }
        }
    }
}
