//! The two TCP listeners: "SIP-TCP" accepts SIP connections and "GB-TCP"
//! accepts RTP-over-TCP media connections.
//! Each accepted connection starts out anonymous in the registry and is
//! bound to a `Session` once the SIP side sees a REGISTER, or the media
//! side sees its first RTP packet matching a known SSRC.

use std::sync::Arc;

use gb_ps::connection::MediaConnEvent;
use gb_sip::connection::SipConnEvent;
use gb_session::{PendingConn, Registry, Session, SessionConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub async fn run_sip_listener(port: u16, registry: Arc<Registry>, cfg: Arc<SessionConfig>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "SIP-TCP listener bound");
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "accepted SIP connection");
        let registry = Arc::clone(&registry);
        let cfg = Arc::clone(&cfg);
        tokio::spawn(async move {
            if let Err(e) = handle_sip_connection(stream, registry, cfg).await {
                warn!(%peer, error = %e, "SIP connection handler exited with error");
            }
        });
    }
}

pub async fn run_media_listener(port: u16, registry: Arc<Registry>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "GB-TCP listener bound");
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "accepted media connection");
        let registry = Arc::clone(&registry);
        tokio::spawn(handle_media_connection(stream, registry));
    }
}

async fn handle_sip_connection(
    stream: tokio::net::TcpStream,
    registry: Arc<Registry>,
    cfg: Arc<SessionConfig>,
) -> std::io::Result<()> {
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel::<SipConnEvent>();
    let handle = gb_sip::connection::spawn(stream, events_tx);
    let anon_id = registry.add_anonymous(PendingConn::Sip(handle));

    let mut bound: Option<Arc<Session>> = None;

    while let Some(event) = events_rx.recv().await {
        match event {
            SipConnEvent::Message(msg) => {
                let session = match &bound {
                    Some(s) => Arc::clone(s),
                    None => {
                        let device_id = msg.device_id().to_string();
                        let session = match registry.find_by_id(&device_id) {
                            Some(s) => s,
                            None => {
                                let s = Session::new(device_id.clone(), cfg.output_url_template.clone());
                                s.set_sink(Box::new(crate::rtmp_sink::TcpRtmpSink::new())).await;
                                registry.add_with_id(device_id.clone(), Arc::clone(&s));
                                let sink_session = Arc::clone(&s);
                                tokio::spawn(async move { sink_session.connect_sink().await });
                                s
                            }
                        };
                        if let Some(PendingConn::Sip(handle)) = registry.remove_anonymous(anon_id) {
                            session.attach_sip(handle).await;
                        }
                        bound = Some(Arc::clone(&session));
                        session
                    }
                };
                session.on_sip_message(*msg, &cfg).await;
            }
            SipConnEvent::ParseError(e) => warn!(error = %e, "dropping unparseable SIP message"),
            SipConnEvent::Closed => {
                registry.remove_anonymous(anon_id);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_media_connection(stream: tokio::net::TcpStream, registry: Arc<Registry>) {
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel::<MediaConnEvent>();
    let handle = gb_ps::connection::spawn(stream, events_tx);
    let anon_id = registry.add_anonymous(PendingConn::Media(handle));

    let mut bound: Option<Arc<Session>> = None;

    while let Some(event) = events_rx.recv().await {
        match event {
            MediaConnEvent::FirstSsrc(ssrc) => {
                match registry.find_by_fast_id(ssrc) {
                    Some(session) => {
                        if let Some(PendingConn::Media(handle)) = registry.remove_anonymous(anon_id) {
                            session.attach_media(handle).await;
                        }
                        bound = Some(session);
                    }
                    None => {
                        warn!(ssrc, "no session claims this SSRC, interrupting media connection");
                        if let Some(PendingConn::Media(handle)) = registry.remove_anonymous(anon_id) {
                            handle.interrupt();
                        }
                        break;
                    }
                }
            }
            MediaConnEvent::Pack { stats, pack, messages } => {
                if let Some(session) = &bound {
                    session.on_ps_pack(&stats, &pack, messages).await;
                }
            }
            MediaConnEvent::RecoverMode(counter) => {
                if let Some(session) = &bound {
                    session.on_recover_mode(counter).await;
                }
            }
            MediaConnEvent::Closed => {
                registry.remove_anonymous(anon_id);
                if let Some(session) = &bound {
                    session.on_media_lost().await;
                }
                break;
            }
        }
    }
}

/// Drive every live session's state-machine tick on a fixed interval,
/// tearing down and unregistering any session whose tick reports it
/// should terminate.
pub async fn run_session_ticker(registry: Arc<Registry>, cfg: Arc<SessionConfig>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        for session in registry.sessions_snapshot() {
            if session.tick(&registry, &cfg).await {
                info!(device_id = %session.device_id, "session terminated");
                session.shutdown().await;
                registry.remove_by_id(&session.device_id);
                if let Some(ssrc) = session.ssrc().await {
                    registry.remove_by_fast_id(ssrc);
                }
            }
        }
    }
}
