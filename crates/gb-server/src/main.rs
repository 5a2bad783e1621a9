//! `gb-gateway`: wires the SIP and media listeners, the session registry,
//! and the periodic session tick together.

mod config;
mod error;
mod listener;
mod rtmp_sink;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gb_session::{Registry, SessionConfig};
use tracing_subscriber::EnvFilter;

use crate::config::GatewayConfig;
use crate::error::Result;

const TICK_PERIOD: Duration = Duration::from_millis(300);

#[derive(Parser, Debug)]
#[command(name = "gb-gateway", about = "GB28181 surveillance gateway")]
struct Cli {
    /// Path to the gateway's TOML configuration file.
    #[arg(short, long, default_value = "gb-gateway.toml")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let text = std::fs::read_to_string(&cli.config)?;
    let gateway_cfg = GatewayConfig::from_toml_str(&text)?;
    let candidate = gateway_cfg.resolve_candidate()?;

    let session_cfg = Arc::new(SessionConfig {
        candidate,
        sip_port: gateway_cfg.sip_port,
        media_port: gateway_cfg.media_port,
        sip_connecting_timeout: gateway_cfg.sip_connect_timeout(),
        reinvite_wait: gateway_cfg.reinvite_wait(),
        user_agent: gateway_cfg.user_agent.clone(),
        platform_id: gateway_cfg.platform_id.clone(),
        platform_host: gateway_cfg.platform_host.clone(),
        output_url_template: gateway_cfg.output_url_template.clone(),
    });

    let registry = Registry::new();

    let sip_task = tokio::spawn(listener::run_sip_listener(gateway_cfg.sip_port, Arc::clone(&registry), Arc::clone(&session_cfg)));
    let media_task = tokio::spawn(listener::run_media_listener(gateway_cfg.media_port, Arc::clone(&registry)));
    let ticker_task = tokio::spawn(listener::run_session_ticker(Arc::clone(&registry), Arc::clone(&session_cfg), TICK_PERIOD));

    tokio::select! {
        res = sip_task => { res.map_err(|e| error::Error::TaskFailed(e.to_string()))??; }
        res = media_task => { res.map_err(|e| error::Error::TaskFailed(e.to_string()))??; }
        _ = ticker_task => {}
    }

    Ok(())
}
