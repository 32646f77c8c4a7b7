//! roomrtc - joins a room and logs its session events until interrupted

mod args;

use args::Args;
use clap::Parser;
use log::{debug, error, info, warn};
use roomrtc_core::api::RegisterClientRequest;
use roomrtc_core::config::LoggingConfig;
use roomrtc_core::{Event, RoomClient};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let loaded = args.load_config();

    // Initialize logging with noise filtering for third-party WebRTC crates
    let log_filter = match &loaded {
        Ok(cfg) => cfg.logging.filter(args.verbose),
        Err(_) => LoggingConfig::default().filter(args.verbose),
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("ROOMRTC_LOG").unwrap_or(log_filter))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();

    info!("roomrtc v{}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    let client = RoomClient::new(config)?;
    let (_, mut events) = client.bus().channel();

    let registered = client
        .join(
            &args.room,
            RegisterClientRequest {
                name: args.name.clone(),
                ..Default::default()
            },
        )
        .await?;
    info!(
        "Registered as {} ({})",
        registered.client_id,
        if registered.name.is_empty() { "unnamed" } else { registered.name.as_str() }
    );

    let bandwidth = client.bandwidth();
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                match &event {
                    Event::StreamAvailable { stream } => info!(
                        "Stream available: {} ({} from {})",
                        stream.id, stream.source, stream.client_id
                    ),
                    Event::StreamRemoved { stream } => info!("Stream removed: {}", stream.id),
                    Event::PeerConnected => info!("Peer connected"),
                    Event::PeerDisconnected => warn!("Peer disconnected"),
                    Event::ChannelClosed { reason } if reason.is_terminal() => {
                        error!("Signaling channel closed: {}", reason);
                        break;
                    }
                    Event::MetadataChanged { key, data } => info!("Metadata {} = {}", key, data),
                    Event::InternalChannelAvailable => {
                        debug!("Bandwidth report: {:?}", bandwidth.report());
                    }
                    other => debug!("Event: {}", other.name()),
                }
            }
        }
    }

    if let Err(e) = client.leave(false).await {
        warn!("Failed to leave room: {}", e);
    }
    info!("Goodbye");
    Ok(())
}
