//! Startup, supervision and shutdown shared by both executables

use anyhow::Context;
use crossbeam_channel::Receiver;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bridge::{event_channel, Bridge, BridgeEvent, Role, Session, XrunAccountant};
use crate::config::{BridgeConfig, TransportKind};
use crate::engine::device::log_devices;
use crate::engine::{ActiveHost, CpalHost, LatencySource, PortFlow, ProcessHandler};
use crate::error::EngineError;
use crate::transport::{Endpoint, TcpTransport, Transport, TransportSet};

/// How often the main task drains the event queue
const EVENT_DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Run one bridge role until Ctrl-C or SIGTERM. Any setup failure exits 1.
pub async fn run(role: Role) -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(peer) = std::env::args().nth(1).and_then(|arg| arg.parse::<u32>().ok()) else {
        eprintln!("usage: {} <peer-domain-id>", binary_name(role));
        return ExitCode::from(1);
    };

    tracing::info!("Starting {} (peer domain {})", role.client_name(), peer);

    match run_bridge(role, peer).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn binary_name(role: Role) -> &'static str {
    match role {
        Role::Client => "bridge-client",
        Role::Server => "bridge-server",
    }
}

async fn run_bridge(role: Role, peer: u32) -> anyhow::Result<()> {
    let config = BridgeConfig::load().context("failed to load configuration")?;
    log_devices();

    let transports = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || open_transports(role, &config, peer))
            .await
            .context("transport setup task failed")??
    };
    tracing::info!("All channels connected");

    let mut host = CpalHost::open(&config.engine).context("failed to open audio engine")?;
    let session = Arc::new(Session::new(role, host.sample_rate(), host.period_frames()));
    let (events, event_rx) = event_channel(config.events.capacity);

    let max = config.engine.max_channels;
    let (play, record) = match role {
        Role::Client => (max, max),
        Role::Server => (
            max.min(host.physical_channels(PortFlow::Output)),
            max.min(host.physical_channels(PortFlow::Input)),
        ),
    };

    let mut bridge = Bridge::new(session.clone(), transports, max, events);
    bridge.open_ports(host.ports_mut(), play, record);
    for direction in [role.incoming(), role.outgoing()] {
        let bank = bridge.topology().bank(direction);
        if let Some(index) = bank.ports().iter().position(Option::is_none) {
            let name = role.port_name(direction, index);
            return Err(EngineError::PortRegistration(name.to_string()).into());
        }
    }
    tracing::info!("Registered {} playback and {} record ports", play, record);

    let latency: Arc<dyn LatencySource> = host.latency_source();
    let accountant = Arc::new(XrunAccountant::new(session.clone(), latency));
    let active = host
        .activate(bridge, accountant.clone())
        .context("failed to start audio engine")?;
    accountant.on_topology_changed();

    supervise(&session, &active, &event_rx, config.stats_interval_secs).await;

    session.begin_shutdown();
    active.shutdown();
    log_events(&event_rx);
    tracing::info!("Bridge stopped");
    Ok(())
}

/// Open control, playback and record the way `role` does
fn open_transports(
    role: Role,
    config: &BridgeConfig,
    peer: u32,
) -> anyhow::Result<TransportSet<Box<dyn Transport>>> {
    let transport = &config.transport;
    match transport.kind {
        TransportKind::Tcp => {
            let options = config.tcp_options();
            let set = match role.endpoint() {
                Endpoint::Connect => {
                    TcpTransport::connect_set(&transport.peer_host, transport.base_port, &options)
                }
                Endpoint::Listen => {
                    TcpTransport::listen_set(&transport.bind_host, transport.base_port, &options)
                }
            }
            .context("failed to open TCP channels")?;
            Ok(set.boxed())
        }
        TransportKind::Vchan => open_vchan(role, config, peer),
    }
}

#[cfg(feature = "vchan")]
fn open_vchan(
    role: Role,
    config: &BridgeConfig,
    peer: u32,
) -> anyhow::Result<TransportSet<Box<dyn Transport>>> {
    use crate::protocol::ChannelId;
    use crate::transport::vchan::{VchanRings, VchanTransport};

    let rings = &config.transport.vchan;
    let set = VchanTransport::open_set(role.endpoint(), peer, |channel| match channel {
        ChannelId::Playback => VchanRings {
            read_min: rings.playback_read_min,
            write_min: rings.playback_write_min,
        },
        ChannelId::Record => VchanRings {
            read_min: rings.record_read_min,
            write_min: rings.record_write_min,
        },
        ChannelId::Control => VchanRings {
            read_min: rings.control_read_min,
            write_min: rings.control_write_min,
        },
    })
    .with_context(|| format!("failed to open vchan to domain {}", peer))?;
    Ok(set.boxed())
}

#[cfg(not(feature = "vchan"))]
fn open_vchan(
    _role: Role,
    _config: &BridgeConfig,
    _peer: u32,
) -> anyhow::Result<TransportSet<Box<dyn Transport>>> {
    anyhow::bail!(crate::error::TransportError::Unsupported(
        "built without the `vchan` feature".to_string()
    ))
}

async fn supervise<H: ProcessHandler>(
    session: &Session,
    host: &ActiveHost<H>,
    events: &Receiver<BridgeEvent>,
    stats_interval_secs: u64,
) {
    let mut drain = tokio::time::interval(EVENT_DRAIN_INTERVAL);
    let mut stats = tokio::time::interval(Duration::from_secs(stats_interval_secs.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = drain.tick() => {
                log_events(events);
                while let Some(e) = host.check_errors() {
                    tracing::warn!("Engine stream error: {}", e);
                }
            }
            _ = stats.tick(), if stats_interval_secs > 0 => {
                let s = session.stats();
                tracing::info!(
                    "Bridge stats: {} periods ({} dropped), {} reconfigurations, {} underruns, latency {} ms, {}/{} channels{}",
                    s.periods,
                    s.dropped_periods,
                    s.rebuilds,
                    s.underrun_total,
                    s.latency_ms,
                    s.play_count,
                    s.record_count,
                    if s.paused { ", paused" } else { "" }
                );
            }
        }
    }
}

fn log_events(events: &Receiver<BridgeEvent>) {
    for event in events.try_iter() {
        if event.is_warning() {
            tracing::warn!("{}", event);
        } else {
            tracing::info!("{}", event);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown requested");
}
