// Nearmatch Linux: identity, LAN broadcast transport and session driver.

mod config;
mod driver;
mod identity_store;
mod transport;

use anyhow::Context;
use nearmatch_core::radar;
use nearmatch_core::MatchSession;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("nearmatch-linux {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let id_path = identity_store::FileIdentityStore::default_path()
        .context("neither XDG_CONFIG_HOME nor HOME is set")?;
    let store = identity_store::FileIdentityStore::new(id_path);
    tracing::debug!(path = %store.path().display(), "identity store");
    let self_id = nearmatch_core::load_or_create(&store)?;
    let session = MatchSession::new(self_id, cfg.profile(), cfg.session_config())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let transport = transport::LanTransport::bind(
            cfg.discovery_port,
            cfg.advertise_interval(),
            cfg.nominal_rssi,
        )?;
        let mut handle = driver::spawn(session, transport)?;
        let mut candidates = handle.candidates();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                res = &mut shutdown => {
                    res?;
                    break;
                }
                changed = candidates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    log_candidates(&candidates.borrow_and_update());
                }
                Some(notice) = handle.next_notice() => {
                    tracing::info!(?notice, "session notice");
                }
            }
        }
        tracing::info!("shutting down");
        handle.stop().await;
        Ok::<_, anyhow::Error>(())
    })?;
    Ok(())
}

fn log_candidates(list: &[nearmatch_core::Candidate]) {
    tracing::info!(count = list.len(), "nearby candidates updated");
    for c in list {
        let point = radar::placement(&c.id, c.smoothed_rssi);
        let distance_m = radar::estimate_distance_m(c.smoothed_rssi, radar::DEFAULT_TX_POWER);
        match serde_json::to_string(&(c, point)) {
            Ok(json) => tracing::info!(candidate = %json, distance_m),
            Err(e) => tracing::warn!(error = %e, "cannot serialize candidate"),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
