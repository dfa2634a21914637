//! crisscross-daemon: the CrissCrossDHT process.
//!
//! Single OS process running a Tokio runtime, one [`Dispatcher`] task per
//! configured cluster. No IPC surface — that, and the bootstrap/CLI glue
//! around it, are out of scope.

mod config;

use std::net::UdpSocket as StdUdpSocket;
use std::path::PathBuf;

use tokio::net::UdpSocket;
use tracing::{error, info, warn};

use crisscross_dht::bootstrap::{self, BootstrapConfig};
use crisscross_dht::dispatcher::Dispatcher;
use crisscross_dht::id;
use crisscross_storage::MemStorage;

use crate::config::ClusterConfigFile;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("crisscross=info".parse()?),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("crisscross.toml"));

    info!(path = %config_path.display(), "loading cluster configuration");
    let config = ClusterConfigFile::load(&config_path)?;
    let bootstrap_addrs = config.bootstrap_addrs()?;
    let clusters = config.resolve_clusters()?;

    if clusters.is_empty() {
        anyhow::bail!("no clusters configured in {}", config_path.display());
    }

    let mut handles = Vec::new();
    for resolved in clusters {
        let (self_raw_id, _) = id::gen_node_id();
        let std_socket = StdUdpSocket::bind(resolved.listen_addr)?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        let storage = MemStorage::new();

        let mut dispatcher =
            Dispatcher::new(self_raw_id, resolved.context, socket, storage).with_intervals(config.timers.to_intervals());

        let bootstrap_config = BootstrapConfig::new(bootstrap_addrs.clone());
        match bootstrap::bootstrap(&bootstrap_config, &mut dispatcher).await {
            Ok(result) => info!(
                responsive_seeds = result.responsive_seeds,
                peers_discovered = result.peers_discovered,
                listen_addr = %resolved.listen_addr,
                "cluster joined"
            ),
            Err(err) => warn!(error = %err, listen_addr = %resolved.listen_addr, "bootstrap did not converge, continuing unjoined"),
        }

        let listen_addr = resolved.listen_addr;
        handles.push(tokio::spawn(async move {
            if let Err(err) = dispatcher.run().await {
                error!(error = %err, %listen_addr, "dispatcher exited");
            }
        }));
    }

    info!(clusters = handles.len(), "crisscross-daemon running");
    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");

    for handle in handles {
        handle.abort();
    }

    Ok(())
}
