//! Hybrid QKD/PQC pre-shared key rotation daemon for WireGuard.
//!
//! See `SPEC_FULL.md` at the repository root for the full design. In short:
//! two daemon instances run symmetrically, each acting as both a master
//! (periodically fetches a fresh key from its local KMS and hands the
//! `key_ID` to its peer) and a backup (receives a `key_ID` from its peer and
//! fetches the matching key from its own KMS). Both combine the QKD key with
//! an optional PQC key via HKDF-SHA3-256 and install the result as the
//! WireGuard pre-shared key, falling back to a random PSK whenever agreement
//! cannot be reached.

pub mod config;
pub mod error;
pub mod kdf;
pub mod kms;
pub mod peer;
pub mod rotation;
pub mod wireguard;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use config::Config;
use kms::KmsClient;
use wireguard::{LinuxWireGuardController, WireGuardController};

pub struct Daemon {
    cfg: Arc<Config>,
    kms: Arc<KmsClient>,
    controller: Arc<dyn WireGuardController>,
}

impl Daemon {
    pub fn from_config(cfg: Config) -> Result<Self> {
        let kms = KmsClient::from_config(&cfg).context("failed to construct KMS client")?;
        let controller = LinuxWireGuardController::new()
            .context("failed to create WireGuard controller")?;

        Ok(Self {
            cfg: Arc::new(cfg),
            kms: Arc::new(kms),
            controller: Arc::new(controller),
        })
    }

    pub async fn run(self, shutdown: CancellationToken) {
        rotation::run(self.cfg, self.kms, self.controller, shutdown).await
    }
}

/// Installs a handler that cancels `token` on SIGINT or SIGTERM.
pub async fn wait_for_shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => log::info!("received SIGINT"),
            _ = sigterm.recv() => log::info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("received Ctrl-C");
    }

    token.cancel();
}
