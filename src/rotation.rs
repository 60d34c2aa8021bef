//! The master/backup dual rotation loop: the heart of the daemon.
//!
//! Every instance runs both roles concurrently. They coordinate only through
//! a capacity-1 skip signal: when the backup role handles a peer-initiated
//! rotation, it tells the master role to skip its next tick.

use std::path::Path;
use std::sync::Arc;

use base64ct::{Base64, Encoding};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Mode};
use crate::error::DaemonError;
use crate::kdf;
use crate::kms::KmsClient;
use crate::peer;
use crate::wireguard::WireGuardController;

/// Runs both the master and backup rotation loops until `shutdown` fires.
pub async fn run(
    cfg: Arc<Config>,
    kms: Arc<KmsClient>,
    controller: Arc<dyn WireGuardController>,
    shutdown: CancellationToken,
) {
    let (skip_tx, skip_rx) = mpsc::channel::<()>(1);
    let (key_id_tx, key_id_rx) = mpsc::channel::<String>(16);

    let server = tokio::spawn(peer::serve(
        cfg.listen_address.clone(),
        key_id_tx,
        shutdown.clone(),
    ));

    let backup = tokio::spawn(backup_loop(
        cfg.clone(),
        kms.clone(),
        controller.clone(),
        key_id_rx,
        skip_tx,
        shutdown.clone(),
    ));

    let master = tokio::spawn(master_loop(cfg, kms, controller, skip_rx, shutdown));

    let _ = tokio::join!(server, backup, master);
}

async fn master_loop(
    cfg: Arc<Config>,
    kms: Arc<KmsClient>,
    controller: Arc<dyn WireGuardController>,
    mut skip_rx: mpsc::Receiver<()>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("[MASTER] shutting down");
                return;
            }
            _ = ticker.tick() => {}
        }

        if skip_rx.try_recv().is_ok() {
            debug!("[MASTER] skipping tick, backup just rotated");
            continue;
        }

        info!("[MASTER] fetching fresh QKD key from {}", cfg.kms_url);
        match kms.get_new_key().await {
            Err(err) => {
                warn!("[MASTER] failed to fetch key from KMS: {err}");
                fail_safe(&cfg, controller.as_ref(), "MASTER").await;
                ticker.reset_after(cfg.kms_retry_interval);
            }
            Ok(key) => {
                info!(
                    "[MASTER] sending key_id {} to {}",
                    key.key_id, cfg.server_address
                );
                if let Err(err) = peer::send(&cfg.server_address, &key.key_id).await {
                    warn!("[MASTER] failed to send key_id to peer: {err}");
                }
                let _ = install_psk(&key.key, &cfg, controller.as_ref(), "MASTER").await;
            }
        }
    }
}

async fn backup_loop(
    cfg: Arc<Config>,
    kms: Arc<KmsClient>,
    controller: Arc<dyn WireGuardController>,
    mut key_ids: mpsc::Receiver<String>,
    skip_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
) {
    loop {
        let key_id = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("[BACKUP] shutting down");
                return;
            }
            received = key_ids.recv() => match received {
                Some(id) => id,
                None => {
                    warn!("[BACKUP] peer channel closed");
                    return;
                }
            },
        };

        info!("[BACKUP] received key_id {key_id}");
        let _ = skip_tx.try_send(());

        let qkd = match kms.get_key_by_id(&key_id).await {
            Ok(key) => key.key,
            Err(err) => {
                warn!("[BACKUP] failed to fetch key {key_id} from KMS: {err}");
                String::new()
            }
        };

        let _ = install_psk(&qkd, &cfg, controller.as_ref(), "BACKUP").await;
    }
}

/// Implements the mode-driven PSK computation and installation state machine
/// shared by both roles.
async fn install_psk(
    qkd: &str,
    cfg: &Config,
    controller: &dyn WireGuardController,
    role: &str,
) -> Result<(), DaemonError> {
    let mode = cfg.mode;

    let mut psk = if qkd.is_empty() {
        if mode.qkd_required() {
            warn!("[{role}] QKD key missing but required by mode {mode}");
            fail_safe(cfg, controller, role).await;
            return Err(DaemonError::KmsEmptyResponse);
        }
        warn!("[{role}] QKD key missing, proceeding since mode {mode} tolerates it");
        String::new()
    } else {
        qkd.to_string()
    };

    if let Some(pqc_path) = &cfg.pqc_psk_file {
        match read_pqc_line(pqc_path) {
            Err(err) => {
                if mode.pqc_required() {
                    warn!("[{role}] failed to read PQC key file: {err}");
                    fail_safe(cfg, controller, role).await;
                    return Err(DaemonError::PqcFileMissing(err.to_string()));
                }
                warn!("[{role}] failed to read PQC key file, proceeding without it: {err}");
            }
            Ok(pqc_line) => match Base64::decode_vec(&pqc_line) {
                Err(err) => {
                    if mode.pqc_required() {
                        warn!("[{role}] PQC key is not valid base64: {err}");
                        fail_safe(cfg, controller, role).await;
                        return Err(DaemonError::DecodeError(err.to_string()));
                    }
                    warn!("[{role}] PQC key is not valid base64, proceeding without it");
                }
                Ok(pqc_raw) => {
                    if !qkd.is_empty() && !pqc_raw.is_empty() {
                        match kdf::derive(qkd, &pqc_raw) {
                            Ok(derived) => psk = derived,
                            Err(err) => {
                                warn!("[{role}] KDF combination failed: {err}");
                                fail_safe(cfg, controller, role).await;
                                return Err(err);
                            }
                        }
                    } else if qkd.is_empty() && !pqc_raw.is_empty() {
                        psk = pqc_line;
                    }
                }
            },
        }
    }

    if psk.is_empty() {
        warn!("[{role}] no usable key material for this rotation");
        fail_safe(cfg, controller, role).await;
        return Err(DaemonError::KmsEmptyResponse);
    }

    info!("[{role}] installing derived PSK on {}", cfg.wireguard_interface);
    if let Err(err) = controller
        .set_key(&cfg.wireguard_interface, &cfg.wireguard_peer_public_key, &psk)
        .await
    {
        error!("[{role}] failed to install PSK: {err}");
        fail_safe(cfg, controller, role).await;
        return Err(err);
    }

    Ok(())
}

async fn fail_safe(cfg: &Config, controller: &dyn WireGuardController, role: &str) {
    error!("[{role}] key agreement failed, installing random fail-safe PSK");
    if let Err(err) = controller
        .set_random_psk(&cfg.wireguard_interface, &cfg.wireguard_peer_public_key)
        .await
    {
        error!("[{role}] failed to install fail-safe PSK: {err}");
    }
}

fn read_pqc_line(path: &Path) -> std::io::Result<String> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string())
}
