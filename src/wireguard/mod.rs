//! Installs a derived pre-shared key (or a random poisoning key) into the
//! kernel WireGuard interface for a single, already-configured peer.

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use log::{error, info};

use crate::error::DaemonError;
use crate::kdf::random_psk;

#[async_trait]
pub trait WireGuardController: Send + Sync {
    /// Parses `peer_pub_b64` and `psk_b64`, and updates the existing peer on
    /// `iface` with the new pre-shared key. Never creates a new peer.
    async fn set_key(&self, iface: &str, peer_pub_b64: &str, psk_b64: &str)
        -> Result<(), DaemonError>;

    /// Generates a fresh random PSK and installs it, breaking the tunnel.
    async fn set_random_psk(&self, iface: &str, peer_pub_b64: &str) -> Result<(), DaemonError> {
        let psk = random_psk();
        error!("installing random fail-safe PSK on interface {iface}");
        self.set_key(iface, peer_pub_b64, &psk).await
    }
}

pub(crate) fn decode_key(label: &str, b64: &str) -> Result<[u8; 32], DaemonError> {
    let raw = Base64::decode_vec(b64)
        .map_err(|e| DaemonError::DecodeError(format!("{label} is not valid base64: {e}")))?;
    raw.try_into()
        .map_err(|_| DaemonError::DecodeError(format!("{label} is not 32 bytes")))
}

#[cfg(target_os = "linux")]
mod linux {
    use std::sync::Mutex;

    use wireguard_uapi::{DeviceInterface, WgSocket};

    use super::*;

    pub struct LinuxWireGuardController {
        socket: Mutex<WgSocket>,
    }

    impl LinuxWireGuardController {
        pub fn new() -> Result<Self, DaemonError> {
            let socket = WgSocket::connect()
                .map_err(|e| DaemonError::WireGuardError(format!("connect to control socket: {e}")))?;
            Ok(Self {
                socket: Mutex::new(socket),
            })
        }

        fn ensure_iface_exists(&self, iface: &str) -> Result<(), DaemonError> {
            let mut socket = self.socket.lock().unwrap();
            socket
                .get_device(DeviceInterface::from_name(iface.to_string()))
                .map_err(|_| DaemonError::IfaceMissing(iface.to_string()))?;
            Ok(())
        }
    }

    #[async_trait]
    impl WireGuardController for LinuxWireGuardController {
        async fn set_key(
            &self,
            iface: &str,
            peer_pub_b64: &str,
            psk_b64: &str,
        ) -> Result<(), DaemonError> {
            self.ensure_iface_exists(iface)?;
            let peer_pub = decode_key("peer public key", peer_pub_b64)?;
            let psk = decode_key("psk", psk_b64)?;

            let mut set_peer = wireguard_uapi::set::Peer::from_public_key(&peer_pub);
            set_peer.flags.push(wireguard_uapi::set::WgPeerF::UpdateOnly);
            set_peer.preshared_key = Some(&psk);
            let mut set_dev = wireguard_uapi::set::Device::from_ifname(iface);
            set_dev.peers.push(set_peer);

            info!("installing PSK on interface {iface}");
            self.socket
                .lock()
                .unwrap()
                .set_device(set_dev)
                .map_err(|e| DaemonError::WireGuardError(e.to_string()))
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::LinuxWireGuardController;

/// Non-Linux stub: kernel WireGuard is netlink-based and only available on
/// Linux. Keeping this controller around (rather than `cfg`-gating the whole
/// rotation engine) lets the rest of the daemon build and test on any host.
#[cfg(not(target_os = "linux"))]
pub struct LinuxWireGuardController;

#[cfg(not(target_os = "linux"))]
impl LinuxWireGuardController {
    pub fn new() -> Result<Self, DaemonError> {
        Ok(Self)
    }
}

#[cfg(not(target_os = "linux"))]
#[async_trait]
impl WireGuardController for LinuxWireGuardController {
    async fn set_key(
        &self,
        _iface: &str,
        _peer_pub_b64: &str,
        _psk_b64: &str,
    ) -> Result<(), DaemonError> {
        Err(DaemonError::WireGuardError(
            "kernel WireGuard control is only available on Linux".to_string(),
        ))
    }
}
