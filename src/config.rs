//! Immutable daemon configuration, loaded from environment variables.
//!
//! Required vs. defaulted lookups each carry explicit context on failure, in
//! the same style as a typical Go `config.Parse` function.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::error::DaemonError;

/// Policy for how strictly QKD and PQC key material are each required before
/// a rotation is allowed to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    QkdAndPqcRequired,
    AtLeastQkdRequired,
    AtLeastPqcRequired,
    EitherQkdOrPqcRequired,
}

impl Mode {
    pub fn qkd_required(self) -> bool {
        matches!(self, Mode::QkdAndPqcRequired | Mode::AtLeastQkdRequired)
    }

    pub fn pqc_required(self) -> bool {
        matches!(self, Mode::QkdAndPqcRequired | Mode::AtLeastPqcRequired)
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "QkdAndPqcRequired" => Ok(Mode::QkdAndPqcRequired),
            "AtLeastQkdRequired" => Ok(Mode::AtLeastQkdRequired),
            "AtLeastPqcRequired" => Ok(Mode::AtLeastPqcRequired),
            "EitherQkdOrPqcRequired" => Ok(Mode::EitherQkdOrPqcRequired),
            other => bail!(DaemonError::ConfigInvalid(format!(
                "unknown MODE {other:?}; expected one of QkdAndPqcRequired, \
                 AtLeastQkdRequired, AtLeastPqcRequired, EitherQkdOrPqcRequired"
            ))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::QkdAndPqcRequired => "QkdAndPqcRequired",
            Mode::AtLeastQkdRequired => "AtLeastQkdRequired",
            Mode::AtLeastPqcRequired => "AtLeastPqcRequired",
            Mode::EitherQkdOrPqcRequired => "EitherQkdOrPqcRequired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct TlsIdentity {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub ca_certificate: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_address: String,
    pub server_address: String,
    pub kms_url: String,
    pub wireguard_interface: String,
    pub wireguard_peer_public_key: String,
    pub tls_identity: Option<TlsIdentity>,
    pub kms_strict_tls: bool,
    pub kms_http_timeout: Duration,
    pub interval: Duration,
    pub kms_backoff_max_retries: u32,
    pub kms_backoff_base_delay: Duration,
    pub kms_retry_interval: Duration,
    pub pqc_psk_file: Option<PathBuf>,
    pub mode: Mode,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_address = require_env("LISTEN_ADDRESS")?;
        let server_address = require_env("SERVER_ADDRESS")?;
        let kms_url = require_env("KMS_URL")?;
        let wireguard_interface = require_env("WIREGUARD_INTERFACE")?;
        let wireguard_peer_public_key = require_env("WIREGUARD_PEER_PUBLIC_KEY")?;

        let certificate = env_or_default("CERTIFICATE", "");
        let private_key = env_or_default("PRIVATE_KEY", "");
        let ca_certificate = env_or_default("CA_CERTIFICATE", "");
        let tls_identity = match (certificate.as_str(), private_key.as_str(), ca_certificate.as_str()) {
            ("", "", "") => None,
            ("", _, _) | (_, "", _) | (_, _, "") => {
                bail!(DaemonError::ConfigInvalid(
                    "CERTIFICATE, PRIVATE_KEY and CA_CERTIFICATE must all be set or all be empty"
                        .to_string()
                ));
            }
            (cert, key, ca) => Some(TlsIdentity {
                certificate: PathBuf::from(cert),
                private_key: PathBuf::from(key),
                ca_certificate: PathBuf::from(ca),
            }),
        };

        let kms_strict_tls = match env_or_default("KMS_STRICT_TLS", "false").as_str() {
            "true" | "1" => true,
            "false" | "0" | "" => false,
            other => bail!(DaemonError::ConfigInvalid(format!(
                "invalid KMS_STRICT_TLS {other:?}; expected true/false"
            ))),
        };

        let kms_http_timeout = parse_duration_env("KMS_HTTP_TIMEOUT", Duration::from_secs(10))?;
        let interval = parse_duration_env("INTERVAL", Duration::from_secs(10))?;
        let kms_backoff_max_retries: u32 = env_or_default("KMS_BACKOFF_MAX_RETRIES", "5")
            .parse()
            .context("failed to parse KMS_BACKOFF_MAX_RETRIES as an integer")?;
        let kms_backoff_base_delay =
            parse_duration_env("KMS_BACKOFF_BASE_DELAY", Duration::from_millis(100))?;
        let kms_retry_interval = match std::env::var("KMS_RETRY_INTERVAL") {
            Ok(v) if !v.is_empty() => parse_duration(&v)
                .context("failed to parse KMS_RETRY_INTERVAL as a duration")?,
            _ => interval / 2,
        };

        let pqc_psk_file = match env_or_default("PQC_PSK_FILE", "") {
            s if s.is_empty() => None,
            s => Some(PathBuf::from(s)),
        };

        let mode_str = env_or_default("MODE", "QkdAndPqcRequired");
        let mode = Mode::parse(&mode_str)?;

        if mode.pqc_required() {
            match &pqc_psk_file {
                None => bail!(DaemonError::ConfigInvalid(format!(
                    "MODE {mode} requires PQC_PSK_FILE to be set"
                ))),
                Some(path) => {
                    if !path_exists(path) {
                        bail!(DaemonError::PqcFileMissing(path.display().to_string()));
                    }
                }
            }
        }

        Ok(Config {
            listen_address,
            server_address,
            kms_url,
            wireguard_interface,
            wireguard_peer_public_key,
            tls_identity,
            kms_strict_tls,
            kms_http_timeout,
            interval,
            kms_backoff_max_retries,
            kms_backoff_base_delay,
            kms_retry_interval,
            pqc_psk_file,
            mode,
        })
    }

    pub fn print_startup_summary(&self) {
        log::info!(
            "listen={} remote={} kms={} kms_strict_tls={} iface={} mode={} interval={:?} \
             kms_retry_interval={:?} kms_max_retries={} pqc={}",
            self.listen_address,
            self.server_address,
            self.kms_url,
            self.kms_strict_tls,
            self.wireguard_interface,
            self.mode,
            self.interval,
            self.kms_retry_interval,
            self.kms_backoff_max_retries,
            self.pqc_psk_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".to_string()),
        );
    }
}

fn path_exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

fn require_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => bail!(DaemonError::ConfigInvalid(format!(
            "missing required environment variable {key}"
        ))),
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_duration_env(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => {
            parse_duration(&v).with_context(|| format!("failed to parse {key} as a duration"))
        }
        _ => Ok(default),
    }
}

/// Parses a small subset of Go-style duration literals: an integer
/// immediately followed by one of `ns`, `us`, `ms`, `s`, `m`, `h`.
fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split_at = s
        .find(|c: char| !c.is_ascii_digit())
        .context("duration has no unit suffix")?;
    let (digits, unit) = s.split_at(split_at);
    let value: u64 = digits.parse().context("duration value is not an integer")?;
    let duration = match unit {
        "ns" => Duration::from_nanos(value),
        "us" => Duration::from_micros(value),
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        other => bail!("unrecognized duration unit {other:?}"),
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const REQUIRED: &[(&str, &str)] = &[
        ("LISTEN_ADDRESS", "0.0.0.0:5000"),
        ("SERVER_ADDRESS", "10.0.0.2:5000"),
        ("KMS_URL", "https://127.0.0.1:8443"),
        ("WIREGUARD_INTERFACE", "wg0"),
        (
            "WIREGUARD_PEER_PUBLIC_KEY",
            "H9adDtDHXhVzSI4QMScbftvQM49wGjmBT1g6dgynsHc=",
        ),
    ];

    const ALL_KNOWN: &[&str] = &[
        "LISTEN_ADDRESS",
        "SERVER_ADDRESS",
        "KMS_URL",
        "WIREGUARD_INTERFACE",
        "WIREGUARD_PEER_PUBLIC_KEY",
        "CERTIFICATE",
        "PRIVATE_KEY",
        "CA_CERTIFICATE",
        "KMS_STRICT_TLS",
        "KMS_HTTP_TIMEOUT",
        "INTERVAL",
        "KMS_BACKOFF_MAX_RETRIES",
        "KMS_BACKOFF_BASE_DELAY",
        "KMS_RETRY_INTERVAL",
        "PQC_PSK_FILE",
        "MODE",
    ];

    fn clear_env() {
        for key in ALL_KNOWN {
            std::env::remove_var(key);
        }
    }

    fn set_required() {
        for (k, v) in REQUIRED {
            std::env::set_var(k, v);
        }
    }

    #[test]
    fn missing_required_var_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_required();
        std::env::remove_var("KMS_URL");
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn happy_path_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_required();
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(10));
        assert_eq!(cfg.kms_retry_interval, Duration::from_secs(5));
        assert_eq!(cfg.kms_backoff_max_retries, 5);
        assert_eq!(cfg.kms_backoff_base_delay, Duration::from_millis(100));
        assert!(cfg.pqc_psk_file.is_none());
        assert_eq!(cfg.mode, Mode::QkdAndPqcRequired);
        assert!(!cfg.kms_strict_tls, "KMS TLS verification must be permissive by default");
    }

    #[test]
    fn strict_tls_opt_in() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_required();
        std::env::set_var("KMS_STRICT_TLS", "true");
        let cfg = Config::from_env().unwrap();
        assert!(cfg.kms_strict_tls);
    }

    #[test]
    fn invalid_mode_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_required();
        std::env::set_var("MODE", "NotAMode");
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn pqc_required_missing_file_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_required();
        std::env::set_var("MODE", "AtLeastPqcRequired");
        std::env::set_var("PQC_PSK_FILE", "/nonexistent/path/to/psk");
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn custom_interval_overrides_retry_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_required();
        std::env::set_var("INTERVAL", "20s");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(20));
        assert_eq!(cfg.kms_retry_interval, Duration::from_secs(10));
    }
}
