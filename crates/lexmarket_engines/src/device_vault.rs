#![forbid(unsafe_code)]

//! Sealed on-disk copy of the session token.
//!
//! The token is encrypted with AES-256-GCM under a per-device master key that
//! lives in its own owner-only file. The record file never holds the token in
//! clear, and a record sealed under another key or format simply fails to open.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lexmarket_kernel_contracts::session::SessionToken;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const RECORD_FORMAT: u8 = 1;
const RECORD_AAD: &[u8] = b"lexmarket/session-token/v1";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("stored session token is not usable")]
    InvalidToken,
    #[error("vault record format {0} is not supported")]
    UnsupportedFormat(u8),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("vault cryptographic operation failed")]
    Crypto,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedRecord {
    format: u8,
    nonce: String,
    sealed_token: String,
    saved_at_ms: u64,
}

struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    fn load(path: &Path) -> Result<Option<Self>, VaultError> {
        if !path.exists() {
            return Ok(None);
        }
        let decoded = BASE64.decode(fs::read_to_string(path)?.trim().as_bytes())?;
        let bytes: [u8; KEY_LEN] = decoded.try_into().map_err(|_| VaultError::Crypto)?;
        Ok(Some(Self(bytes)))
    }

    fn load_or_create(path: &Path) -> Result<Self, VaultError> {
        if let Some(key) = Self::load(path)? {
            return Ok(key);
        }
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        create_owner_only(path, BASE64.encode(bytes).as_bytes())?;
        debug!(path = %path.display(), "device master key created");
        Ok(Self(bytes))
    }

    fn cipher(&self) -> Result<Aes256Gcm, VaultError> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|_| VaultError::Crypto)
    }
}

/// The device-local session token store used by the CLI.
#[derive(Debug, Clone)]
pub struct DeviceVault {
    record_path: PathBuf,
    key_path: PathBuf,
}

impl DeviceVault {
    /// `LEXMARKET_DEVICE_VAULT_PATH` if set, else the user config directory.
    pub fn default_local() -> Self {
        let record_path = env::var("LEXMARKET_DEVICE_VAULT_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(config_dir_record_path);
        let key_path = record_path.with_extension("key");
        Self::for_paths(record_path, key_path)
    }

    pub fn for_paths(record_path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            record_path,
            key_path,
        }
    }

    pub fn vault_path(&self) -> &Path {
        &self.record_path
    }

    pub fn store_token(&self, token: &SessionToken) -> Result<(), VaultError> {
        for dir in [self.record_path.parent(), self.key_path.parent()]
            .into_iter()
            .flatten()
        {
            fs::create_dir_all(dir)?;
        }
        let cipher = MasterKey::load_or_create(&self.key_path)?.cipher()?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: token.expose().as_bytes(),
                    aad: RECORD_AAD,
                },
            )
            .map_err(|_| VaultError::Crypto)?;

        let record = SealedRecord {
            format: RECORD_FORMAT,
            nonce: BASE64.encode(nonce),
            sealed_token: BASE64.encode(sealed),
            saved_at_ms: unix_ms(),
        };
        replace_file(&self.record_path, &serde_json::to_vec_pretty(&record)?)?;
        debug!(fingerprint = %token.fingerprint(), "session token sealed");
        Ok(())
    }

    /// `Ok(None)` when nothing is stored. A record without its master key is
    /// treated as absent.
    pub fn load_token(&self) -> Result<Option<SessionToken>, VaultError> {
        if !self.record_path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.record_path)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let record: SealedRecord = serde_json::from_str(&raw)?;
        if record.format != RECORD_FORMAT {
            return Err(VaultError::UnsupportedFormat(record.format));
        }
        let Some(key) = MasterKey::load(&self.key_path)? else {
            warn!(path = %self.key_path.display(), "session record present but master key missing");
            return Ok(None);
        };

        let nonce = BASE64.decode(record.nonce.as_bytes())?;
        if nonce.len() != NONCE_LEN {
            return Err(VaultError::Crypto);
        }
        let sealed = BASE64.decode(record.sealed_token.as_bytes())?;
        let opened = key
            .cipher()?
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &sealed,
                    aad: RECORD_AAD,
                },
            )
            .map_err(|_| VaultError::Crypto)?;
        let raw_token = String::from_utf8(opened).map_err(|_| VaultError::InvalidToken)?;
        SessionToken::new(raw_token)
            .map(Some)
            .map_err(|_| VaultError::InvalidToken)
    }

    /// Removes the sealed record. The master key stays for the next login.
    pub fn forget_token(&self) -> Result<bool, VaultError> {
        match fs::remove_file(&self.record_path) {
            Ok(()) => {
                debug!("session token record removed");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

fn config_dir_record_path() -> PathBuf {
    let base = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("lexmarket").join("session.sealed")
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn replace_file(path: &Path, data: &[u8]) -> Result<(), VaultError> {
    let staging = path.with_extension("staging");
    fs::write(&staging, data)?;
    fs::rename(&staging, path)?;
    Ok(())
}

fn create_owner_only(path: &Path, data: &[u8]) -> Result<(), VaultError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}
