#![forbid(unsafe_code)]

use lexmarket_kernel_contracts::session::SessionToken;
use parking_lot::Mutex;

use crate::device_vault::{DeviceVault, VaultError};

/// Where the session token survives between runs.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionToken>, VaultError>;
    fn save(&self, token: &SessionToken) -> Result<(), VaultError>;
    fn clear(&self) -> Result<(), VaultError>;
}

impl TokenStore for DeviceVault {
    fn load(&self) -> Result<Option<SessionToken>, VaultError> {
        self.load_token()
    }

    fn save(&self, token: &SessionToken) -> Result<(), VaultError> {
        self.store_token(token)
    }

    fn clear(&self) -> Result<(), VaultError> {
        self.forget_token().map(|_| ())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<SessionToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: SessionToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<SessionToken>, VaultError> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, token: &SessionToken) -> Result<(), VaultError> {
        *self.token.lock() = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), VaultError> {
        *self.token.lock() = None;
        Ok(())
    }
}
