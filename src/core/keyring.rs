//! API key storage in the platform keyring.

use std::error::Error;
use std::fmt;

use keyring::Entry;

/// Keyring service under which every provider key is stored.
pub const KEYRING_SERVICE: &str = "segrelay";

/// A keyring failure, split by whether falling back to the environment is
/// reasonable.
///
/// `Recoverable` covers a locked or missing credential backend. Anything
/// else is `Permanent` and is reported to the caller as-is.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_recoverable() {
            write!(f, "keyring unavailable: {}", self.inner())
        } else {
            write!(f, "keyring error: {}", self.inner())
        }
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// Provider keys, one keyring entry per lowercased provider id.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, provider_id: &str) -> Result<Entry, KeyringAccessError> {
        Entry::new(&self.service, &provider_id.to_lowercase()).map_err(KeyringAccessError::from)
    }

    /// Read the stored key. A provider with no entry yields `Ok(None)`.
    pub fn read(&self, provider_id: &str) -> Result<Option<String>, KeyringAccessError> {
        match self.entry(provider_id)?.get_password() {
            Ok(key) => Ok(Some(key)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn write(&self, provider_id: &str, key: &str) -> Result<(), KeyringAccessError> {
        self.entry(provider_id)?
            .set_password(key)
            .map_err(KeyringAccessError::from)
    }

    /// Delete the stored key. Deleting a missing entry succeeds.
    pub fn delete(&self, provider_id: &str) -> Result<(), KeyringAccessError> {
        match self.entry(provider_id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
