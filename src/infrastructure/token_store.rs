use crate::domain::models::AuthToken;
use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

pub trait TokenStore: Send + Sync {
    fn save_token(&self, token: &AuthToken) -> Result<(), InfraError>;
    fn load_token(&self) -> Result<Option<AuthToken>, InfraError>;
    fn delete_token(&self) -> Result<(), InfraError>;
}

/// Bearer token kept in the platform credential manager.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service_name: String,
    account_name: String,
}

impl KeyringTokenStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new("pomotask.auth", "default")
    }
}

impl TokenStore for KeyringTokenStore {
    fn save_token(&self, token: &AuthToken) -> Result<(), InfraError> {
        let payload =
            serde_json::to_string(token).map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_token(&self) -> Result<Option<AuthToken>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let token = serde_json::from_str::<AuthToken>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(token).filter(AuthToken::is_usable))
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    token: Mutex<Option<AuthToken>>,
}

impl TokenStore for InMemoryTokenStore {
    fn save_token(&self, token: &AuthToken) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(token.clone());
        Ok(())
    }

    fn load_token(&self) -> Result<Option<AuthToken>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone().filter(AuthToken::is_usable))
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
