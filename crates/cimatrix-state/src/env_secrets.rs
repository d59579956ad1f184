//! Secret store backed by process environment variables.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::{Credentials, SecretStore, StorageResult};

/// Reads credentials from two environment variables on every call.
#[derive(Debug, Clone)]
pub struct EnvSecretStore {
    username_var: String,
    password_var: String,
}

impl EnvSecretStore {
    pub fn new(username_var: impl Into<String>, password_var: impl Into<String>) -> Self {
        Self {
            username_var: username_var.into(),
            password_var: password_var.into(),
        }
    }

    fn read(var: &str) -> StorageResult<String> {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(StorageError::SecretUnavailable(format!("{} is not set", var))),
        }
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn credentials(&self) -> StorageResult<Credentials> {
        let username = Self::read(&self.username_var)?;
        let password = Self::read(&self.password_var)?;
        Ok(Credentials::new(username, password))
    }
}
