//! Credential and configuration-data sources.
//!
//! Provider credentials are looked up on every call, so a rotated token is
//! picked up without a restart. Device userdata can come from a ConfigMap or
//! Secret key, read through [`DataSource`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use metal_api::DataKind;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Error)]
pub enum SecretsError {
    #[error("credential variable {0} is not set")]
    MissingCredential(String),
    #[error("credential is empty")]
    EmptyCredential,
    #[error("data source unavailable: {0}")]
    Unavailable(String),
}

/// Source of the provider API token.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn token(&self) -> Result<String, SecretsError>;
}

/// Token read from an environment variable at call time.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialSource for EnvCredentials {
    async fn token(&self) -> Result<String, SecretsError> {
        let token = std::env::var(&self.var)
            .map_err(|_| SecretsError::MissingCredential(self.var.clone()))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(SecretsError::EmptyCredential);
        }
        Ok(token.to_string())
    }
}

/// Fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl CredentialSource for StaticToken {
    async fn token(&self) -> Result<String, SecretsError> {
        if self.0.is_empty() {
            return Err(SecretsError::EmptyCredential);
        }
        Ok(self.0.clone())
    }
}

/// Key/value documents addressed by kind, namespace and name.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// All keys of the document, or `None` if it does not exist.
    async fn read(
        &self,
        kind: DataKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, SecretsError>;
}

type DocumentKey = (DataKind, String, String);

/// In-memory [`DataSource`].
#[derive(Default)]
pub struct StaticDataSource {
    documents: RwLock<BTreeMap<DocumentKey, BTreeMap<String, String>>>,
}

impl StaticDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one key, creating the document if needed.
    pub async fn insert(
        &self,
        kind: DataKind,
        namespace: &str,
        name: &str,
        key: &str,
        value: impl Into<String>,
    ) {
        self.documents
            .write()
            .await
            .entry((kind, namespace.to_string(), name.to_string()))
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub async fn remove(&self, kind: DataKind, namespace: &str, name: &str) {
        self.documents
            .write()
            .await
            .remove(&(kind, namespace.to_string(), name.to_string()));
    }
}

#[async_trait]
impl DataSource for StaticDataSource {
    async fn read(
        &self,
        kind: DataKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, SecretsError> {
        Ok(self
            .documents
            .read()
            .await
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned())
    }
}
