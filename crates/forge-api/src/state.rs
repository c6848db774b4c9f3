//! Application state.

use std::sync::Arc;

use forge_broker::ProgressBroker;

use crate::auth::{CredentialVerifier, JwtVerifier};
use crate::config::ApiConfig;
use crate::jobs::{JobDirectory, RedisJobDirectory};
use crate::sessions::SessionRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub broker: Arc<ProgressBroker>,
    pub jobs: Arc<dyn JobDirectory>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Create new application state from the environment.
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let broker = ProgressBroker::from_env()?;
        let jobs = RedisJobDirectory::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
        let verifier = JwtVerifier::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

        Ok(Self {
            config,
            broker: Arc::new(broker),
            jobs: Arc::new(jobs),
            verifier: Arc::new(verifier),
            sessions: SessionRegistry::new(),
        })
    }
}
