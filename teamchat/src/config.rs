//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::api::RetryPolicy;
use crate::channel::ReconnectPolicy;

/// Default backend origin.
pub const DEFAULT_BACKEND: &str = "http://localhost:5000";

const DATA_DIR: &str = "teamchat";

/// Everything the client needs to talk to one backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend origin, e.g. `http://localhost:5000`.
    pub backend_url: String,
    /// Directory for durable storage.
    pub data_dir: PathBuf,
    pub retry: RetryPolicy,
    pub reconnect: ReconnectPolicy,
    pub health_timeout: Duration,
    pub health_interval: Duration,
    pub connect_timeout: Duration,
    pub store: StoreConfig,
    /// Entries kept in the realtime backup log.
    pub socket_backup_limit: usize,
}

/// Limits applied by the session store.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Retention cap per session.
    pub max_messages: usize,
    /// Messages revealed by one `load_more_messages` call.
    pub page_size: usize,
    pub load_more_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_messages: 200,
            page_size: 50,
            load_more_delay: Duration::from_millis(300),
        }
    }
}

impl ClientConfig {
    /// Build a configuration for `backend_url`, storing data under `data_dir`.
    pub fn new(backend_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            data_dir: data_dir.into(),
            retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            health_timeout: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            store: StoreConfig::default(),
            socket_backup_limit: 50,
        }
    }

    /// The platform data directory for teamchat.
    pub fn default_data_dir() -> Result<PathBuf> {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .context("Could not find a data or home directory")?;
        Ok(base.join(DATA_DIR))
    }

    /// WebSocket URL of the realtime endpoint.
    pub fn socket_url(&self) -> String {
        let origin = if let Some(rest) = self.backend_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.backend_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.backend_url.clone()
        };
        format!("{origin}/socket.io/?EIO=4&transport=websocket")
    }
}
