//! # Backend Module
//!
//! Contains all non-UI logic of the cattle tracker.
//!
//! ## Architecture
//!
//! ```text
//! Front end (CLI, desktop shell)
//!     ↓
//! Domain Layer (herd store, breeding engine, backups, protocols)
//!     ↓
//! Storage Layer (local key-value store | remote API)
//! ```
//!
//! [`initialize_backend`] picks the persistence backend once, from the
//! configuration, wires the services together and loads the active object.
//! Everything a front end needs is reachable from the returned
//! [`AppContext`].

pub mod domain;
pub mod storage;

use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

use crate::config::AppConfig;
use domain::{BackupService, EventBus, HerdStore, ProtocolService};
use storage::keys::API_BASE_KEY;
use storage::{FileKeyValueStore, KeyValueStore, LocalBackend, PersistenceBackend, RemoteBackend};

/// Services of one session
#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub kv: Arc<dyn KeyValueStore>,
    pub events: Arc<EventBus>,
    pub herd: Arc<HerdStore>,
    pub backups: BackupService,
    pub protocols: ProtocolService,
    /// Set when the session runs against a server
    pub remote: Option<Arc<RemoteBackend>>,
}

/// Open the file store in the configured data directory and initialize
pub async fn initialize_backend(config: AppConfig) -> Result<AppContext> {
    let data_dir = config.data_dir()?;
    info!("Using data directory {}", data_dir.display());
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::new(&data_dir)?);
    initialize_with_store(config, kv).await
}

/// Initialize on top of an existing key-value store
pub async fn initialize_with_store(config: AppConfig, kv: Arc<dyn KeyValueStore>) -> Result<AppContext> {
    let api_base = match config.api_base() {
        Some(base) => Some(base.to_string()),
        None => stored_api_base(kv.as_ref()),
    };

    let mut remote = None;
    let backend: Arc<dyn PersistenceBackend> = match api_base {
        Some(base) => {
            let backend = Arc::new(RemoteBackend::new(&base, config.request_timeout(), kv.clone())?);
            remote = Some(backend.clone());
            backend
        }
        None => {
            info!("Using local storage");
            Arc::new(LocalBackend::new(kv.clone()))
        }
    };

    let events = Arc::new(EventBus::new());
    let herd = Arc::new(HerdStore::new(backend, events.clone(), &config.user_name()));

    if let Some(remote) = &remote {
        if let Some(user) = remote.get_current_user().await {
            herd.set_user_name(&user.username);
        }
    }
    herd.initialize().await?;
    info!(
        "Backend ready: object {} with {} entries",
        herd.current_object_id(),
        herd.len()
    );

    Ok(AppContext {
        backups: BackupService::new(kv.clone()),
        protocols: ProtocolService::new(kv.clone()),
        config,
        kv,
        events,
        herd,
        remote,
    })
}

fn stored_api_base(kv: &dyn KeyValueStore) -> Option<String> {
    match kv.get(API_BASE_KEY) {
        Ok(value) => value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
        Err(e) => {
            warn!("Failed to read stored server address: {}", e);
            None
        }
    }
}

/// Remember (or forget) the server address for later sessions
pub fn store_api_base(kv: &dyn KeyValueStore, api_base: Option<&str>) -> Result<()> {
    match api_base.map(str::trim).filter(|v| !v.is_empty()) {
        Some(base) => {
            kv.set(API_BASE_KEY, base)?;
            info!("Server address set to {}", base);
        }
        None => {
            kv.remove(API_BASE_KEY)?;
            info!("Server address cleared, using local storage");
        }
    }
    Ok(())
}
