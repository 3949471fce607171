//! # Remote Backend
//!
//! Persistence backend that talks to the tracker server instead of local
//! storage. The server is the canonical store:
//!
//! - every mutation performs the remote call and then reloads the active
//!   object's entries, so callers always see exactly what the server holds;
//! - `save` is a no-op;
//! - loaded entries go through the same integrity pass as local ones and are
//!   marked `synced`.
//!
//! Only the active object pointer and the session token live locally.

pub mod client;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use shared::{
    AuthResponse, CowEntry, DatabaseObject, LoginRequest, ObjectNameRequest, UserInfo, UsernameAvailability,
    DEFAULT_OBJECT_ID, DEFAULT_OBJECT_NAME,
};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::storage::integrity::clean_records;
use crate::backend::storage::keys::CURRENT_OBJECT_KEY;
use crate::backend::storage::sanitize::sanitized;
use crate::backend::storage::traits::{BackendMode, KeyValueStore, PersistenceBackend};

pub use client::{ApiClient, RemoteError};

/// Collections arrive either bare or wrapped in an envelope
#[derive(Deserialize)]
#[serde(untagged)]
enum EntriesPayload {
    List(Vec<Value>),
    Wrapped { entries: Vec<Value> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ObjectsPayload {
    List(Vec<DatabaseObject>),
    Wrapped { objects: Vec<DatabaseObject> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ObjectPayload {
    Plain(DatabaseObject),
    Wrapped { object: DatabaseObject },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UserPayload {
    Wrapped { user: UserInfo },
    Plain(UserInfo),
}

pub struct RemoteBackend {
    client: ApiClient,
    kv: Arc<dyn KeyValueStore>,
}

impl RemoteBackend {
    pub fn new(base_url: &str, timeout: Duration, kv: Arc<dyn KeyValueStore>) -> Result<Self, RemoteError> {
        let client = ApiClient::new(base_url, timeout, kv.clone())?;
        info!("Using remote backend at {}", client.base_url());
        Ok(Self { client, kv })
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.token().is_some()
    }

    fn store_pointer(&self, object_id: &str) -> Result<()> {
        self.kv.set(CURRENT_OBJECT_KEY, object_id)?;
        Ok(())
    }

    async fn fetch_objects(&self) -> Result<Vec<DatabaseObject>, RemoteError> {
        let payload: ObjectsPayload = self.client.get_json(self.client.url(&["api", "objects"])).await?;
        Ok(match payload {
            ObjectsPayload::List(objects) | ObjectsPayload::Wrapped { objects } => objects,
        })
    }

    async fn post_object(&self, name: &str) -> Result<DatabaseObject, RemoteError> {
        let request = ObjectNameRequest { name: name.to_string() };
        let payload: ObjectPayload = self
            .client
            .post_json(self.client.url(&["api", "objects"]), &request)
            .await?;
        Ok(match payload {
            ObjectPayload::Plain(object) | ObjectPayload::Wrapped { object } => object,
        })
    }

    async fn fetch_entries(&self, object_id: &str) -> Result<Vec<CowEntry>, RemoteError> {
        let url = self.client.url(&["api", "objects", object_id, "entries"]);
        let payload: EntriesPayload = self.client.get_json(url).await?;
        let records = match payload {
            EntriesPayload::List(records) | EntriesPayload::Wrapped { entries: records } => records,
        };

        let cleaned = clean_records(records);
        if cleaned.discarded > 0 {
            warn!("Dropped {} unreadable records received from server", cleaned.discarded);
        }

        let mut entries = cleaned.entries;
        for entry in &mut entries {
            entry.synced = true;
        }
        debug!("Loaded {} entries of {} from server", entries.len(), object_id);
        Ok(entries)
    }

    // ---- Session ----

    /// Exchange credentials for a session token
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<UserInfo>> {
        self.authenticate("login", username, password).await
    }

    /// Create an account and start a session for it
    pub async fn register(&self, username: &str, password: &str) -> Result<Option<UserInfo>> {
        self.authenticate("register", username, password).await
    }

    async fn authenticate(&self, action: &str, username: &str, password: &str) -> Result<Option<UserInfo>> {
        let request = LoginRequest {
            username: username.trim().to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self
            .client
            .post_json(self.client.url(&["api", "auth", action]), &request)
            .await?;
        if response.token.trim().is_empty() {
            return Err(RemoteError::InvalidResponse("server returned an empty token".to_string()).into());
        }

        self.client.set_token(Some(response.token))?;
        info!("Signed in as {}", request.username);
        Ok(response.user)
    }

    /// End the session. The cached token is dropped even if the server call fails.
    pub async fn logout(&self) -> Result<()> {
        if self.is_authenticated() {
            let url = self.client.url(&["api", "auth", "logout"]);
            if let Err(e) = self.client.send::<()>(Method::POST, url, None).await {
                warn!("Server logout failed: {}", e);
            }
        }
        self.client.set_token(None)?;
        info!("Signed out");
        Ok(())
    }

    /// The signed-in user, `None` when there is no valid session or the
    /// server cannot be reached
    pub async fn get_current_user(&self) -> Option<UserInfo> {
        if !self.is_authenticated() {
            return None;
        }
        match self
            .client
            .get_json::<UserPayload>(self.client.url(&["api", "auth", "me"]))
            .await
        {
            Ok(UserPayload::Wrapped { user }) | Ok(UserPayload::Plain(user)) => Some(user),
            Err(e) => {
                debug!("No current user: {}", e);
                None
            }
        }
    }

    pub async fn check_username(&self, username: &str) -> Result<bool> {
        let mut url = self.client.url(&["api", "auth", "check-username"]);
        url.query_pairs_mut().append_pair("username", username.trim());
        let response: UsernameAvailability = self.client.get_json(url).await?;
        Ok(response.available)
    }
}

#[async_trait]
impl PersistenceBackend for RemoteBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Remote
    }

    async fn load(&self) -> Result<Vec<CowEntry>> {
        Ok(self.fetch_entries(&self.current_object_id()).await?)
    }

    async fn save(&self, _entries: &[CowEntry]) -> Result<()> {
        debug!("save() ignored in remote mode");
        Ok(())
    }

    async fn create_entry(&self, entry: &CowEntry) -> Result<Vec<CowEntry>> {
        let object_id = self.current_object_id();
        let url = self.client.url(&["api", "objects", &object_id, "entries"]);
        self.client.send(Method::POST, url, Some(&sanitized(entry))).await?;
        info!("Created entry {} on server", entry.cattle_id);
        self.load().await
    }

    async fn update_entry(&self, cattle_id: &str, entry: &CowEntry) -> Result<Vec<CowEntry>> {
        let object_id = self.current_object_id();
        let url = self.client.url(&["api", "objects", &object_id, "entries", cattle_id]);
        self.client.send(Method::PUT, url, Some(&sanitized(entry))).await?;
        info!("Updated entry {} on server", cattle_id);
        self.load().await
    }

    async fn delete_entry(&self, cattle_id: &str) -> Result<Vec<CowEntry>> {
        let object_id = self.current_object_id();
        let url = self.client.url(&["api", "objects", &object_id, "entries", cattle_id]);
        self.client.send::<()>(Method::DELETE, url, None).await?;
        info!("Deleted entry {} on server", cattle_id);
        self.load().await
    }

    async fn ensure_objects(&self) -> Result<()> {
        let mut objects = self.fetch_objects().await?;
        if objects.is_empty() {
            let created = self.post_object(DEFAULT_OBJECT_NAME).await?;
            info!("Created default object {} on server", created.id);
            objects.push(created);
        }

        let current = self.current_object_id();
        if !objects.iter().any(|o| o.id == current) {
            let fallback = objects[0].id.clone();
            warn!("Active object '{}' is not on the server, switching to '{}'", current, fallback);
            self.store_pointer(&fallback)?;
        }
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<DatabaseObject>> {
        Ok(self.fetch_objects().await?)
    }

    async fn create_object(&self, name: &str) -> Result<DatabaseObject> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Object name cannot be empty"));
        }
        let object = self.post_object(name).await?;
        self.store_pointer(&object.id)?;
        info!("Created object '{}' ({}) on server", object.name, object.id);
        Ok(object)
    }

    async fn rename_object(&self, object_id: &str, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }
        let request = ObjectNameRequest { name: name.to_string() };
        let url = self.client.url(&["api", "objects", object_id]);
        match self.client.send(Method::PUT, url, Some(&request)).await {
            Ok(()) => Ok(true),
            Err(e) if e.status() == Some(404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(&self, object_id: &str) -> Result<()> {
        let url = self.client.url(&["api", "objects", object_id]);
        self.client.send::<()>(Method::DELETE, url, None).await?;
        info!("Deleted object {} on server", object_id);

        let current = self.current_object_id();
        let mut objects = self.fetch_objects().await?;
        if objects.is_empty() {
            objects.push(self.post_object(DEFAULT_OBJECT_NAME).await?);
        }
        if current == object_id || !objects.iter().any(|o| o.id == current) {
            self.store_pointer(&objects[0].id)?;
            info!("Active object is now {}", objects[0].id);
        }
        Ok(())
    }

    fn current_object_id(&self) -> String {
        match self.kv.get(CURRENT_OBJECT_KEY) {
            Ok(Some(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Ok(_) => DEFAULT_OBJECT_ID.to_string(),
            Err(e) => {
                warn!("Failed to read active object, using default: {}", e);
                DEFAULT_OBJECT_ID.to_string()
            }
        }
    }

    async fn set_current_object_id(&self, object_id: &str) -> Result<()> {
        let objects = self.fetch_objects().await?;
        if !objects.iter().any(|o| o.id == object_id) {
            return Err(anyhow!("Object not found: {}", object_id));
        }
        self.store_pointer(object_id)
    }
}
