//! Estrus synchronization protocols.
//!
//! Definitions are stored as a JSON array under `cattleTracker_protocols`.
//! Until the user changes anything the built-in set is returned.

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use log::{info, warn};
use shared::{ProtocolStep, ScheduledStep, SyncProtocol};
use std::sync::Arc;

use crate::backend::domain::models::protocol::ProtocolValidationError;
use crate::backend::storage::error::StorageError;
use crate::backend::storage::keys::PROTOCOLS_KEY;
use crate::backend::storage::traits::KeyValueStore;

fn step(day: u32, drug: &str) -> ProtocolStep {
    ProtocolStep {
        day,
        drug: drug.to_string(),
    }
}

/// Protocols available before the user defines any
pub fn builtin_protocols() -> Vec<SyncProtocol> {
    vec![
        SyncProtocol {
            id: "ovsynch".to_string(),
            name: "Овсинх".to_string(),
            steps: vec![step(0, "ГнРГ"), step(7, "ПГФ2α"), step(9, "ГнРГ")],
        },
        SyncProtocol {
            id: "presynch".to_string(),
            name: "Пресинх".to_string(),
            steps: vec![
                step(0, "ПГФ2α"),
                step(14, "ПГФ2α"),
                step(26, "ГнРГ"),
                step(33, "ПГФ2α"),
                step(35, "ГнРГ"),
            ],
        },
    ]
}

#[derive(Clone)]
pub struct ProtocolService {
    kv: Arc<dyn KeyValueStore>,
}

impl ProtocolService {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn list(&self) -> Result<Vec<SyncProtocol>> {
        match self.kv.get(PROTOCOLS_KEY)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(protocols) => Ok(protocols),
                Err(e) => {
                    warn!("Stored protocols are unreadable, using built-in set: {}", e);
                    Ok(builtin_protocols())
                }
            },
            None => Ok(builtin_protocols()),
        }
    }

    pub fn find(&self, id_or_name: &str) -> Result<Option<SyncProtocol>> {
        let needle = id_or_name.trim().to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .find(|p| p.id == id_or_name.trim() || p.name.to_lowercase() == needle))
    }

    /// Validate and store a new protocol
    pub fn add(&self, name: &str, steps: Vec<ProtocolStep>) -> Result<SyncProtocol> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProtocolValidationError::EmptyName.into());
        }
        if steps.is_empty() {
            return Err(ProtocolValidationError::NoSteps.into());
        }
        if let Some(blank) = steps.iter().find(|s| s.drug.trim().is_empty()) {
            return Err(ProtocolValidationError::EmptyDrug(blank.day).into());
        }

        let mut protocols = self.list()?;
        if protocols.iter().any(|p| p.name.to_lowercase() == name.to_lowercase()) {
            return Err(ProtocolValidationError::DuplicateName(name.to_string()).into());
        }

        let mut millis = Utc::now().timestamp_millis();
        let mut id = format!("protocol_{}", millis);
        while protocols.iter().any(|p| p.id == id) {
            millis += 1;
            id = format!("protocol_{}", millis);
        }

        let mut steps: Vec<ProtocolStep> = steps
            .into_iter()
            .map(|s| ProtocolStep {
                day: s.day,
                drug: s.drug.trim().to_string(),
            })
            .collect();
        steps.sort_by_key(|s| s.day);

        let protocol = SyncProtocol {
            id,
            name: name.to_string(),
            steps,
        };
        protocols.push(protocol.clone());
        self.save(&protocols)?;

        info!("Added protocol '{}' ({})", protocol.name, protocol.id);
        Ok(protocol)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let mut protocols = self.list()?;
        let before = protocols.len();
        protocols.retain(|p| p.id != id);
        if protocols.len() == before {
            return Err(ProtocolValidationError::NotFound(id.to_string()).into());
        }
        self.save(&protocols)?;
        info!("Removed protocol {}", id);
        Ok(())
    }

    fn save(&self, protocols: &[SyncProtocol]) -> Result<(), StorageError> {
        let payload = serde_json::to_string(protocols).map_err(|source| StorageError::Serialization {
            key: PROTOCOLS_KEY.to_string(),
            source,
        })?;
        self.kv.set(PROTOCOLS_KEY, &payload)
    }
}

/// Calendar of a protocol started on `start`, in day order
pub fn schedule(protocol: &SyncProtocol, start: NaiveDate) -> Vec<ScheduledStep> {
    let mut steps: Vec<ScheduledStep> = protocol
        .steps
        .iter()
        .map(|s| ScheduledStep {
            date: start + Duration::days(s.day as i64),
            day: s.day,
            drug: s.drug.clone(),
        })
        .collect();
    steps.sort_by_key(|s| s.day);
    steps
}
