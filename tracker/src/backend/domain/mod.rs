//! # Domain Module
//!
//! Business logic of the cattle tracker, independent of where records are
//! stored and of any user interface.
//!
//! ## Module Organization
//!
//! - **herd**: the herd store; every entry and object mutation goes through it
//! - **events**: the event bus the herd store publishes changes on
//! - **breeding**: reproductive KPIs (PR, CR, HDR, service period, days open)
//! - **search**: entry search
//! - **backup_service**: storage snapshots and JSON backup files
//! - **protocol_service**: synchronization protocol definitions and schedules
//! - **models**: validation errors, audit action names and commands
//!
//! ## Business Rules
//!
//! - `cattleId` is required, legible, at most 100 characters and unique
//!   within an object
//! - the last insemination history record always mirrors the top-level
//!   insemination fields
//! - insemination attempts are numbered per lactation
//! - every mutation appends an audit record naming the user
//! - change events are published only after the backend accepted the change

pub mod backup_service;
pub mod breeding;
pub mod events;
pub mod herd;
pub mod models;
pub mod protocol_service;
pub mod search;

pub use backup_service::{BackupService, ImportMode, ImportSummary, SnapshotInfo};
pub use events::{EventBus, StoreEvent, SubscriptionId};
pub use herd::HerdStore;
pub use protocol_service::ProtocolService;
