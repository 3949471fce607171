//! Data layer of the cattle tracker: breeding records per animal, kept in
//! local storage or on a tracker server, with reproductive KPI reports.

pub mod backend;
pub mod config;
pub mod logging;

pub use backend::{initialize_backend, initialize_with_store, AppContext};
pub use config::AppConfig;
