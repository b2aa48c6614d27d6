//! carelink-core - Core library for Carelink
//!
//! This crate contains the sync records, the three storage tiers (remote
//! store, local cache, memory backup), the per-feature sync coordinator and
//! the conflict resolver shared by the Carelink CLI and clients.

pub mod audit;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod context;
pub mod db;
pub mod error;
pub mod identity;
pub mod models;
pub mod policy;
pub mod remote;
pub mod sync;
pub mod util;

pub use context::SyncContext;
pub use error::{Error, Result};
pub use models::{SyncRecord, SyncStatus};
