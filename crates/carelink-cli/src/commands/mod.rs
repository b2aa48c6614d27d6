pub mod audit;
pub mod common;
pub mod config;
pub mod conflicts;
pub mod delete;
pub mod get;
pub mod put;
pub mod reconcile;
pub mod status;
pub mod user;
