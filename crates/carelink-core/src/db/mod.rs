//! Database layer for Carelink

mod cache_repository;
mod conflict_repository;
mod connection;
mod migrations;

pub use cache_repository::LibSqlLocalCache;
pub use conflict_repository::LibSqlConflictLog;
pub use connection::Database;
