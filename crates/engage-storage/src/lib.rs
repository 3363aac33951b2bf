//! Engage Storage - Postgres access and realtime change feed
//!
//! This crate provides the campaign and queue repositories backed by
//! PostgreSQL, plus the change feed that delivers row-level notifications.

pub mod db;
pub mod models;
pub mod realtime;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use realtime::{
    ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, MemoryChangeFeed, PgChangeFeed,
    Subscription,
};
pub use repository::*;
