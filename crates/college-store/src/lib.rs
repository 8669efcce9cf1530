//! # college-store
//!
//! Durable storage for the coursework engine, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model: datasets, topics and their assignments, dataset permissions, and
//! saved chat transcripts.

pub mod chats;
pub mod database;
pub mod datasets;
pub mod migrations;
pub mod models;
pub mod permissions;
pub mod topics;

mod error;
mod row;

#[cfg(test)]
mod test_support;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
