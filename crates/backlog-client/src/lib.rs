//! Client library for the backlog read and write models.
//!
//! This crate provides the pieces a backlog front end needs to show
//! Epics, Features, Stories and Tasks while the remote services remain the
//! source of truth.
//!
//! ## Features
//!
//! - **HTTP Client**: gateway to the read model (queries) and write model
//!   (commands)
//! - **Cache**: per-parent item cache with optimistic commands and
//!   reconciliation against fetched snapshots
//! - **Events**: typed change notifications through handlers or a broadcast
//!   channel

pub mod cache;
mod client;
mod error;
mod id;
mod types;

pub use cache::{CacheEvent, CacheEventKind, Handler, IdChange, ItemCache, Reconciliation};
pub use client::{Backend, BacklogClient, GatewayConfig};
pub use error::GatewayError;
pub use id::{IdGenerator, SequentialIdGenerator};
pub use types::*;
