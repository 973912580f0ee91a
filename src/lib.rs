//! # netctrl-core
//!
//! A dependency-aware, batched mutation engine for layered biological-network datasets.
//!
//! ## Overview
//!
//! The dataset is a stack of layers, each built from the ones below it: reference databases and
//! their typed fields, nodes and edges carrying field values, node collections, user-owned
//! networks, analyses run over those networks, and the control paths an analysis produces.
//! netctrl-core performs create, edit and delete operations across that stack while keeping it
//! consistent:
//!
//! - **Bounded batches**: every operation commits in fixed-size chunks, one transaction per chunk
//! - **Strict cascade order**: deleting or materially editing an entity first deletes everything
//!   built on it, most-downstream layer first, so no dangling reference is ever observable
//! - **Cooperative cancellation**: a stop request is honoured at the next chunk or page boundary,
//!   leaving a whole number of committed chunks
//! - **Per-item validation**: malformed payloads are dropped and reported individually without
//!   failing the rest of the call
//!
//! ## Architecture
//!
//! - **[`model`]**: identifiers, entity kinds and layers, persisted entity structs
//! - **[`db`]**: SQLite pool, schema migration, staged per-chunk transactions
//! - **[`engine`]**: the [`engine::Engine`] facade with its builder, cascade table, dependency
//!   resolver, orchestrator and batch mutator
//! - **[`jobs`]**: persisted job records and the runner that executes them
//! - **[`config`]**: engine configuration loaded from TOML
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netctrl_core::{
//!     config::EngineConfig,
//!     engine::{CancellationToken, Engine},
//!     model::{EntityKind, Id},
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::open(EngineConfig::default()).await?;
//!     let token = CancellationToken::new();
//!
//!     // Deletes the database together with its fields, nodes, edges, collections and every
//!     // network or analysis built from them.
//!     let report = engine
//!         .delete(EntityKind::Database, &[Id::from("uniprot")], &token)
//!         .await?;
//!     println!("deleted {}, cascaded {:?}", report.committed, report.cascaded);
//!     Ok(())
//! }
//! ```
//!
//! Queued work goes through [`jobs::JobRunner`]: a job is removed from the queue only once its
//! mutation completed without error or cancellation.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod model;
#[cfg(test)]
mod tests;

pub use error::*;
