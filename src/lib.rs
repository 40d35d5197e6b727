//! # Knowledge Fusion
//!
//! Fuses heterogeneous operational-knowledge sources (incident cases, code
//! knowledge, documentation, prior searches) into one ranked answer to a
//! diagnostic query, tracks the session that asked it, and learns from
//! feedback which sources actually help.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!      query ─────────▶│ KnowledgeHub │◀──────── feedback / outcomes
//!                      └──────┬───────┘
//!            ┌────────────────┼─────────────────┐
//!            ▼                ▼                 ▼
//!   ┌────────────────┐ ┌─────────────┐ ┌────────────────┐
//!   │ SessionManager │ │   Fusion    │ │ LearningEngine │
//!   └────────────────┘ │ Coordinator │ └───────┬────────┘
//!                      └──────┬──────┘         │ effectiveness
//!          ┌─────────┬────────┼────────┐       │
//!          ▼         ▼        ▼        ▼       │
//!        Cases     Code     Docs    History ◀──┘
//!          └─────────┴────┬───┴────────┘
//!                         ▼
//!                 Store (memory | SQLite)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kfuse init
//! kfuse ingest ./incidents --type cases
//! kfuse search "cassandra database connection failed"
//! kfuse feedback --session <id> --item <id> --item-type case --kind helpful
//! kfuse insights
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Domain error taxonomy |
//! | [`store`] | Record store trait, in-memory and SQLite backends |
//! | [`adapters`] | Source adapters, relevance scoring, registry |
//! | [`extract`] | Raw text → structured knowledge |
//! | [`fusion`] | Concurrent fan-out and ranked merge |
//! | [`session`] | Diagnostic session state machine |
//! | [`learning`] | Feedback, source effectiveness, insights |
//! | [`hub`] | Unified query façade |
//! | [`ingest`] | Directory ingestion |
//! | [`sources`] | Adapter listing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod adapters;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod fusion;
pub mod hub;
pub mod ingest;
pub mod learning;
pub mod migrate;
pub mod models;
pub mod session;
pub mod sources;
pub mod store;

pub use error::{HubError, HubResult};
pub use hub::KnowledgeHub;
