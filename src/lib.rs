//! # Cortex Core
//!
//! Cortex Core is a knowledge-and-task orchestration service for autonomous
//! coding agents. It persists a graph of markdown entries (notes, plans,
//! tasks, decisions) behind an HTTP API and ships a companion runner that
//! polls the API, claims ready tasks, and drives external agent processes.
//!
//! ## Architecture
//!
//! - **Entry Service**: CRUD over markdown entries with YAML frontmatter
//! - **Dependency Engine**: pure classification of task graphs
//! - **Feature Engine**: feature-level aggregation of classified tasks
//! - **Claim Registry**: advisory leases with staleness detection
//! - **Runner**: scheduler loop, process supervisor, and durable state
//!
//! The server (`cortex-server`) owns the entry/metadata stores and the HTTP
//! surface; the runner (`cortex-runner`) is a separate process that talks
//! to it over HTTP only.

/// HTTP API server and endpoints
pub mod api;
/// In-memory claim registry (advisory task leases)
pub mod claims;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Task dependency and classification engine
pub mod deps;
/// Entry service: CRUD, sections, search, inject
pub mod entries;
/// Error types and handling
pub mod error;
/// Feature-level aggregation of classified tasks
pub mod features;
/// Durable per-entry metadata store
pub mod metadata;
/// Core data models
pub mod models;
/// Notebook adapter over the markdown store
pub mod notebook;
/// Rate limiting for the HTTP surface
pub mod rate_limit;
/// Task runner: scheduler, supervisor, state
pub mod runner;
/// Parameter validation and sanitization
pub mod validation;

pub use error::{CortexError, Result};
