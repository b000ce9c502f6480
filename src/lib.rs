//! tasksync - Collaborative Task-List Synchronization Core
//!
//! This library keeps a local task list consistent with a remote store
//! under concurrent multi-client mutation, change-feed events, and
//! network failure.
//!
//! # Core Concepts
//!
//! - **Local Task Cache**: the in-memory source of truth for rendering,
//!   with idempotent mutators
//! - **Optimistic Mutations**: cache updates applied before store
//!   confirmation, fully reverted on failure
//! - **Change-Feed Reconciliation**: merging committed changes (including
//!   this session's own echoes) without duplication or loss
//! - **At-Most-Once Notifications**: one notification per logical change
//!   across the mutation-success and feed-echo paths
//! - **Suggestion Assistant**: contained LLM request/response flows for
//!   suggestions, grouping, and summaries
//!
//! # Module Organization
//!
//! - `task`: task entity model and change events
//! - `cache`: local task cache
//! - `gateway`: store capability trait and subscriptions
//! - `rest`: HTTP gateway implementation
//! - `orchestrator`: optimistic mutation issue/revert
//! - `reconciler`: change-feed consumer and resync
//! - `notify`: notification dispatch and delivery
//! - `assist`: suggestion assistant
//! - `session`: per-user lifecycle and state container
//! - `config`: configuration loading from `tasksync.toml`
//! - `error`: error types and result aliases

pub mod assist;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod orchestrator;
pub mod reconciler;
pub mod rest;
pub mod session;
pub mod task;

pub use error::{Error, Result, StoreError, StoreErrorKind};
pub use session::Session;
pub use task::{ChangeEvent, Priority, Task};
