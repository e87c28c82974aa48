//! # StrataKV
//!
//! An embedded log-structured-merge key-value storage engine with:
//! - Concurrent writes into a lock-free skip list memtable
//! - Background flush of full memtables into immutable sorted runs
//! - Memory-mapped runs searched by binary search over an offset index
//! - Full compaction of all runs into one
//! - Crash consistency through an atomically replaced meta record
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Host Process                          │
//! │            upsert / get / range / flush / compact            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Engine                               │
//! │          (backpressure via the single flush gate)            │
//! └───────┬──────────────────────┬──────────────────┬───────────┘
//!         │                      │                  │
//!         ▼                      ▼                  ▼
//!   ┌───────────┐  swap   ┌───────────┐      ┌─────────────┐
//!   │  Active   │ ──────▶ │ Flushing  │      │ Compaction  │
//!   │ MemTable  │         │ MemTable  │      │   Worker    │
//!   └───────────┘         └─────┬─────┘      └──────┬──────┘
//!                               │ flush worker      │ merge
//!                               ▼                   ▼
//!                        ┌─────────────────────────────────┐
//!                        │   Storage (sorted runs + meta)  │
//!                        └─────────────────────────────────┘
//! ```
//!
//! Durability covers flushed data only: entries still in memory are lost
//! on a crash.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod comparator;
pub mod entry;
pub mod memtable;
pub mod storage;
pub mod merge;
pub mod scheduler;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{StrataError, Result};
pub use config::Config;
pub use engine::Engine;
pub use entry::Entry;
pub use merge::MergeIterator;
pub use scheduler::TaskHandle;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of StrataKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
