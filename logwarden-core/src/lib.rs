//! Core library for the Logwarden log pipeline.
//!
//! Four subsystems make up the processing backbone:
//!
//! - [`collect`]: producer-side filtering, batching, retrying delivery, and
//!   file tailing with truncate-after-consume.
//! - [`process`]: the server-side queue and worker pool that parses frames,
//!   archives raw and structured data, and feeds the analyzer.
//! - [`analyze`]: the prioritized, grouped rule engine with per-rule metrics.
//! - [`alert`]: alert rules, deduplication, the PENDING→ACTIVE→RESOLVED/
//!   IGNORED state machine, and notification channels.
//!
//! Subsystems communicate through bounded queues and callbacks; the only
//! shared infrastructure is the [`storage`] layer (Redis cache + Postgres
//! relational store) behind async traits.

pub mod alert;
pub mod analyze;
pub mod collect;
pub mod compress;
pub mod error;
pub mod parse;
pub mod process;
pub mod storage;

pub use error::{PipelineError, Result};
