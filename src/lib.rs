//! Canonical-record enrichment pipeline.
//!
//! Raw tabular rows become [`record::CanonicalRecord`]s, flow through a
//! configured sequence of [`stage`]s (each one external correction-service
//! call), and are flattened into a deterministic CSV export by the [`export`]
//! engine. A [`run`] state machine tracks each submitted batch, advanced by
//! the [`monitor`] reconciliation loop polling the external job executor.

pub mod config;
pub mod executor;
pub mod export;
pub mod monitor;
pub mod pipeline;
pub mod record;
pub mod run;
pub mod stage;
pub mod util;
