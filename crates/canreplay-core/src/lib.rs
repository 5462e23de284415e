//! canreplay-core - Core types for CAN log replay and diagnostic analysis
//!
//! This crate holds the normalized frame model, frame ingestion, the
//! `BusSink` abstraction that replay drives, and the finding/report types
//! shared by the diagnostic classifier and the replay engine.

pub mod bus;
pub mod error;
pub mod ingest;
pub mod models;

pub use bus::{BusSink, SignalDecoder};
pub use error::{FrameError, TransportError};
pub use ingest::{ingest, IngestSummary, Ingestor};
pub use models::*;
