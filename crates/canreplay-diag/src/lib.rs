//! canreplay-diag - Diagnostic decoding for replayed CAN traffic
//!
//! Reconstructs ISO-TP segments from single frames, extracts UDS
//! DIDs/DTCs/SecurityAccess steps, and resolves them against an optional
//! diagnostic knowledge base loaded from CDD/ODX-like exports.

pub mod classifier;
pub mod isotp;
pub mod knowledge;
pub mod uds;

pub use classifier::{classify, classify_frame, extract_candidates, Candidate};
pub use isotp::{reconstruct, IsoTpKind, IsoTpSegment};
pub use knowledge::{EntryCategory, KbEntry, KnowledgeBase, LoadError};
pub use uds::{is_diagnostic_id, manufacturer_for_did, DtcCategory, UdsService};
