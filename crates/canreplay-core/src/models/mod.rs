//! Shared data models for replay and analysis

mod finding;
mod frame;
mod report;

pub use finding::*;
pub use frame::*;
pub use report::*;
