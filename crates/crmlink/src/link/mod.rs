//! The linker: outcome types, the transactional link store and the engine
//! that ties extraction, resolution and persistence together.

pub mod engine;
pub mod outcome;
pub mod store;

pub use engine::{EngineOptions, LinkingEngine};
pub use outcome::{BatchReport, LinkOutcome, LinkReport, OutcomeCounts};
pub use store::{ChainLink, ChainLinkSummary, LinkStore};
