//! Shared test utilities for crmlink integration tests.
//!
//! This module provides:
//! - `TestHarness`: a file-backed database in a temp directory plus helpers
//!   to seed mail and contacts and to inspect what the linker wrote
//! - `MessageBuilder` for concise message fixtures
//! - Directory doubles that fail or record lookups

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
