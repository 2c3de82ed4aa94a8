//! CRM-side collaborators of the linker: the contact directory, access
//! control and the history service.

pub mod access;
pub mod directory;
pub mod history;

pub use access::{AccessControl, AllowAll};
pub use directory::{ContactDirectory, ContactResolver, SqliteContactDirectory};
pub use history::{HistoryService, NoopHistoryService};
