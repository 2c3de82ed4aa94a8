//! Access to the mail store: participant address extraction and the
//! message queries the linker and scanner run.

pub mod address;
pub mod store;

pub use address::extract;
pub use store::{MailStore, SqliteMailStore};
