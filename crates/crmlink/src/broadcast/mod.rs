//! Event broadcasting for hosts that stream linker activity.

pub mod activity;

pub use activity::{ActivityEvent, ActivityKind, ActivityLog};
