pub mod broadcast;
pub mod config;
pub mod crm;
pub mod db;
pub mod error;
pub mod link;
pub mod logging;
pub mod mail;
pub mod model;
pub mod service;
pub mod worker;

pub use broadcast::{ActivityEvent, ActivityKind, ActivityLog};
pub use config::{load_config, load_config_from_str, Config};
pub use crm::{
    AccessControl, AllowAll, ContactDirectory, ContactResolver, HistoryService,
    NoopHistoryService, SqliteContactDirectory,
};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, CrmLinkError, LinkError, Result, ScannerError};
pub use link::{BatchReport, EngineOptions, LinkOutcome, LinkReport, LinkStore, LinkingEngine};
pub use logging::init_logging;
pub use mail::{MailStore, SqliteMailStore};
pub use model::{
    Attachment, ContactRef, EntityKind, Folder, Message, MessageOptions, Principal,
    ScanCursor,
};
pub use service::CrmLinkService;
pub use worker::{CycleReport, ScanScheduler, Scanner, ScannerSettings, ScannerStatus};
