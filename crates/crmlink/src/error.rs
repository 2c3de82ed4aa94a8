use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrmLinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Linking error: {0}")]
    Link(#[from] LinkError),

    #[error("Scanner error: {0}")]
    Scanner(#[from] ScannerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Failures inside one linking pass. Never escapes `process_message`.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Mail store error: {0}")]
    MailStore(String),

    #[error("Contact directory error: {0}")]
    Directory(String),

    #[error("Access check failed for {entity}: {reason}")]
    Access { entity: String, reason: String },

    #[error("History service error: {0}")]
    History(String),

    #[error("Message {message_id} not found in tenant {tenant}")]
    MessageNotFound { tenant: i64, message_id: i64 },

    #[error("Chain '{chain_id}' in mailbox {mailbox_id} has no messages")]
    EmptyChain { mailbox_id: i64, chain_id: String },

    #[error("Message {0} has no chain id")]
    MissingChain(i64),
}

#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("Failed to spawn scanner thread: {0}")]
    SpawnFailed(String),

    #[error("Failed to build scanner runtime: {0}")]
    RuntimeFailed(String),
}

pub type Result<T> = std::result::Result<T, CrmLinkError>;
