use crate::core::types::{ServiceStatus, UpdateStage};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write configuration file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to deserialize configuration from {path}: {source}")]
    Deserialize {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Failed to serialize configuration: {0}")]
    Serialize(Box<dyn std::error::Error + Send + Sync>),
    #[error("Configuration validation failed: {0}")]
    Validation(String),
    #[error("Default configuration written to {0}; edit it and run again")]
    DefaultCreated(PathBuf),
    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Error, Debug)]
pub enum UserInputError {
    #[error("Failed to read user input: {0}")]
    ReadError(std::io::Error),
    #[error("User input was cancelled or empty")]
    CancelledOrEmpty,
    #[error("Invalid input format: {0}")]
    InvalidFormat(String),
}

impl From<inquire::InquireError> for UserInputError {
    fn from(err: inquire::InquireError) -> Self {
        match err {
            inquire::InquireError::OperationCanceled
            | inquire::InquireError::OperationInterrupted => UserInputError::CancelledOrEmpty,
            inquire::InquireError::IO(e) => UserInputError::ReadError(e),
            other => UserInputError::InvalidFormat(other.to_string()),
        }
    }
}

/// Faults raised by a single artifact source backend.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Cannot connect to {endpoint}: {details}")]
    Connection { endpoint: String, details: String },
    #[error("Invalid source URL '{url}': {details}")]
    InvalidUrl { url: String, details: String },
    #[error("{operation} failed on '{path}': {details}")]
    Protocol {
        operation: &'static str,
        path: String,
        details: String,
    },
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Source root '{0}' is not an accessible directory")]
    RootUnavailable(String),
    #[error("Backend connection is already closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("No RMS/Chain servers found for keywords {keywords:?}")]
    NoServers { keywords: Vec<String> },
    #[error("No artifact source is configured or reachable")]
    NoSources,
    #[error("No release versions found on any configured source")]
    NoVersions,
    #[error("Unknown server '{0}'")]
    UnknownServer(String),
    #[error("Unknown release '{0}'")]
    UnknownRelease(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error(
        "No archive for '{keyword}' in version {version}; available: {}",
        available.join(", ")
    )]
    NoMatchingArtifact {
        keyword: String,
        version: String,
        available: Vec<String>,
    },
    #[error(
        "Several archives for '{keyword}' in version {version}: {}",
        candidates.join(", ")
    )]
    AmbiguousArtifact {
        keyword: String,
        version: String,
        candidates: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer of '{name}' failed: {source}")]
    Source { name: String, source: SourceError },
    #[error("Local file error on {path}: {source}")]
    LocalFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Archiving {path} failed: {details}")]
    Archive { path: PathBuf, details: String },
}

#[derive(Error, Debug)]
pub enum ServiceControlError {
    #[error("Failed to run '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("'{command}' failed: {details}")]
    CommandFailed { command: String, details: String },
    #[error("Service '{0}' not found")]
    NotFound(String),
    #[error("Service '{name}' did not reach {target:?} within {waited:?}")]
    StatusTimeout {
        name: String,
        target: ServiceStatus,
        waited: Duration,
    },
    #[error("Logon account change needs credentials for '{0}'")]
    MissingCredentials(String),
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup directory {path} could not be prepared: {source}")]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Moving '{folder}' into the backup failed: {source}; restored {restored:?}")]
    RolledBack {
        folder: String,
        source: std::io::Error,
        restored: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("Extraction of {archive} failed: {details}")]
    Extraction { archive: PathBuf, details: String },
    #[error("Folder '{folder}' is missing from the extracted archive at {path}")]
    MissingFolder { folder: String, path: PathBuf },
    #[error("File system error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Log file {path} did not appear within {waited:?}")]
    LogFileTimeout { path: PathBuf, waited: Duration },
    #[error("Success marker '{marker}' not seen within {waited:?}")]
    MarkerTimeout { marker: String, waited: Duration },
    #[error("Log watcher stopped unexpectedly: {0}")]
    Worker(String),
}

/// Everything that can end an update run, tagged by the component that raised it.
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    ServiceControl(#[from] ServiceControlError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Input(#[from] UserInputError),
    #[error("Update aborted during {stage:?}: {details}")]
    Aborted { stage: UpdateStage, details: String },
    #[error("Update cancelled by operator")]
    Cancelled,
}
