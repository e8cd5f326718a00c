use crate::config::models::AppConfig;
use crate::core::error::{ConfigError, ServiceControlError, SourceError, UserInputError};
use crate::core::types::{
    BackendKind, EntryKind, LogonAccount, MessageLevel, ServiceDescriptor, ServiceStatus,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One concrete origin of release artifacts.
///
/// Paths are backend-native strings: `/`-separated on FTP, file system paths on a share.
/// Implementations serialize their own operations; callers never issue two at once.
#[async_trait]
pub(crate) trait SourceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    fn root(&self) -> &str;
    fn join(&self, base: &str, name: &str) -> String;
    fn parent(&self, path: &str) -> Option<String>;

    /// Base names of the entries directly under `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<String>, SourceError>;
    async fn classify(&self, path: &str) -> Result<EntryKind, SourceError>;
    async fn size(&self, path: &str) -> Result<Option<u64>, SourceError>;
    /// Streams `remote_path` into `dest` in bounded chunks. Returns bytes written.
    async fn retrieve(
        &self,
        remote_path: &str,
        dest: &Path,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<u64, SourceError>;
    /// Creates every missing segment of `remote_dir`. Safe to call repeatedly.
    async fn ensure_dir(&self, remote_dir: &str) -> Result<(), SourceError>;
    async fn store(
        &self,
        local_path: &Path,
        remote_dir: &str,
        name: &str,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<u64, SourceError>;
    async fn close(&self) -> Result<(), SourceError>;
}

/// Receives byte counts while a transfer is in flight.
pub(crate) trait TransferObserver: Send + Sync {
    fn on_progress(&self, bytes: u64);
    fn on_complete(&self);
}

pub(crate) struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_progress(&self, _bytes: u64) {}
    fn on_complete(&self) {}
}

#[async_trait]
pub(crate) trait ServiceControlPort: Send + Sync {
    async fn discover(&self, keywords: &[String]) -> Result<Vec<ServiceDescriptor>, ServiceControlError>;
    /// `Ok(None)` means the service does not exist.
    async fn query_status(&self, name: &str) -> Result<Option<ServiceStatus>, ServiceControlError>;
    async fn query_logon_account(&self, name: &str) -> Result<Option<String>, ServiceControlError>;
    async fn set_logon_account(
        &self,
        name: &str,
        account: &LogonAccount,
    ) -> Result<(), ServiceControlError>;
    async fn start(&self, name: &str) -> Result<(), ServiceControlError>;
    async fn stop(&self, name: &str) -> Result<(), ServiceControlError>;
}

#[async_trait]
pub(crate) trait UserInteractionPort: Send + Sync {
    fn display_message(&self, message: &str, level: MessageLevel);
    fn display_error(&self, error: &dyn std::error::Error);
    fn display_log_line(&self, line: &str);
    fn transfer_observer(&self, label: &str, total: Option<u64>) -> Arc<dyn TransferObserver>;

    async fn select(&self, prompt: &str, options: Vec<String>) -> Result<usize, UserInputError>;
    async fn multi_select(
        &self,
        prompt: &str,
        options: Vec<String>,
    ) -> Result<Vec<usize>, UserInputError>;
    async fn confirm(&self, prompt: &str, default: bool) -> Result<bool, UserInputError>;
}

/// Resolves when the operator asks to interrupt the current wait.
#[async_trait]
pub(crate) trait InterruptSource: Send + Sync {
    async fn interrupted(&self);
}

pub(crate) trait ConfigurationStore: Send + Sync {
    fn load_app_config_file(&self, path: &Path) -> Result<AppConfig, ConfigError>;
    fn save_app_config_file(&self, config: &AppConfig, path: &Path) -> Result<(), ConfigError>;
    fn get_default_config_path(&self) -> Result<PathBuf, ConfigError>;
}
