use crate::ports::SourceBackend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub(crate) enum MessageLevel {
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub(crate) enum ServiceStatus {
    Running,
    Stopped,
    StartPending,
    StopPending,
    Paused,
    PausePending,
    ContinuePending,
    Unknown,
}

impl ServiceStatus {
    /// Maps the state token printed by `sc.exe` (e.g. `RUNNING`, `STOP_PENDING`).
    pub(crate) fn from_sc_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => ServiceStatus::Running,
            "STOPPED" => ServiceStatus::Stopped,
            "START_PENDING" => ServiceStatus::StartPending,
            "STOP_PENDING" => ServiceStatus::StopPending,
            "PAUSED" => ServiceStatus::Paused,
            "PAUSE_PENDING" => ServiceStatus::PausePending,
            "CONTINUE_PENDING" => ServiceStatus::ContinuePending,
            _ => ServiceStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub(crate) enum ProductType {
    Rms,
    Chain,
}

impl ProductType {
    pub(crate) const ALL: [ProductType; 2] = [ProductType::Rms, ProductType::Chain];

    /// Lowercase token that release archives of this product carry in their name.
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            ProductType::Rms => "rms",
            ProductType::Chain => "chain",
        }
    }

    pub(crate) fn infer(name: &str, display_name: &str) -> Self {
        let chain = ProductType::Chain.keyword();
        if name.to_lowercase().contains(chain) || display_name.to_lowercase().contains(chain) {
            ProductType::Chain
        } else {
            ProductType::Rms
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductType::Rms => write!(f, "iikoRMS"),
            ProductType::Chain => write!(f, "iikoChain"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServiceDescriptor {
    pub name: String,
    pub display_name: String,
    pub status: ServiceStatus,
    pub binary_path: PathBuf,
    pub server_dir: PathBuf,
    pub product_type: ProductType,
}

impl ServiceDescriptor {
    /// Builds a descriptor from a service binary laid out as `<server>/tomcat9/bin/<exe>`.
    /// Returns `None` when the layout does not match.
    pub(crate) fn from_binary(
        name: &str,
        display_name: &str,
        status: ServiceStatus,
        binary_path: &Path,
    ) -> Option<Self> {
        if !binary_path.is_file() {
            return None;
        }
        let exe_dir = binary_path.parent()?;
        let tomcat_dir = exe_dir.parent()?;
        let server_dir = tomcat_dir.parent()?;

        let tomcat_name = tomcat_dir.file_name()?.to_str()?;
        if !tomcat_name.eq_ignore_ascii_case("tomcat9") || !server_dir.is_dir() {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            status,
            binary_path: binary_path.to_path_buf(),
            server_dir: server_dir.to_path_buf(),
            product_type: ProductType::infer(name, display_name),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
pub(crate) enum BackendKind {
    Ftp,
    Share,
}

impl BackendKind {
    /// Prefix that keeps catalog labels unique across backends.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            BackendKind::Ftp => "FTP",
            BackendKind::Share => "SMB",
        }
    }
}

/// Result of probing one namespace entry on a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    File,
    Directory,
    Missing,
}

#[derive(Clone)]
pub(crate) struct VersionCandidate {
    pub version: String,
    pub backend: Arc<dyn SourceBackend>,
    pub path: String,
    pub archives: Vec<String>,
}

impl VersionCandidate {
    pub(crate) fn label(&self) -> String {
        format!("{} {}", self.backend.kind().label(), self.version)
    }

    /// Numeric components of the version, used for ordering.
    pub(crate) fn version_key(&self) -> Vec<u64> {
        self.version
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    }
}

impl fmt::Debug for VersionCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionCandidate")
            .field("version", &self.version)
            .field("backend", &self.backend.kind())
            .field("path", &self.path)
            .field("archives", &self.archives)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SelectedArtifact {
    pub candidate: VersionCandidate,
    pub chosen_archive_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BackupRecord {
    pub target_dir: PathBuf,
    moved_folders: Vec<String>,
    pub logs_relocated: bool,
}

impl BackupRecord {
    pub(crate) fn new(target_dir: PathBuf) -> Self {
        Self {
            target_dir,
            moved_folders: Vec::new(),
            logs_relocated: false,
        }
    }

    /// Only called once a folder has been relocated completely.
    pub(crate) fn record_moved(&mut self, folder: &str) {
        self.moved_folders.push(folder.to_string());
    }

    pub(crate) fn moved_folders(&self) -> &[String] {
        &self.moved_folders
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub(crate) enum UpdateStage {
    Stopping,
    BackingUp,
    Extracting,
    MigratingLibraries,
    Deploying,
    InstallingAuxiliaries,
    Starting,
    AwaitingLogFile,
    MonitoringLog,
    Skipped,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct UpdateResult {
    pub succeeded: bool,
    pub backup_path: Option<PathBuf>,
    pub log_monitoring_skipped: bool,
    pub failed_stage: Option<UpdateStage>,
    pub error: Option<String>,
}

impl UpdateResult {
    pub(crate) fn success(backup_path: PathBuf, log_monitoring_skipped: bool) -> Self {
        Self {
            succeeded: true,
            backup_path: Some(backup_path),
            log_monitoring_skipped,
            failed_stage: None,
            error: None,
        }
    }

    pub(crate) fn failure(
        stage: UpdateStage,
        error: &dyn std::error::Error,
        backup_path: Option<PathBuf>,
    ) -> Self {
        Self {
            succeeded: false,
            backup_path,
            log_monitoring_skipped: false,
            failed_stage: Some(stage),
            error: Some(error.to_string()),
        }
    }
}

/// Run-scoped aggregate for one server update.
#[derive(Debug)]
pub(crate) struct UpdateSession {
    pub service: ServiceDescriptor,
    pub artifact: SelectedArtifact,
    pub backup: Option<BackupRecord>,
    pub stage_history: Vec<UpdateStage>,
    pub result: Option<UpdateResult>,
}

impl UpdateSession {
    pub(crate) fn new(service: ServiceDescriptor, artifact: SelectedArtifact) -> Self {
        Self {
            service,
            artifact,
            backup: None,
            stage_history: Vec::new(),
            result: None,
        }
    }

    pub(crate) fn stage(&self) -> Option<UpdateStage> {
        self.stage_history.last().copied()
    }

    pub(crate) fn backup_path(&self) -> Option<PathBuf> {
        self.backup.as_ref().map(|b| b.target_dir.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogonAccount {
    LocalSystem,
    User { username: String, password: String },
}

impl LogonAccount {
    pub(crate) fn is_local_system(account: &str) -> bool {
        let lowered = account.trim().to_lowercase();
        lowered == "localsystem" || lowered == "nt authority\\system"
    }
}
