use crate::config::models::{AppConfig, PromptPolicy, TimeoutConfig, VerificationConfig};
use crate::core::backup::{BACKUP_FOLDERS, BackupManager};
use crate::core::deployment::{DeploymentEngine, REPLACED_FOLDERS};
use crate::core::error::{ServiceControlError, UpdateError};
use crate::core::log_verifier::{LogVerifier, WatchOutcome};
use crate::core::service_wait::wait_for_status;
use crate::core::transfer::ArtifactTransfer;
use crate::core::types::{MessageLevel, ServiceStatus, UpdateResult, UpdateSession, UpdateStage};
use crate::ports::{InterruptSource, ServiceControlPort, UserInteractionPort};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(crate) const EXTRACT_DIR_NAME: &str = "extracted_update";

#[derive(Debug, Clone)]
pub(crate) struct OrchestratorSettings {
    pub download_dir: PathBuf,
    pub backup_root: PathBuf,
    pub timeouts: TimeoutConfig,
    pub verification: VerificationConfig,
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            download_dir: config.general.download_dir.clone(),
            backup_root: config.general.backup_dir.clone(),
            timeouts: config.timeouts.clone(),
            verification: config.verification.clone(),
        }
    }
}

type StageFailure = (UpdateStage, UpdateError);

/// Drives one server through stop, backup, deploy, start and verification.
pub(crate) struct UpdateOrchestrator {
    control: Arc<dyn ServiceControlPort>,
    ui: Arc<dyn UserInteractionPort>,
    interrupt: Arc<dyn InterruptSource>,
    deployer: DeploymentEngine,
    transfer: ArtifactTransfer,
    settings: OrchestratorSettings,
}

impl UpdateOrchestrator {
    pub(crate) fn new(
        control: Arc<dyn ServiceControlPort>,
        ui: Arc<dyn UserInteractionPort>,
        interrupt: Arc<dyn InterruptSource>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            control,
            deployer: DeploymentEngine::new(Arc::clone(&ui)),
            transfer: ArtifactTransfer::new(Arc::clone(&ui)),
            ui,
            interrupt,
            settings,
        }
    }

    /// Runs the update. The extraction directory and `archive_path` are removed
    /// on every exit path.
    pub(crate) async fn run(&self, session: &mut UpdateSession, archive_path: &Path) -> UpdateResult {
        let extract_dir = self.settings.download_dir.join(EXTRACT_DIR_NAME);
        let outcome = match self.stop_and_back_up(session).await {
            Ok(()) => self.deploy_and_verify(session, archive_path, &extract_dir).await,
            Err(failure) => Err(failure),
        };
        cleanup(&extract_dir, archive_path).await;

        let result = match outcome {
            Ok(skipped) => {
                session.stage_history.push(UpdateStage::Done);
                let backup = session.backup_path().unwrap_or_default();
                UpdateResult::success(backup, skipped)
            }
            Err((stage, e)) => self.fail(session, stage, e),
        };
        session.result = Some(result.clone());
        result
    }

    fn fail(&self, session: &mut UpdateSession, stage: UpdateStage, e: UpdateError) -> UpdateResult {
        error!("Update of '{}' failed during {:?}: {}", session.service.name, stage, e);
        self.ui.display_error(&e);
        session.stage_history.push(UpdateStage::Failed);
        UpdateResult::failure(stage, &e, session.backup_path())
    }

    fn step(&self, session: &mut UpdateSession, stage: UpdateStage, message: &str) {
        debug!("Entering {:?}", stage);
        session.stage_history.push(stage);
        self.ui.display_message(message, MessageLevel::Info);
    }

    async fn stop_and_back_up(&self, session: &mut UpdateSession) -> Result<(), StageFailure> {
        let name = session.service.name.clone();
        let timeouts = &self.settings.timeouts;

        self.step(session, UpdateStage::Stopping, &format!("Stopping service '{name}'..."));
        let already_stopped = matches!(
            self.control.query_status(&name).await,
            Ok(Some(ServiceStatus::Stopped))
        );
        if !already_stopped {
            self.control
                .stop(&name)
                .await
                .map_err(|e| (UpdateStage::Stopping, UpdateError::from(e)))?;
        }
        if !wait_for_status(
            self.control.as_ref(),
            &name,
            ServiceStatus::Stopped,
            timeouts.service_stop_timeout,
            timeouts.service_poll_interval,
        )
        .await
        {
            return Err((
                UpdateStage::Stopping,
                ServiceControlError::StatusTimeout {
                    name,
                    target: ServiceStatus::Stopped,
                    waited: timeouts.service_stop_timeout,
                }
                .into(),
            ));
        }
        self.ui.display_message("Service stopped.", MessageLevel::Success);

        self.step(session, UpdateStage::BackingUp, "Moving current files into a backup...");
        match BackupManager::create_backup(
            &session.service.server_dir,
            &self.settings.backup_root,
            &BACKUP_FOLDERS,
        )
        .await
        {
            Ok(record) => {
                self.ui.display_message(
                    &format!("Backup created at {}", record.target_dir.display()),
                    MessageLevel::Success,
                );
                session.backup = Some(record);
                Ok(())
            }
            Err(e) => {
                warn!("Backup failed, starting '{}' again", name);
                if let Err(start_err) = self.control.start(&name).await {
                    error!("Could not restart '{}' after failed backup: {}", name, start_err);
                }
                Err((UpdateStage::BackingUp, e.into()))
            }
        }
    }

    /// `Ok(true)` when the service started but log monitoring was skipped.
    async fn deploy_and_verify(
        &self,
        session: &mut UpdateSession,
        archive_path: &Path,
        extract_dir: &Path,
    ) -> Result<bool, StageFailure> {
        let server_dir = session.service.server_dir.clone();
        let name = session.service.name.clone();
        let backup_dir = session.backup_path().unwrap_or_default();
        let timeouts = self.settings.timeouts.clone();

        self.step(session, UpdateStage::Extracting, "Extracting the release archive...");
        let source_root = self
            .deployer
            .extract(archive_path, extract_dir)
            .await
            .map_err(|e| (UpdateStage::Extracting, UpdateError::from(e)))?;

        self.step(session, UpdateStage::MigratingLibraries, "Checking for custom libraries...");
        let carried = self
            .deployer
            .migrate_custom_libraries(&backup_dir, &source_root)
            .await;
        if !carried.is_empty() {
            info!("Carried over {} custom libraries", carried.len());
        }

        self.step(session, UpdateStage::Deploying, "Deploying new files...");
        self.deployer
            .replace_folders(&source_root, &server_dir, &REPLACED_FOLDERS)
            .await
            .map_err(|e| (UpdateStage::Deploying, UpdateError::from(e)))?;
        self.ui.display_message("New files deployed.", MessageLevel::Success);

        self.step(session, UpdateStage::InstallingAuxiliaries, "Staging client installers...");
        let candidate = &session.artifact.candidate;
        let report = self
            .deployer
            .install_auxiliary_binaries(
                session.service.product_type,
                &server_dir,
                candidate.backend.as_ref(),
                &candidate.path,
                &self.transfer,
            )
            .await;
        if !report.all_successful() {
            self.ui.display_message(
                &format!("Some installers are missing: {}", report.missing.join(", ")),
                MessageLevel::Warning,
            );
        }

        self.step(session, UpdateStage::Starting, &format!("Starting service '{name}'..."));
        self.control
            .start(&name)
            .await
            .map_err(|e| (UpdateStage::Starting, UpdateError::from(e)))?;
        if !wait_for_status(
            self.control.as_ref(),
            &name,
            ServiceStatus::Running,
            timeouts.service_start_timeout,
            timeouts.service_poll_interval,
        )
        .await
        {
            return Err((
                UpdateStage::Starting,
                ServiceControlError::StatusTimeout {
                    name,
                    target: ServiceStatus::Running,
                    waited: timeouts.service_start_timeout,
                }
                .into(),
            ));
        }
        self.ui.display_message("Service started.", MessageLevel::Success);

        self.step(session, UpdateStage::AwaitingLogFile, "Waiting for the startup log...");
        let logs_dir = server_dir.join("logs");
        if let Err(e) = tokio::fs::create_dir_all(&logs_dir).await {
            warn!("Could not create {:?}: {}", logs_dir, e);
        }
        let verifier = LogVerifier::new(
            logs_dir.join(&self.settings.verification.log_file),
            self.settings.verification.success_marker.clone(),
            timeouts.log_poll_interval,
        );
        verifier
            .await_log_file(timeouts.log_file_timeout)
            .await
            .map_err(|e| (UpdateStage::AwaitingLogFile, UpdateError::from(e)))?;

        if !self.should_watch_log().await {
            self.step(session, UpdateStage::Skipped, "Log monitoring skipped.");
            return Ok(true);
        }

        self.step(
            session,
            UpdateStage::MonitoringLog,
            "Watching the startup log. Press Ctrl+C to stop watching.",
        );
        let mut watch = verifier.watch();
        watch.start(Arc::clone(&self.ui));
        match watch
            .supervise(timeouts.log_timeout, self.interrupt.as_ref())
            .await
        {
            Ok(WatchOutcome::Verified) => {
                self.ui.display_message(
                    "Update finished: the server reported a successful start.",
                    MessageLevel::Success,
                );
                Ok(false)
            }
            Ok(WatchOutcome::Skipped) => {
                self.step(session, UpdateStage::Skipped, "Log monitoring interrupted.");
                Ok(true)
            }
            Err(e) => Err((UpdateStage::MonitoringLog, e.into())),
        }
    }

    async fn should_watch_log(&self) -> bool {
        match self.settings.verification.watch_log {
            PromptPolicy::Always => true,
            PromptPolicy::Never => false,
            PromptPolicy::Ask => match self
                .ui
                .confirm("Show the startup log until the server reports success?", true)
                .await
            {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("No answer on log monitoring ({}), skipping it", e);
                    false
                }
            },
        }
    }
}

async fn cleanup(extract_dir: &Path, archive_path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(extract_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {:?}: {}", extract_dir, e);
        }
    }
    if let Err(e) = tokio::fs::remove_file(archive_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {:?}: {}", archive_path, e);
        }
    }
    debug!("Temporary update files removed");
}
