use crate::config::models::{AppConfig, PromptPolicy};
use crate::core::error::{DiscoveryError, UpdateError, UserInputError};
use crate::core::offsite::{BackupUploader, UploadOutcome};
use crate::core::orchestrator::{OrchestratorSettings, UpdateOrchestrator};
use crate::core::repository::{Catalog, SourceRepository};
use crate::core::transfer::ArtifactTransfer;
use crate::core::types::{
    LogonAccount, MessageLevel, SelectedArtifact, ServiceDescriptor, UpdateResult, UpdateSession,
};
use crate::ports::{InterruptSource, ServiceControlPort, SourceBackend, UserInteractionPort};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Choices that can be made on the command line instead of interactively.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunOptions {
    pub server: Option<String>,
    pub release: Option<String>,
}

/// One interactive update run: discovery, selection, download, update and backup upload.
pub(crate) struct AppLifecycleManager {
    config: AppConfig,
    control: Arc<dyn ServiceControlPort>,
    user_interaction: Arc<dyn UserInteractionPort>,
    interrupt: Arc<dyn InterruptSource>,
    options: RunOptions,
}

impl AppLifecycleManager {
    pub(crate) fn new(
        config: AppConfig,
        control: Arc<dyn ServiceControlPort>,
        user_interaction: Arc<dyn UserInteractionPort>,
        interrupt: Arc<dyn InterruptSource>,
        options: RunOptions,
    ) -> Self {
        Self {
            config,
            control,
            user_interaction,
            interrupt,
            options,
        }
    }

    /// Runs the update against the already opened `backends`, closing them on every path.
    ///
    /// `Ok` carries the orchestrator's result, which may itself be a failure;
    /// `Err` means the run ended before the server was touched.
    pub(crate) async fn run(
        &self,
        backends: Vec<Arc<dyn SourceBackend>>,
    ) -> Result<UpdateResult, UpdateError> {
        let outcome = self.run_with_backends(&backends).await;
        for backend in &backends {
            if let Err(e) = backend.close().await {
                warn!("Closing {} source failed: {}", backend.kind().label(), e);
            }
        }
        outcome
    }

    async fn run_with_backends(
        &self,
        backends: &[Arc<dyn SourceBackend>],
    ) -> Result<UpdateResult, UpdateError> {
        let ui = &self.user_interaction;

        let servers = self.control.discover(&self.config.services.keywords).await?;
        if servers.is_empty() {
            return Err(DiscoveryError::NoServers {
                keywords: self.config.services.keywords.clone(),
            }
            .into());
        }
        info!("Discovered {} server(s)", servers.len());

        let catalog = SourceRepository::build_catalog(backends).await?;
        ui.display_message(
            &format!("{} release version(s) available.", catalog.len()),
            MessageLevel::Info,
        );

        let service = self.choose_server(servers).await?;
        self.check_logon_account(&service).await?;

        let artifact = self.choose_release(&catalog, &service).await?;
        if !self.confirm_plan(&service, &artifact).await? {
            return Err(UpdateError::Cancelled);
        }

        let transfer = ArtifactTransfer::new(Arc::clone(ui));
        let candidate = &artifact.candidate;
        let archive = transfer
            .retrieve(
                candidate.backend.as_ref(),
                &candidate.path,
                &artifact.chosen_archive_name,
                &self.config.general.download_dir,
            )
            .await?;

        let backend = Arc::clone(&candidate.backend);
        let mut session = UpdateSession::new(service, artifact);
        let orchestrator = UpdateOrchestrator::new(
            Arc::clone(&self.control),
            Arc::clone(ui),
            Arc::clone(&self.interrupt),
            OrchestratorSettings::from(&self.config),
        );
        let result = orchestrator.run(&mut session, &archive).await;

        match (&result.backup_path, result.succeeded) {
            (Some(backup), true) => {
                self.offer_upload(&transfer, backend.as_ref(), backup, &session.service.name, &result)
                    .await
            }
            (Some(backup), false) => ui.display_message(
                &format!("The previous installation is kept at {}", backup.display()),
                MessageLevel::Warning,
            ),
            (None, _) => {}
        }
        Ok(result)
    }

    async fn choose_server(
        &self,
        servers: Vec<ServiceDescriptor>,
    ) -> Result<ServiceDescriptor, UpdateError> {
        if let Some(wanted) = &self.options.server {
            return servers
                .into_iter()
                .find(|s| s.name.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| DiscoveryError::UnknownServer(wanted.clone()).into());
        }

        let labels: Vec<String> = servers
            .iter()
            .map(|s| {
                format!(
                    "{} ({}) [{:?}] {}",
                    s.name,
                    s.display_name,
                    s.status,
                    s.server_dir.display()
                )
            })
            .collect();
        let index = self
            .user_interaction
            .select("Select the server to update:", labels)
            .await?;
        servers
            .into_iter()
            .nth(index)
            .ok_or_else(|| UserInputError::InvalidFormat(format!("no server #{index}")).into())
    }

    /// The server must run as LocalSystem; anything else needs the operator's consent.
    async fn check_logon_account(&self, service: &ServiceDescriptor) -> Result<(), UpdateError> {
        let ui = &self.user_interaction;
        let account = match self.control.query_logon_account(&service.name).await {
            Ok(account) => account,
            Err(e) => {
                warn!("Logon account of '{}' unknown: {}", service.name, e);
                None
            }
        };
        if account.as_deref().is_some_and(LogonAccount::is_local_system) {
            debug!("'{}' runs as LocalSystem", service.name);
            return Ok(());
        }

        ui.display_message(
            &format!(
                "Service '{}' logs on as '{}' instead of LocalSystem.",
                service.name,
                account.as_deref().unwrap_or("unknown")
            ),
            MessageLevel::Warning,
        );
        if ui.confirm("Switch the service to LocalSystem?", true).await? {
            match self
                .control
                .set_logon_account(&service.name, &LogonAccount::LocalSystem)
                .await
            {
                Ok(()) => {
                    ui.display_message("Logon account set to LocalSystem.", MessageLevel::Success);
                    return Ok(());
                }
                Err(e) => ui.display_error(&e),
            }
        }
        if ui
            .confirm("Continue the update with the current account?", false)
            .await?
        {
            Ok(())
        } else {
            Err(UpdateError::Cancelled)
        }
    }

    async fn choose_release(
        &self,
        catalog: &Catalog,
        service: &ServiceDescriptor,
    ) -> Result<SelectedArtifact, UpdateError> {
        let candidate = match &self.options.release {
            Some(label) => catalog
                .get(label)
                .ok_or_else(|| DiscoveryError::UnknownRelease(label.clone()))?,
            None => {
                let ordered = catalog.ordered();
                let labels = ordered.iter().map(|c| c.label()).collect();
                let index = self
                    .user_interaction
                    .select(
                        &format!("Select the {} release to install:", service.product_type),
                        labels,
                    )
                    .await?;
                ordered
                    .get(index)
                    .copied()
                    .ok_or_else(|| UserInputError::InvalidFormat(format!("no release #{index}")))?
            }
        };
        Ok(SourceRepository::select_archive(candidate, service.product_type)?)
    }

    async fn confirm_plan(
        &self,
        service: &ServiceDescriptor,
        artifact: &SelectedArtifact,
    ) -> Result<bool, UpdateError> {
        let ui = &self.user_interaction;
        let summary = [
            format!("Server:   {} ({})", service.name, service.product_type),
            format!("Location: {}", service.server_dir.display()),
            format!("Release:  {}", artifact.candidate.label()),
            format!("Archive:  {}", artifact.chosen_archive_name),
            format!("Backups:  {}", self.config.general.backup_dir.display()),
        ];
        for line in summary {
            ui.display_message(&line, MessageLevel::Info);
        }
        Ok(ui
            .confirm("The service will be stopped. Start the update?", false)
            .await?)
    }

    /// Upload is automatic when the start was not verified, so the backup leaves the host.
    async fn offer_upload(
        &self,
        transfer: &ArtifactTransfer,
        backend: &dyn SourceBackend,
        backup: &Path,
        service_name: &str,
        result: &UpdateResult,
    ) {
        let ui = &self.user_interaction;
        let upload = if result.log_monitoring_skipped {
            true
        } else {
            match self.config.upload.policy {
                PromptPolicy::Always => true,
                PromptPolicy::Never => false,
                PromptPolicy::Ask => ui
                    .confirm("Upload the backup to the release source?", false)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("No answer on backup upload ({}), keeping it locally", e);
                        false
                    }),
            }
        };
        if !upload {
            ui.display_message(
                &format!("Backup kept at {}", backup.display()),
                MessageLevel::Info,
            );
            return;
        }

        let uploader = BackupUploader::new(
            transfer,
            self.config.general.download_dir.clone(),
            self.config.upload.remote_dir.clone(),
        );
        match uploader.upload(backend, backup, service_name).await {
            Ok(UploadOutcome::Uploaded {
                remote_dir,
                archive_name,
            }) => ui.display_message(
                &format!(
                    "Backup uploaded to {} as {}",
                    backend.join(&remote_dir, &archive_name),
                    archive_name
                ),
                MessageLevel::Success,
            ),
            Ok(UploadOutcome::KeptLocally { archive, reason }) => ui.display_message(
                &format!(
                    "Backup upload failed ({reason}). Archive kept at {}, backup at {}",
                    archive.display(),
                    backup.display()
                ),
                MessageLevel::Warning,
            ),
            Err(e) => ui.display_message(
                &format!("Backup could not be archived ({e}). It is kept at {}", backup.display()),
                MessageLevel::Warning,
            ),
        }
    }
}
