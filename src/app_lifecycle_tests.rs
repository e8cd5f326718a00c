#[cfg(test)]
mod tests {
    use crate::app_lifecycle::{AppLifecycleManager, RunOptions};
    use crate::config::models::{AppConfig, PromptPolicy};
    use crate::core::error::{DiscoveryError, UpdateError};
    use crate::core::tests::mock_providers::{
        MemoryBackend, MockServiceControl, ScriptedInteraction, ScriptedInterrupt,
    };
    use crate::core::tests::test_utils::{fast_timeouts, installed_server, release_zip};
    use crate::core::types::{ServiceDescriptor, ServiceStatus};
    use crate::ports::SourceBackend;

    use assert_matches::assert_matches;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const ROOT: &str = "/distr/iiko";
    const SERVICE: &str = "iikoRMS";
    const UPLOAD_DIR: &str = "/temp/update_backups";

    struct Fixture {
        dir: TempDir,
        descriptor: ServiceDescriptor,
        backend: Arc<MemoryBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let descriptor = installed_server(dir.path(), SERVICE);

            let staged = dir.path().join("staged.zip");
            release_zip(&staged, None, &["exploded", "tools", "tomcat9"]);
            let archive = fs::read(&staged).unwrap();
            fs::remove_file(&staged).unwrap();

            let backend = Arc::new(
                MemoryBackend::new(ROOT)
                    .with_file(&format!("{ROOT}/9.1/iikoRMS_9.1.zip"), &archive)
                    .with_file(&format!("{ROOT}/9.1/Setup.Front.exe"), b"front")
                    .with_file(&format!("{ROOT}/9.1/Setup.RMS.BackOffice.exe"), b"bo")
                    .with_dir(&format!("{ROOT}/drafts")),
            );
            Self {
                dir,
                descriptor,
                backend,
            }
        }

        fn config(&self) -> AppConfig {
            let mut config = AppConfig::default();
            config.general.download_dir = self.dir.path().join("downloads");
            config.general.backup_dir = self.dir.path().join("backups");
            config.timeouts = fast_timeouts();
            config.verification.watch_log = PromptPolicy::Never;
            config
        }

        fn control(&self) -> MockServiceControl {
            MockServiceControl::new().with_service(self.descriptor.clone())
        }

        fn backends(&self) -> Vec<Arc<dyn SourceBackend>> {
            let backend: Arc<dyn SourceBackend> = self.backend.clone();
            vec![backend]
        }

        fn manager(
            &self,
            config: AppConfig,
            control: Arc<MockServiceControl>,
            ui: Arc<ScriptedInteraction>,
            options: RunOptions,
        ) -> AppLifecycleManager {
            AppLifecycleManager::new(
                config,
                control,
                ui,
                Arc::new(ScriptedInterrupt::never()),
                options,
            )
        }
    }

    fn by_name() -> RunOptions {
        RunOptions {
            server: Some(SERVICE.to_string()),
            release: Some("FTP 9.1".to_string()),
        }
    }

    fn write_log_after_start(control: Arc<MockServiceControl>, server_dir: &Path) {
        let log: PathBuf = server_dir.join("logs").join("startup.log");
        let started = format!("start:{SERVICE}");
        tokio::spawn(async move {
            while !control.calls().contains(&started) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            fs::create_dir_all(log.parent().unwrap()).unwrap();
            fs::write(&log, "INFO STARTED_SUCCESSFULLY\n").unwrap();
        });
    }

    #[tokio::test]
    async fn test_unverified_update_uploads_backup() {
        let fixture = Fixture::new();
        let control = Arc::new(fixture.control());
        let ui = Arc::new(ScriptedInteraction::default().with_confirm(true));
        write_log_after_start(Arc::clone(&control), &fixture.descriptor.server_dir);

        let manager = fixture.manager(fixture.config(), control.clone(), ui.clone(), by_name());
        let result = manager.run(fixture.backends()).await.unwrap();

        assert!(result.succeeded, "{:?}", result.error);
        assert!(result.log_monitoring_skipped);
        assert_eq!(control.status_of(SERVICE), Some(ServiceStatus::Running));

        let uploaded = fixture.backend.list(UPLOAD_DIR).await.unwrap();
        assert_eq!(uploaded.len(), 1);
        assert!(uploaded[0].starts_with("iikoRMS_backup_"));
        assert!(!result.backup_path.unwrap().exists());
        assert!(fixture.backend.is_closed());
    }

    #[tokio::test]
    async fn test_no_servers_is_fatal_and_closes_sources() {
        let fixture = Fixture::new();
        let control = Arc::new(MockServiceControl::new());
        let ui = Arc::new(ScriptedInteraction::default());

        let manager = fixture.manager(fixture.config(), control, ui, RunOptions::default());
        assert_matches!(
            manager.run(fixture.backends()).await,
            Err(UpdateError::Discovery(DiscoveryError::NoServers { .. }))
        );
        assert!(fixture.backend.is_closed());
    }

    #[tokio::test]
    async fn test_no_sources_is_fatal() {
        let fixture = Fixture::new();
        let control = Arc::new(fixture.control());
        let ui = Arc::new(ScriptedInteraction::default());

        let manager = fixture.manager(fixture.config(), control.clone(), ui, RunOptions::default());
        assert_matches!(
            manager.run(Vec::new()).await,
            Err(UpdateError::Discovery(DiscoveryError::NoSources))
        );
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_release_label() {
        let fixture = Fixture::new();
        let control = Arc::new(fixture.control());
        let ui = Arc::new(ScriptedInteraction::default());
        let options = RunOptions {
            release: Some("SMB 9.1".to_string()),
            ..by_name()
        };

        let manager = fixture.manager(fixture.config(), control, ui, options);
        assert_matches!(
            manager.run(fixture.backends()).await,
            Err(UpdateError::Discovery(DiscoveryError::UnknownRelease(label))) if label == "SMB 9.1"
        );
    }

    #[tokio::test]
    async fn test_declined_plan_leaves_service_alone() {
        let fixture = Fixture::new();
        let control = Arc::new(fixture.control());
        let ui = Arc::new(
            ScriptedInteraction::default()
                .with_select(0)
                .with_select(0)
                .with_confirm(false),
        );

        let manager = fixture.manager(fixture.config(), control.clone(), ui.clone(), RunOptions::default());
        assert_matches!(
            manager.run(fixture.backends()).await,
            Err(UpdateError::Cancelled)
        );
        assert!(control.calls().is_empty());
        assert!(!fixture.dir.path().join("downloads").exists());
        assert!(
            ui.messages()
                .iter()
                .any(|(_, text)| text.contains("iikoRMS_9.1.zip"))
        );
    }

    #[tokio::test]
    async fn test_preflight_switches_account_to_local_system() {
        let fixture = Fixture::new();
        let control = Arc::new(fixture.control().with_logon_account(SERVICE, ".\\iiko"));
        let ui = Arc::new(
            ScriptedInteraction::default()
                .with_confirm(true)
                .with_confirm(false),
        );

        let manager = fixture.manager(fixture.config(), control.clone(), ui, by_name());
        assert_matches!(
            manager.run(fixture.backends()).await,
            Err(UpdateError::Cancelled)
        );
        assert_eq!(control.calls(), vec![format!("set_logon:{SERVICE}")]);
    }

    #[tokio::test]
    async fn test_preflight_refusal_ends_run() {
        let fixture = Fixture::new();
        let control = Arc::new(fixture.control().with_logon_account(SERVICE, ".\\iiko"));
        let ui = Arc::new(
            ScriptedInteraction::default()
                .with_confirm(false)
                .with_confirm(false),
        );

        let manager = fixture.manager(fixture.config(), control.clone(), ui, by_name());
        assert_matches!(
            manager.run(fixture.backends()).await,
            Err(UpdateError::Cancelled)
        );
        assert!(control.calls().is_empty());
    }
}
