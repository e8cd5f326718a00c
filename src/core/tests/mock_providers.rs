use crate::core::error::{ServiceControlError, SourceError, UserInputError};
use crate::core::types::{
    BackendKind, EntryKind, LogonAccount, MessageLevel, ServiceDescriptor, ServiceStatus,
};
use crate::ports::{
    InterruptSource, NoopObserver, ServiceControlPort, SourceBackend, TransferObserver,
    UserInteractionPort,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// `/`-separated namespace held in memory, standing in for either backend kind.
pub(crate) struct MemoryBackend {
    kind: BackendKind,
    root: String,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    fail_stores: bool,
    fail_listing: bool,
    unlistable: BTreeSet<String>,
    unclassifiable: BTreeSet<String>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub(crate) fn new(root: &str) -> Self {
        let backend = Self {
            kind: BackendKind::Ftp,
            root: root.to_string(),
            files: Mutex::new(BTreeMap::new()),
            dirs: Mutex::new(BTreeSet::new()),
            fail_stores: false,
            fail_listing: false,
            unlistable: BTreeSet::new(),
            unclassifiable: BTreeSet::new(),
            closed: AtomicBool::new(false),
        };
        backend.add_dir_chain(root);
        backend
    }

    pub(crate) fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn with_file(self, path: &str, content: &[u8]) -> Self {
        if let Some(parent) = self.parent(path) {
            self.add_dir_chain(&parent);
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
        self
    }

    pub(crate) fn with_dir(self, path: &str) -> Self {
        self.add_dir_chain(path);
        self
    }

    pub(crate) fn failing_stores(mut self) -> Self {
        self.fail_stores = true;
        self
    }

    pub(crate) fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// NLST of `dir` answers 550, as FTP servers do for an empty directory.
    pub(crate) fn unlistable(mut self, dir: &str) -> Self {
        self.unlistable.insert(dir.to_string());
        self
    }

    pub(crate) fn unclassifiable(mut self, path: &str) -> Self {
        self.unclassifiable.insert(path.to_string());
        self
    }

    pub(crate) fn has_file(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn add_dir_chain(&self, path: &str) {
        let mut dirs = self.dirs.lock().unwrap();
        let mut current = Some(path.to_string());
        while let Some(dir) = current {
            current = self.parent(&dir);
            dirs.insert(dir);
        }
    }

    fn protocol_error(operation: &'static str, path: &str) -> SourceError {
        SourceError::Protocol {
            operation,
            path: path.to_string(),
            details: "550 No such file or directory".to_string(),
        }
    }
}

#[async_trait]
impl SourceBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn join(&self, base: &str, name: &str) -> String {
        if base.ends_with('/') {
            format!("{base}{name}")
        } else {
            format!("{base}/{name}")
        }
    }

    fn parent(&self, path: &str) -> Option<String> {
        let trimmed = path.trim_end_matches('/');
        let (head, _) = trimmed.rsplit_once('/')?;
        if head.is_empty() {
            if trimmed.is_empty() {
                None
            } else {
                Some("/".to_string())
            }
        } else {
            Some(head.to_string())
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, SourceError> {
        if self.fail_listing {
            return Err(SourceError::Connection {
                endpoint: self.root.clone(),
                details: "421 Service not available".to_string(),
            });
        }
        if self.unlistable.contains(dir) {
            return Err(SourceError::Protocol {
                operation: "NLST",
                path: dir.to_string(),
                details: "550 No files found".to_string(),
            });
        }
        if !self.dirs.lock().unwrap().contains(dir) {
            return Err(Self::protocol_error("NLST", dir));
        }
        let direct_child = |path: &String| {
            (self.parent(path).as_deref() == Some(dir))
                .then(|| path.rsplit('/').next().unwrap_or_default().to_string())
        };
        let mut names: Vec<String> = self
            .dirs
            .lock()
            .unwrap()
            .iter()
            .filter_map(direct_child)
            .collect();
        names.extend(self.files.lock().unwrap().keys().filter_map(direct_child));
        Ok(names)
    }

    async fn classify(&self, path: &str) -> Result<EntryKind, SourceError> {
        if self.unclassifiable.contains(path) {
            return Err(Self::protocol_error("CWD", path));
        }
        if self.dirs.lock().unwrap().contains(path) {
            Ok(EntryKind::Directory)
        } else if self.files.lock().unwrap().contains_key(path) {
            Ok(EntryKind::File)
        } else {
            Ok(EntryKind::Missing)
        }
    }

    async fn size(&self, path: &str) -> Result<Option<u64>, SourceError> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(path)
            .map(|content| content.len() as u64))
    }

    async fn retrieve(
        &self,
        remote_path: &str,
        dest: &Path,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<u64, SourceError> {
        let content = self
            .files
            .lock()
            .unwrap()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| Self::protocol_error("RETR", remote_path))?;
        tokio::fs::write(dest, &content)
            .await
            .map_err(|e| SourceError::Io {
                path: dest.display().to_string(),
                source: e,
            })?;
        observer.on_progress(content.len() as u64);
        Ok(content.len() as u64)
    }

    async fn ensure_dir(&self, remote_dir: &str) -> Result<(), SourceError> {
        self.add_dir_chain(remote_dir);
        Ok(())
    }

    async fn store(
        &self,
        local_path: &Path,
        remote_dir: &str,
        name: &str,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<u64, SourceError> {
        let target = self.join(remote_dir, name);
        if self.fail_stores {
            return Err(SourceError::Protocol {
                operation: "STOR",
                path: target,
                details: "452 Insufficient storage".to_string(),
            });
        }
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| SourceError::Io {
                path: local_path.display().to_string(),
                source: e,
            })?;
        let len = content.len() as u64;
        self.files.lock().unwrap().insert(target, content);
        observer.on_progress(len);
        Ok(len)
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Service manager double. `stop` and `start` flip the recorded status unless told to fail.
#[derive(Default)]
pub(crate) struct MockServiceControl {
    services: Vec<ServiceDescriptor>,
    statuses: Mutex<HashMap<String, ServiceStatus>>,
    scripts: Mutex<HashMap<String, VecDeque<ServiceStatus>>>,
    logon_accounts: Mutex<HashMap<String, String>>,
    fail_stop: bool,
    hang_on_start: bool,
    calls: Mutex<Vec<String>>,
}

impl MockServiceControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_service(mut self, descriptor: ServiceDescriptor) -> Self {
        self.statuses
            .get_mut()
            .unwrap()
            .insert(descriptor.name.clone(), descriptor.status);
        self.logon_accounts
            .get_mut()
            .unwrap()
            .insert(descriptor.name.clone(), "LocalSystem".to_string());
        self.services.push(descriptor);
        self
    }

    /// Successive `query_status` answers; the last one repeats.
    pub(crate) fn with_status_script(self, name: &str, script: Vec<ServiceStatus>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), script.into());
        self
    }

    pub(crate) fn with_logon_account(self, name: &str, account: &str) -> Self {
        self.logon_accounts
            .lock()
            .unwrap()
            .insert(name.to_string(), account.to_string());
        self
    }

    pub(crate) fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub(crate) fn hanging_start(mut self) -> Self {
        self.hang_on_start = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn status_of(&self, name: &str) -> Option<ServiceStatus> {
        self.statuses.lock().unwrap().get(name).copied()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ServiceControlPort for MockServiceControl {
    async fn discover(&self, keywords: &[String]) -> Result<Vec<ServiceDescriptor>, ServiceControlError> {
        Ok(self
            .services
            .iter()
            .filter(|s| {
                keywords.iter().any(|k| {
                    let k = k.to_lowercase();
                    s.name.to_lowercase().contains(&k) || s.display_name.to_lowercase().contains(&k)
                })
            })
            .cloned()
            .collect())
    }

    async fn query_status(&self, name: &str) -> Result<Option<ServiceStatus>, ServiceControlError> {
        if let Some(script) = self.scripts.lock().unwrap().get_mut(name) {
            let status = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().copied()
            };
            return Ok(status);
        }
        Ok(self.status_of(name))
    }

    async fn query_logon_account(&self, name: &str) -> Result<Option<String>, ServiceControlError> {
        Ok(self.logon_accounts.lock().unwrap().get(name).cloned())
    }

    async fn set_logon_account(
        &self,
        name: &str,
        account: &LogonAccount,
    ) -> Result<(), ServiceControlError> {
        self.record(format!("set_logon:{name}"));
        let value = match account {
            LogonAccount::LocalSystem => "LocalSystem".to_string(),
            LogonAccount::User { username, .. } => username.clone(),
        };
        self.logon_accounts
            .lock()
            .unwrap()
            .insert(name.to_string(), value);
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), ServiceControlError> {
        self.record(format!("start:{name}"));
        let status = if self.hang_on_start {
            ServiceStatus::StartPending
        } else {
            ServiceStatus::Running
        };
        self.statuses.lock().unwrap().insert(name.to_string(), status);
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), ServiceControlError> {
        self.record(format!("stop:{name}"));
        if self.fail_stop {
            return Err(ServiceControlError::CommandFailed {
                command: format!("sc.exe stop {name}"),
                details: "[SC] ControlService FAILED 1051".to_string(),
            });
        }
        self.statuses
            .lock()
            .unwrap()
            .insert(name.to_string(), ServiceStatus::Stopped);
        Ok(())
    }
}

/// Answers prompts from queues and records everything shown.
#[derive(Default)]
pub(crate) struct ScriptedInteraction {
    selections: Mutex<VecDeque<usize>>,
    multi_selections: Mutex<VecDeque<Vec<usize>>>,
    confirmations: Mutex<VecDeque<bool>>,
    messages: Mutex<Vec<(MessageLevel, String)>>,
    errors: Mutex<Vec<String>>,
    log_lines: Mutex<Vec<String>>,
    multi_select_calls: AtomicUsize,
}

impl ScriptedInteraction {
    pub(crate) fn with_select(self, index: usize) -> Self {
        self.selections.lock().unwrap().push_back(index);
        self
    }

    pub(crate) fn with_multi_select(self, indices: Vec<usize>) -> Self {
        self.multi_selections.lock().unwrap().push_back(indices);
        self
    }

    pub(crate) fn with_confirm(self, answer: bool) -> Self {
        self.confirmations.lock().unwrap().push_back(answer);
        self
    }

    pub(crate) fn messages(&self) -> Vec<(MessageLevel, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub(crate) fn log_lines(&self) -> Vec<String> {
        self.log_lines.lock().unwrap().clone()
    }

    pub(crate) fn multi_select_calls(&self) -> usize {
        self.multi_select_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserInteractionPort for ScriptedInteraction {
    fn display_message(&self, message: &str, level: MessageLevel) {
        self.messages
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }

    fn display_error(&self, error: &dyn std::error::Error) {
        self.errors.lock().unwrap().push(error.to_string());
    }

    fn display_log_line(&self, line: &str) {
        self.log_lines.lock().unwrap().push(line.to_string());
    }

    fn transfer_observer(&self, _label: &str, _total: Option<u64>) -> Arc<dyn TransferObserver> {
        Arc::new(NoopObserver)
    }

    async fn select(&self, _prompt: &str, options: Vec<String>) -> Result<usize, UserInputError> {
        match self.selections.lock().unwrap().pop_front() {
            Some(index) if index < options.len() => Ok(index),
            Some(index) => Err(UserInputError::InvalidFormat(format!(
                "index {index} out of {} options",
                options.len()
            ))),
            None => Err(UserInputError::CancelledOrEmpty),
        }
    }

    async fn multi_select(
        &self,
        _prompt: &str,
        _options: Vec<String>,
    ) -> Result<Vec<usize>, UserInputError> {
        self.multi_select_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .multi_selections
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn confirm(&self, _prompt: &str, default: bool) -> Result<bool, UserInputError> {
        Ok(self
            .confirmations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(default))
    }
}

/// Fires once after a delay, or never.
pub(crate) struct ScriptedInterrupt {
    delay: Option<Duration>,
}

impl ScriptedInterrupt {
    pub(crate) fn never() -> Self {
        Self { delay: None }
    }

    pub(crate) fn after(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

#[async_trait]
impl InterruptSource for ScriptedInterrupt {
    async fn interrupted(&self) {
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending::<()>().await,
        }
    }
}
