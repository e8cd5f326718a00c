use crate::core::encoding::EncodingDecoder;
use crate::core::error::VerificationError;
use crate::ports::{InterruptSource, UserInteractionPort};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An unterminated line longer than this is cut down to a possible marker prefix.
const MAX_PENDING_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum WatchState {
    #[default]
    NotStarted,
    Watching,
    Succeeded,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchOutcome {
    Verified,
    /// The operator interrupted monitoring; the service was started but not confirmed.
    Skipped,
}

/// Confirms a service start by finding `marker` in its startup log.
#[derive(Debug, Clone)]
pub(crate) struct LogVerifier {
    log_path: PathBuf,
    marker: String,
    poll_interval: Duration,
    decoder: EncodingDecoder,
}

impl LogVerifier {
    pub(crate) fn new(log_path: PathBuf, marker: String, poll_interval: Duration) -> Self {
        Self {
            log_path,
            marker,
            poll_interval,
            decoder: EncodingDecoder::log(),
        }
    }

    pub(crate) fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Polls until the log file exists.
    pub(crate) async fn await_log_file(&self, timeout: Duration) -> Result<(), VerificationError> {
        let deadline = Instant::now() + timeout;
        loop {
            if tokio::fs::try_exists(&self.log_path).await.unwrap_or(false) {
                info!("Log file {:?} is present", self.log_path);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(VerificationError::LogFileTimeout {
                    path: self.log_path.clone(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub(crate) fn watch(&self) -> LogWatch {
        LogWatch {
            verifier: self.clone(),
            state: WatchState::NotStarted,
            cancel: CancellationToken::new(),
            success_rx: None,
            handle: None,
        }
    }
}

/// Handle on the background tailing task. The task only lives between
/// [`LogWatch::start`] and the end of [`LogWatch::supervise`].
pub(crate) struct LogWatch {
    verifier: LogVerifier,
    state: WatchState,
    cancel: CancellationToken,
    success_rx: Option<oneshot::Receiver<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LogWatch {
    pub(crate) fn state(&self) -> WatchState {
        self.state
    }

    pub(crate) fn worker_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub(crate) fn start(&mut self, ui: Arc<dyn UserInteractionPort>) {
        if self.state != WatchState::NotStarted {
            return;
        }
        let (success_tx, success_rx) = oneshot::channel();
        let worker = tail_log(
            self.verifier.clone(),
            self.cancel.clone(),
            success_tx,
            ui,
        );
        self.handle = Some(tokio::spawn(worker));
        self.success_rx = Some(success_rx);
        self.state = WatchState::Watching;
        debug!("Started watching {:?}", self.verifier.log_path);
    }

    /// Waits for the success marker, the `timeout`, or an operator interrupt,
    /// whichever comes first. The worker is always joined before returning.
    pub(crate) async fn supervise(
        &mut self,
        timeout: Duration,
        interrupt: &dyn InterruptSource,
    ) -> Result<WatchOutcome, VerificationError> {
        let Some(mut success_rx) = self.success_rx.take() else {
            return Err(VerificationError::Worker("watcher was not started".to_string()));
        };

        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(self.verifier.poll_interval);
        let mut interrupted = interrupt.interrupted();

        loop {
            tokio::select! {
                biased;
                _ = &mut interrupted => {
                    info!("Log monitoring interrupted by operator");
                    self.stop(&mut success_rx, WatchState::Cancelled).await;
                    return Ok(WatchOutcome::Skipped);
                }
                _ = ticker.tick() => {}
            }

            match success_rx.try_recv() {
                Ok(()) => {
                    self.state = WatchState::Succeeded;
                    self.join().await;
                    return Ok(WatchOutcome::Verified);
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => {
                    self.stop(&mut success_rx, WatchState::Cancelled).await;
                    return Err(VerificationError::Worker(
                        "watcher ended without a result".to_string(),
                    ));
                }
            }

            if Instant::now() >= deadline {
                self.stop(&mut success_rx, WatchState::TimedOut).await;
                return Err(VerificationError::MarkerTimeout {
                    marker: self.verifier.marker.clone(),
                    waited: timeout,
                });
            }
        }
    }

    /// Closing the receiver first means a late match can no longer be delivered.
    async fn stop(&mut self, success_rx: &mut oneshot::Receiver<()>, state: WatchState) {
        success_rx.close();
        self.cancel.cancel();
        self.join().await;
        self.state = state;
    }

    async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Log watcher task failed: {}", e);
            }
        }
    }
}

async fn tail_log(
    verifier: LogVerifier,
    cancel: CancellationToken,
    success_tx: oneshot::Sender<()>,
    ui: Arc<dyn UserInteractionPort>,
) {
    let mut offset: u64 = 0;
    let mut pending: Vec<u8> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let mut found = false;
        match read_from(&verifier.log_path, offset).await {
            Ok(chunk) if !chunk.is_empty() => {
                offset += chunk.len() as u64;
                pending.extend_from_slice(&chunk);
                found = scan_pending(&mut pending, &verifier, ui.as_ref());
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Log file {:?} not present yet", verifier.log_path);
            }
            Err(e) => warn!("Reading {:?} failed: {}", verifier.log_path, e),
        }

        if found {
            if !cancel.is_cancelled() && success_tx.send(()).is_ok() {
                info!("Success marker found in {:?}", verifier.log_path);
            }
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(verifier.poll_interval) => {}
        }
    }
}

/// Consumes complete lines from `pending`, echoing them, and reports whether
/// the marker was seen. The unterminated tail stays for the next read.
fn scan_pending(pending: &mut Vec<u8>, verifier: &LogVerifier, ui: &dyn UserInteractionPort) -> bool {
    let mut found = false;
    if let Some(last_newline) = pending.iter().rposition(|b| *b == b'\n') {
        let complete: Vec<u8> = pending.drain(..=last_newline).collect();
        match verifier.decoder.decode(&complete) {
            Some(text) => {
                for line in text.lines() {
                    let line = line.trim_end_matches('\r');
                    ui.display_log_line(line);
                    found |= line.contains(&verifier.marker);
                }
            }
            None => debug!("Dropped {} undecodable log bytes", complete.len()),
        }
    }
    if !found && !pending.is_empty() {
        if let Some(tail) = verifier.decoder.decode(pending) {
            if tail.contains(&verifier.marker) {
                ui.display_log_line(&tail);
                pending.clear();
                found = true;
            }
        }
    }
    if !found && pending.len() > MAX_PENDING_BYTES {
        let keep = verifier.marker.len().min(pending.len());
        debug!("Dropped {} bytes of an unterminated log line", pending.len() - keep);
        pending.drain(..pending.len() - keep);
    }
    found
}

async fn read_from(path: &Path, offset: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    Ok(buf)
}
