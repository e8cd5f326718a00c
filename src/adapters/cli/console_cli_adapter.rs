use crate::core::error::UserInputError;
use crate::core::types::MessageLevel;
use crate::ports::{InterruptSource, TransferObserver, UserInteractionPort};
use async_trait::async_trait;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tracing::{debug, warn};

const SELECT_PAGE_SIZE: usize = 15;

pub(crate) struct ConsoleCliAdapter {
    colors_enabled: bool,
    assume_yes: bool,
}

impl ConsoleCliAdapter {
    pub(crate) fn new(colors_enabled: bool, assume_yes: bool) -> Self {
        Self {
            colors_enabled,
            assume_yes,
        }
    }

    fn colorize(&self, text: &str, color: Color) -> ColoredString {
        if self.colors_enabled {
            text.color(color)
        } else {
            text.normal()
        }
    }

    /// Blank line plus a bold heading, used between the interactive steps.
    pub(crate) fn display_heading(&self, title: &str) {
        println!();
        println!("{}", self.colorize(title, Color::Cyan).bold());
    }
}

async fn run_prompt<T, F>(prompt: F) -> Result<T, UserInputError>
where
    T: Send + 'static,
    F: FnOnce() -> inquire::error::InquireResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(prompt)
        .await
        .map_err(|e| UserInputError::ReadError(std::io::Error::other(e)))?
        .map_err(UserInputError::from)
}

#[async_trait]
impl UserInteractionPort for ConsoleCliAdapter {
    fn display_message(&self, message: &str, level: MessageLevel) {
        let level_str = format!("[{:<7}]", format!("{level:?}").to_uppercase());
        match level {
            MessageLevel::Error => {
                eprintln!("{} {}", self.colorize(&level_str, Color::Red), message)
            }
            MessageLevel::Warning => {
                println!("{} {}", self.colorize(&level_str, Color::Yellow), message)
            }
            MessageLevel::Success => {
                println!("{} {}", self.colorize(&level_str, Color::Green), message)
            }
            MessageLevel::Info => {
                println!("{} {}", self.colorize(&level_str, Color::Cyan), message)
            }
            MessageLevel::Debug => {
                println!("{} {}", self.colorize(&level_str, Color::Blue), message)
            }
        }
    }

    fn display_error(&self, error: &dyn std::error::Error) {
        eprintln!("{} {}", self.colorize("[ERROR]", Color::Red).bold(), error);
        let mut source = error.source();
        while let Some(src) = source {
            eprintln!("  Caused by: {src}");
            source = src.source();
        }
    }

    fn display_log_line(&self, line: &str) {
        println!("{} {}", self.colorize("  log |", Color::BrightBlack), line);
    }

    fn transfer_observer(&self, label: &str, total: Option<u64>) -> Arc<dyn TransferObserver> {
        Arc::new(ProgressObserver::new(label, total))
    }

    async fn select(&self, prompt: &str, options: Vec<String>) -> Result<usize, UserInputError> {
        if options.is_empty() {
            return Err(UserInputError::CancelledOrEmpty);
        }
        let prompt = prompt.to_string();
        let chosen = run_prompt(move || {
            inquire::Select::new(&prompt, options)
                .with_page_size(SELECT_PAGE_SIZE)
                .raw_prompt()
        })
        .await?;
        debug!("Selected option {}: {}", chosen.index, chosen.value);
        Ok(chosen.index)
    }

    async fn multi_select(
        &self,
        prompt: &str,
        options: Vec<String>,
    ) -> Result<Vec<usize>, UserInputError> {
        if options.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = prompt.to_string();
        let chosen = run_prompt(move || {
            inquire::MultiSelect::new(&prompt, options)
                .with_page_size(SELECT_PAGE_SIZE)
                .raw_prompt()
        })
        .await?;
        Ok(chosen.into_iter().map(|option| option.index).collect())
    }

    async fn confirm(&self, prompt: &str, default: bool) -> Result<bool, UserInputError> {
        if self.assume_yes {
            println!("{} {}", prompt, self.colorize("yes (--yes)", Color::Green));
            return Ok(true);
        }
        let prompt = prompt.to_string();
        run_prompt(move || inquire::Confirm::new(&prompt).with_default(default).prompt()).await
    }
}

/// Byte progress bar for one download or upload.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new(label: &str, total: Option<u64>) -> Self {
        let (bar, template) = match total {
            Some(len) => (
                ProgressBar::new(len),
                "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            ),
            None => (
                ProgressBar::new_spinner(),
                "{spinner} {msg} {bytes} ({bytes_per_sec})",
            ),
        };
        match ProgressStyle::with_template(template) {
            Ok(style) => bar.set_style(style.progress_chars("=> ")),
            Err(e) => warn!("Progress bar template rejected: {}", e),
        }
        bar.set_message(label.to_string());
        Self { bar }
    }
}

impl TransferObserver for ProgressObserver {
    fn on_progress(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn on_complete(&self) {
        self.bar.finish();
    }
}

impl Drop for ProgressObserver {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Ctrl+C from the console.
///
/// Once tokio's handler is registered the default termination is gone for the
/// rest of the process, so a single listener owns the signal for the whole run.
/// It wakes the active watchers, or exits the process when nobody is watching.
#[derive(Default)]
pub(crate) struct CtrlCInterrupt {
    watchers: AtomicUsize,
    notify: Notify,
}

impl CtrlCInterrupt {
    pub(crate) fn install() -> Arc<Self> {
        let interrupt = Arc::new(Self::default());
        let listener = Arc::clone(&interrupt);
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Ctrl+C handler unavailable: {}", e);
                    return;
                }
                if !listener.deliver() {
                    eprintln!("Interrupted.");
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            }
        });
        interrupt
    }

    /// Returns false when no watcher took the interrupt.
    fn deliver(&self) -> bool {
        if self.watchers.load(Ordering::SeqCst) == 0 {
            return false;
        }
        debug!("Ctrl+C forwarded to the active watcher");
        self.notify.notify_waiters();
        true
    }
}

struct ActiveWatch<'a>(&'a AtomicUsize);

impl<'a> ActiveWatch<'a> {
    fn register(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveWatch<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InterruptSource for CtrlCInterrupt {
    async fn interrupted(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        let _watch = ActiveWatch::register(&self.watchers);
        notified.await;
    }
}
