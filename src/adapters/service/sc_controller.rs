use crate::core::encoding::EncodingDecoder;
use crate::core::error::ServiceControlError;
use crate::core::types::{LogonAccount, ServiceDescriptor, ServiceStatus};
use crate::ports::ServiceControlPort;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, warn};

const SC_PROGRAM: &str = "sc.exe";
const ERROR_SERVICE_ALREADY_RUNNING: i32 = 1056;
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_NOT_ACTIVE: i32 = 1062;

/// One block of `sc query` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListedService {
    pub name: String,
    pub display_name: String,
    pub status: ServiceStatus,
}

#[derive(Debug)]
struct ScOutput {
    code: Option<i32>,
    text: String,
}

impl ScOutput {
    fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn failed(&self) -> bool {
        !self.success()
    }

    /// Win32 error code, from the exit status or the `FAILED <code>` line.
    fn error_code(&self) -> Option<i32> {
        match self.code {
            Some(code) if code != 0 => Some(code),
            _ => failed_code(&self.text),
        }
    }
}

/// Windows service manager through `sc.exe`.
pub(crate) struct ScController {
    program: String,
    decoder: EncodingDecoder,
}

impl ScController {
    pub(crate) fn new() -> Self {
        Self {
            program: SC_PROGRAM.to_string(),
            decoder: EncodingDecoder::command(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<ScOutput, ServiceControlError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("Running {}", command);
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| ServiceControlError::Spawn {
                command: command.clone(),
                source,
            })?;

        let mut text = self.decoder.decode_lossy(&output.stdout);
        if !output.stderr.is_empty() {
            text.push('\n');
            text.push_str(&self.decoder.decode_lossy(&output.stderr));
        }
        let result = ScOutput {
            code: output.status.code(),
            text,
        };
        if result.failed() {
            debug!("{} exited with {:?}", command, result.code);
        }
        Ok(result)
    }

    async fn run_checked(&self, args: &[&str]) -> Result<ScOutput, ServiceControlError> {
        let output = self.run(args).await?;
        if output.success() {
            return Ok(output);
        }
        if output.error_code() == Some(ERROR_SERVICE_DOES_NOT_EXIST) {
            return Err(ServiceControlError::NotFound(
                args.get(1).copied().unwrap_or_default().to_string(),
            ));
        }
        Err(command_failed(args, &output))
    }

    async fn query_config(&self, name: &str) -> Result<HashMap<String, String>, ServiceControlError> {
        let output = self.run_checked(&["qc", name]).await?;
        Ok(parse_key_values(&output.text))
    }
}

fn command_failed(args: &[&str], output: &ScOutput) -> ServiceControlError {
    let details = output
        .text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    ServiceControlError::CommandFailed {
        command: format!("{SC_PROGRAM} {}", args.join(" ")),
        details: if details.is_empty() {
            format!("exit code {:?}", output.code)
        } else {
            details
        },
    }
}

/// Splits `sc query` output into one entry per `SERVICE_NAME:` block.
pub(crate) fn parse_service_list(text: &str) -> Vec<ListedService> {
    let mut services = Vec::new();
    let mut current: Option<ListedService> = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "SERVICE_NAME" => {
                services.extend(current.take());
                current = Some(ListedService {
                    name: value.to_string(),
                    display_name: String::new(),
                    status: ServiceStatus::Unknown,
                });
            }
            "DISPLAY_NAME" => {
                if let Some(service) = current.as_mut() {
                    service.display_name = value.to_string();
                }
            }
            "STATE" => {
                if let Some(service) = current.as_mut() {
                    service.status = parse_state(value);
                }
            }
            _ => {}
        }
    }
    services.extend(current);
    services
}

/// `4  RUNNING` -> Running.
fn parse_state(value: &str) -> ServiceStatus {
    value
        .split_whitespace()
        .nth(1)
        .map(ServiceStatus::from_sc_token)
        .unwrap_or(ServiceStatus::Unknown)
}

/// `KEY : value` lines of `sc qc`, split on the first colon so drive letters survive.
pub(crate) fn parse_key_values(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty() && !key.contains(' '))
        .collect()
}

/// Executable part of `BINARY_PATH_NAME`: the quoted path, else everything up to `.exe`,
/// else the first token.
pub(crate) fn parse_binary_path(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(rest) = raw.strip_prefix('"') {
        return rest.split_once('"').map(|(path, _)| PathBuf::from(path));
    }
    if let Some(pos) = raw.to_ascii_lowercase().find(".exe") {
        return Some(PathBuf::from(&raw[..pos + 4]));
    }
    raw.split_whitespace().next().map(PathBuf::from)
}

fn failed_code(text: &str) -> Option<i32> {
    let (_, rest) = text.split_once("FAILED")?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn matches_keywords(service: &ListedService, keywords: &[String]) -> bool {
    let name = service.name.to_lowercase();
    let display = service.display_name.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .any(|k| name.contains(&k) || display.contains(&k))
}

#[async_trait]
impl ServiceControlPort for ScController {
    async fn discover(&self, keywords: &[String]) -> Result<Vec<ServiceDescriptor>, ServiceControlError> {
        let output = self
            .run_checked(&["query", "type=", "service", "state=", "all"])
            .await?;
        let listed = parse_service_list(&output.text);
        debug!("sc.exe reported {} services", listed.len());

        let mut found = Vec::new();
        for service in listed.iter().filter(|s| matches_keywords(s, keywords)) {
            let config = match self.query_config(&service.name).await {
                Ok(config) => config,
                Err(e) => {
                    warn!("Skipping service {}: {}", service.name, e);
                    continue;
                }
            };
            let Some(binary) = config
                .get("BINARY_PATH_NAME")
                .and_then(|raw| parse_binary_path(raw))
            else {
                debug!("Service {} has no binary path", service.name);
                continue;
            };
            match ServiceDescriptor::from_binary(
                &service.name,
                &service.display_name,
                service.status,
                &binary,
            ) {
                Some(descriptor) => {
                    info!(
                        "Found {} server {} at {}",
                        descriptor.product_type,
                        descriptor.name,
                        descriptor.server_dir.display()
                    );
                    found.push(descriptor);
                }
                None => debug!(
                    "Service {} binary {} is not an iiko server layout",
                    service.name,
                    binary.display()
                ),
            }
        }
        Ok(found)
    }

    async fn query_status(&self, name: &str) -> Result<Option<ServiceStatus>, ServiceControlError> {
        let output = self.run(&["query", name]).await?;
        if output.success() {
            return Ok(parse_service_list(&output.text)
                .into_iter()
                .next()
                .map(|s| s.status));
        }
        match output.error_code() {
            Some(ERROR_SERVICE_DOES_NOT_EXIST) => Ok(None),
            _ => Err(command_failed(&["query", name], &output)),
        }
    }

    async fn query_logon_account(&self, name: &str) -> Result<Option<String>, ServiceControlError> {
        let config = self.query_config(name).await?;
        Ok(config
            .get("SERVICE_START_NAME")
            .filter(|account| !account.is_empty())
            .cloned())
    }

    async fn set_logon_account(
        &self,
        name: &str,
        account: &LogonAccount,
    ) -> Result<(), ServiceControlError> {
        let (user, password) = match account {
            LogonAccount::LocalSystem => ("LocalSystem", ""),
            LogonAccount::User { username, password } => {
                if username.trim().is_empty() {
                    return Err(ServiceControlError::MissingCredentials(name.to_string()));
                }
                (username.as_str(), password.as_str())
            }
        };
        let output = self
            .run(&["config", name, "obj=", user, "password=", password])
            .await?;
        if output.failed() || output.text.contains("FAILED") {
            return Err(command_failed(&["config", name, "obj=", user], &output));
        }
        info!("Service {} now logs on as {}", name, user);
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), ServiceControlError> {
        let output = self.run(&["start", name]).await?;
        match output.error_code() {
            None => Ok(()),
            Some(ERROR_SERVICE_ALREADY_RUNNING) => {
                debug!("Service {} was already running", name);
                Ok(())
            }
            Some(ERROR_SERVICE_DOES_NOT_EXIST) => Err(ServiceControlError::NotFound(name.to_string())),
            Some(_) => Err(command_failed(&["start", name], &output)),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), ServiceControlError> {
        let output = self.run(&["stop", name]).await?;
        match output.error_code() {
            None => Ok(()),
            Some(ERROR_SERVICE_NOT_ACTIVE) => {
                debug!("Service {} was not running", name);
                Ok(())
            }
            Some(ERROR_SERVICE_DOES_NOT_EXIST) => Err(ServiceControlError::NotFound(name.to_string())),
            Some(_) => Err(command_failed(&["stop", name], &output)),
        }
    }
}
