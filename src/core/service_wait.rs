use crate::core::types::ServiceStatus;
use crate::ports::ServiceControlPort;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Polls `name` until it reports `target`. Returns `false` on timeout and
/// when the service disappears or cannot be queried.
pub(crate) async fn wait_for_status(
    control: &dyn ServiceControlPort,
    name: &str,
    target: ServiceStatus,
    timeout: Duration,
    poll_interval: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match control.query_status(name).await {
            Ok(Some(status)) if status == target => {
                debug!("Service '{}' reached {:?}", name, target);
                return true;
            }
            Ok(Some(status)) => debug!("Service '{}' is {:?}, waiting for {:?}", name, status, target),
            Ok(None) => {
                warn!("Service '{}' no longer exists", name);
                return false;
            }
            Err(e) => {
                warn!("Status query for '{}' failed: {}", name, e);
                return false;
            }
        }

        if Instant::now() >= deadline {
            warn!(
                "Service '{}' did not reach {:?} within {:?}",
                name, target, timeout
            );
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
