pub(crate) mod ftp_backend;
pub(crate) mod share_backend;

use crate::config::models::SourcesConfig;
use crate::ports::SourceBackend;
use ftp_backend::FtpBackend;
use share_backend::ShareBackend;
use std::sync::Arc;
use tracing::warn;

/// Opens every configured backend. One that cannot be reached is reported and left out.
pub(crate) async fn open_backends(sources: &SourcesConfig) -> Vec<Arc<dyn SourceBackend>> {
    let mut backends: Vec<Arc<dyn SourceBackend>> = Vec::new();

    if let Some(ftp) = sources.ftp.as_ref().filter(|f| !f.url.trim().is_empty()) {
        match FtpBackend::connect(&ftp.url).await {
            Ok(backend) => backends.push(Arc::new(backend)),
            Err(e) => warn!("FTP source unavailable: {}", e),
        }
    }
    if let Some(share) = sources
        .share
        .as_ref()
        .filter(|s| !s.path.as_os_str().is_empty())
    {
        match ShareBackend::open(&share.path).await {
            Ok(backend) => backends.push(Arc::new(backend)),
            Err(e) => warn!("Share source unavailable: {}", e),
        }
    }
    backends
}

/// Joins `/`-separated remote paths.
pub(crate) fn slash_join(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

pub(crate) fn slash_parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rsplit_once('/') {
        Some(("", _)) => Some("/".to_string()),
        Some((head, _)) => Some(head.to_string()),
        None => None,
    }
}

/// Last path segment, for servers that answer NLST with full paths.
pub(crate) fn slash_basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_paths() {
        assert_eq!(slash_join("/", "9.1"), "/9.1");
        assert_eq!(slash_join("/distr/iiko", "9.1"), "/distr/iiko/9.1");
        assert_eq!(slash_parent("/distr/iiko/"), Some("/distr".to_string()));
        assert_eq!(slash_parent("/distr"), Some("/".to_string()));
        assert_eq!(slash_parent("/"), None);
        assert_eq!(slash_basename("/distr/iiko/9.1"), "9.1");
        assert_eq!(slash_basename("9.1"), "9.1");
    }
}
