use crate::core::error::{DiscoveryError, SelectionError, SourceError};
use crate::core::types::{EntryKind, ProductType, SelectedArtifact, VersionCandidate};
use crate::ports::SourceBackend;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static VERSION_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9.]+$").unwrap_or_else(|e| panic!("invalid version pattern: {e}"))
});

const ARCHIVE_EXTENSION: &str = ".zip";

pub(crate) fn is_version_dir_name(name: &str) -> bool {
    VERSION_DIR_RE.is_match(name)
}

/// A release archive carries `.zip` and the keyword of at least one product.
pub(crate) fn is_release_archive(name: &str) -> bool {
    let lowered = name.to_lowercase();
    lowered.ends_with(ARCHIVE_EXTENSION)
        && ProductType::ALL
            .iter()
            .any(|product| lowered.contains(product.keyword()))
}

/// Union of the versions offered by every reachable backend, keyed by a
/// backend-prefixed label such as `FTP 9.1.2` or `SMB 9.2`.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    entries: BTreeMap<String, VersionCandidate>,
}

impl Catalog {
    pub(crate) fn insert(&mut self, candidate: VersionCandidate) {
        self.entries.insert(candidate.label(), candidate);
    }

    pub(crate) fn get(&self, label: &str) -> Option<&VersionCandidate> {
        self.entries.get(label)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Display order: backend first, then numeric version components.
    pub(crate) fn ordered(&self) -> Vec<&VersionCandidate> {
        let mut candidates: Vec<&VersionCandidate> = self.entries.values().collect();
        candidates.sort_by(|a, b| {
            a.backend
                .kind()
                .cmp(&b.backend.kind())
                .then_with(|| a.version_key().cmp(&b.version_key()))
        });
        candidates
    }
}

pub(crate) struct SourceRepository;

impl SourceRepository {
    /// Lists version directories directly under the backend root. Entries that
    /// are not numeric directories, or hold no release archive, are left out.
    /// Only a failed listing of the root itself is an error.
    pub(crate) async fn scan(
        backend: &Arc<dyn SourceBackend>,
    ) -> Result<Vec<VersionCandidate>, SourceError> {
        let root = backend.root().to_string();
        let kind = backend.kind();
        debug!("Scanning {} root '{}'", kind.label(), root);

        let mut candidates = Vec::new();
        for name in backend.list(&root).await? {
            if !is_version_dir_name(&name) {
                continue;
            }
            let path = backend.join(&root, &name);
            match backend.classify(&path).await {
                Ok(EntryKind::Directory) => {}
                Ok(other) => {
                    debug!("Skipping '{}' on {}: {:?}", path, kind.label(), other);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping '{}' on {}: {}", path, kind.label(), e);
                    continue;
                }
            }

            let listing = match backend.list(&path).await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Skipping version '{}' on {}: {}", name, kind.label(), e);
                    continue;
                }
            };
            let mut archives: Vec<String> = listing
                .into_iter()
                .filter(|file| is_release_archive(file))
                .collect();
            if archives.is_empty() {
                debug!("Version '{}' on {} has no release archive", name, kind.label());
                continue;
            }
            archives.sort();

            candidates.push(VersionCandidate {
                version: name,
                backend: Arc::clone(backend),
                path,
                archives,
            });
        }
        info!("{} offers {} version(s)", kind.label(), candidates.len());
        Ok(candidates)
    }

    /// A backend whose scan fails is skipped; the catalog only fails when nothing was found.
    pub(crate) async fn build_catalog(
        backends: &[Arc<dyn SourceBackend>],
    ) -> Result<Catalog, DiscoveryError> {
        if backends.is_empty() {
            return Err(DiscoveryError::NoSources);
        }
        let mut catalog = Catalog::default();
        for backend in backends {
            match Self::scan(backend).await {
                Ok(candidates) => candidates.into_iter().for_each(|c| catalog.insert(c)),
                Err(e) => warn!("Skipping {} source: {}", backend.kind().label(), e),
            }
        }
        if catalog.is_empty() {
            return Err(DiscoveryError::NoVersions);
        }
        Ok(catalog)
    }

    /// Exactly one archive of the candidate must carry the product keyword.
    pub(crate) fn select_archive(
        candidate: &VersionCandidate,
        product: ProductType,
    ) -> Result<SelectedArtifact, SelectionError> {
        let keyword = product.keyword();
        let matches: Vec<&String> = candidate
            .archives
            .iter()
            .filter(|name| name.to_lowercase().contains(keyword))
            .collect();

        match matches.as_slice() {
            [single] => Ok(SelectedArtifact {
                candidate: candidate.clone(),
                chosen_archive_name: (*single).clone(),
            }),
            [] => Err(SelectionError::NoMatchingArtifact {
                keyword: keyword.to_string(),
                version: candidate.label(),
                available: candidate.archives.clone(),
            }),
            several => Err(SelectionError::AmbiguousArtifact {
                keyword: keyword.to_string(),
                version: candidate.label(),
                candidates: several.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }
}
