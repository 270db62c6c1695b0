use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::Element;
use crate::error::GrabError;
use crate::lifecycle::{LifecycleOptions, LifecycleState, RemoteDatasetLifecycleManager};
use crate::pattern::{PatternSpec, validate_patterns};
use crate::remote::RemoteRepoClient;
use crate::resolver::{PathTemplateResolver, ResolvedAsset};
use crate::workdir::WorkDirProvider;

const TEMPDIR_PREFIX: &str = "kira-dg-";

/// Declaration of one grabber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabberConfig {
    /// Reported as `datagrabber.class` in element meta.
    pub name: String,
    /// Data types to retrieve. Empty means every key of `patterns`.
    pub types: Vec<String>,
    pub replacements: Vec<String>,
    pub patterns: BTreeMap<String, PatternSpec>,
    pub remote_uri: Option<String>,
    /// Data directory for local grabbers, clone location for remote ones.
    pub local_path: Option<Utf8PathBuf>,
    pub root_subdir: Option<Utf8PathBuf>,
    pub lifecycle: LifecycleOptions,
}

impl GrabberConfig {
    pub fn new(
        name: impl Into<String>,
        replacements: Vec<String>,
        patterns: BTreeMap<String, PatternSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
            replacements,
            patterns,
            remote_uri: None,
            local_path: None,
            root_subdir: None,
            lifecycle: LifecycleOptions::default(),
        }
    }

    pub fn effective_types(&self) -> Vec<String> {
        if self.types.is_empty() {
            self.patterns.keys().cloned().collect()
        } else {
            self.types.clone()
        }
    }

    /// Structural checks; performs no I/O.
    pub fn validate(&self) -> Result<(), GrabError> {
        if self.name.trim().is_empty() {
            return Err(GrabError::Configuration(
                "grabber name must not be empty".to_string(),
            ));
        }
        let types = self.effective_types();
        if types.iter().any(|t| t == "meta") {
            return Err(GrabError::Configuration(format!(
                "{}: data type name `meta` is reserved",
                self.name
            )));
        }
        validate_patterns(&types, &self.replacements, &self.patterns)
            .map_err(|err| match err {
                GrabError::Configuration(message) => {
                    GrabError::Configuration(format!("{}: {message}", self.name))
                }
                other => other,
            })?;
        if self.remote_uri.is_none() && self.local_path.is_none() {
            return Err(GrabError::Configuration(format!(
                "{}: a local grabber needs local_path",
                self.name
            )));
        }
        if let Some(subdir) = &self.root_subdir {
            if subdir.is_absolute() {
                return Err(GrabError::Configuration(format!(
                    "{}: root_subdir must be relative, got {subdir}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Everything retrieved for one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementData {
    #[serde(flatten)]
    pub assets: BTreeMap<String, ResolvedAsset>,
    pub meta: ElementMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementMeta {
    pub element: BTreeMap<String, String>,
    pub datagrabber: DataGrabberMeta,
}

/// Provenance of the grabber that produced an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataGrabberMeta {
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_dirty: Option<bool>,
}

/// Public surface: element discovery and retrieval, backed by a local
/// directory or by a remote dataset clone.
pub struct Grabber<C: RemoteRepoClient> {
    name: String,
    resolver: PathTemplateResolver,
    remote: Option<RemoteDatasetLifecycleManager<C>>,
    workdirs: Arc<dyn WorkDirProvider>,
    tempdir: Option<Utf8PathBuf>,
}

impl<C: RemoteRepoClient> std::fmt::Debug for Grabber<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grabber")
            .field("name", &self.name)
            .field("resolver", &self.resolver)
            .field("remote", &self.remote.is_some())
            .field("tempdir", &self.tempdir)
            .finish_non_exhaustive()
    }
}

impl<C: RemoteRepoClient> Grabber<C> {
    /// Validates and compiles `config` before touching the filesystem. A
    /// remote grabber without `local_path` then gets a temporary home from
    /// `workdirs`, deleted when the grabber is dropped.
    pub fn new(
        config: &GrabberConfig,
        client: Option<C>,
        workdirs: Arc<dyn WorkDirProvider>,
    ) -> Result<Self, GrabError> {
        config.validate()?;
        let resolver = PathTemplateResolver::new(
            Utf8PathBuf::new(),
            config.effective_types(),
            config.replacements.clone(),
            &config.patterns,
        )?;

        let mut tempdir = None;
        let (root, remote) = match &config.remote_uri {
            Some(uri) => {
                let client = client.ok_or_else(|| {
                    GrabError::Configuration(format!(
                        "{}: remote grabber needs a repository client",
                        config.name
                    ))
                })?;
                let local_path = match &config.local_path {
                    Some(path) => path.clone(),
                    None => {
                        let dir = workdirs.get_tempdir(TEMPDIR_PREFIX)?;
                        tempdir = Some(dir.clone());
                        dir.join("dataset")
                    }
                };
                let root = join_subdir(&local_path, config.root_subdir.as_deref());
                let manager = RemoteDatasetLifecycleManager::new(
                    client,
                    uri.clone(),
                    local_path,
                    config.lifecycle,
                );
                (root, Some(manager))
            }
            None => {
                let local_path = config.local_path.as_deref().ok_or_else(|| {
                    GrabError::Configuration(format!("{}: missing local_path", config.name))
                })?;
                (join_subdir(local_path, config.root_subdir.as_deref()), None)
            }
        };
        let resolver = resolver.with_root(root);

        Ok(Self {
            name: config.name.clone(),
            resolver,
            remote,
            workdirs,
            tempdir,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolver(&self) -> &PathTemplateResolver {
        &self.resolver
    }

    pub fn remote(&self) -> Option<&RemoteDatasetLifecycleManager<C>> {
        self.remote.as_ref()
    }

    pub fn types(&self) -> &[String] {
        self.resolver.types()
    }

    pub fn replacements(&self) -> &[String] {
        self.resolver.replacements()
    }

    /// Root directory patterns are resolved against.
    pub fn root(&self) -> &Utf8Path {
        self.resolver.root()
    }

    pub fn state(&self) -> Option<LifecycleState> {
        self.remote.as_ref().map(|m| m.state())
    }

    pub fn enter(&mut self) -> Result<(), GrabError> {
        match &mut self.remote {
            Some(manager) => manager.enter(),
            None => Ok(()),
        }
    }

    pub fn exit(&mut self) -> Result<(), GrabError> {
        match &mut self.remote {
            Some(manager) => manager.exit(),
            None => Ok(()),
        }
    }

    pub fn list_elements(&self) -> Result<BTreeSet<Element>, GrabError> {
        self.ensure_entered()?;
        self.resolver.discover_elements()
    }

    /// Resolves every declared type for `element`. For remote datasets the
    /// content of all resolved files is fetched before returning.
    pub fn get(&mut self, element: &Element) -> Result<ElementData, GrabError> {
        self.ensure_entered()?;
        let mut assets = BTreeMap::new();
        for data_type in self.resolver.types() {
            assets.insert(
                data_type.clone(),
                self.resolver.resolve_asset(element, data_type)?,
            );
        }

        if let Some(manager) = &mut self.remote {
            let paths = assets
                .values()
                .flat_map(ResolvedAsset::paths)
                .collect::<Vec<_>>();
            let fetched = manager.request(&paths)?;
            debug!(element = %element, fetched = fetched.len(), "element materialized");
        }

        Ok(ElementData {
            assets,
            meta: ElementMeta {
                element: element
                    .named(self.resolver.replacements())
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
                datagrabber: self.datagrabber_meta(),
            },
        })
    }

    pub fn datagrabber_meta(&self) -> DataGrabberMeta {
        match &self.remote {
            Some(manager) => DataGrabberMeta {
                class: self.name.clone(),
                uri: Some(manager.uri().to_string()),
                commit_id: manager.commit_id().map(str::to_string),
                dataset_id: manager.dataset_id().map(str::to_string),
                dataset_dirty: Some(manager.is_dirty()),
            },
            None => DataGrabberMeta {
                class: self.name.clone(),
                uri: None,
                commit_id: None,
                dataset_id: None,
                dataset_dirty: None,
            },
        }
    }

    fn ensure_entered(&self) -> Result<(), GrabError> {
        match &self.remote {
            Some(manager) if !manager.is_entered() => Err(GrabError::NotEntered),
            _ => Ok(()),
        }
    }
}

impl<C: RemoteRepoClient> Drop for Grabber<C> {
    fn drop(&mut self) {
        if let Some(manager) = &mut self.remote {
            if manager.is_entered() {
                if let Err(err) = manager.exit() {
                    warn!(grabber = %self.name, error = %err, "failed to tear down dataset");
                }
            }
        }
        if let Some(dir) = self.tempdir.take() {
            if let Err(err) = self.workdirs.delete_tempdir(&dir) {
                warn!(path = %dir, error = %err, "failed to delete temporary directory");
            }
        }
    }
}

fn join_subdir(base: &Utf8Path, subdir: Option<&Utf8Path>) -> Utf8PathBuf {
    match subdir {
        Some(subdir) => base.join(subdir),
        None => base.to_path_buf(),
    }
}
