use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::GrabError;
use crate::fs_util;
use crate::remote::{RemoteRepoClient, RemoveTarget};

/// Escape hatches for trusted or offline workflows. Both default to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleOptions {
    #[serde(default)]
    pub skip_id_check: bool,
    #[serde(default)]
    pub skip_dirty_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Uninstalled,
    /// This session cloned the dataset; teardown deletes the clone.
    InstalledFresh,
    /// A clone already existed; teardown drops only what this session got.
    InstalledPreexisting,
}

/// Owns the local working copy of one remote dataset for one session.
pub struct RemoteDatasetLifecycleManager<C: RemoteRepoClient> {
    client: C,
    uri: String,
    local_path: Utf8PathBuf,
    options: LifecycleOptions,
    state: LifecycleState,
    dataset_id: Option<String>,
    commit_id: Option<String>,
    got_files: BTreeSet<Utf8PathBuf>,
    dirty: bool,
}

impl<C: RemoteRepoClient> RemoteDatasetLifecycleManager<C> {
    pub fn new(
        client: C,
        uri: String,
        local_path: Utf8PathBuf,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            client,
            uri,
            local_path,
            options,
            state: LifecycleState::Uninstalled,
            dataset_id: None,
            commit_id: None,
            got_files: BTreeSet::new(),
            dirty: false,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn local_path(&self) -> &Utf8Path {
        &self.local_path
    }

    pub fn options(&self) -> LifecycleOptions {
        self.options
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_entered(&self) -> bool {
        self.state != LifecycleState::Uninstalled
    }

    pub fn dataset_id(&self) -> Option<&str> {
        self.dataset_id.as_deref()
    }

    pub fn commit_id(&self) -> Option<&str> {
        self.commit_id.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn got_files(&self) -> &BTreeSet<Utf8PathBuf> {
        &self.got_files
    }

    /// Installs the working copy, or verifies an existing one. Entering an
    /// already entered manager does nothing.
    pub fn enter(&mut self) -> Result<(), GrabError> {
        if self.is_entered() {
            return Ok(());
        }
        match self.client.dataset_id(&self.local_path)? {
            None => self.install_fresh(),
            Some(local_id) => self.adopt_existing(local_id),
        }
    }

    fn install_fresh(&mut self) -> Result<(), GrabError> {
        let existed = fs_util::path_exists(&self.local_path);
        info!(uri = %self.uri, path = %self.local_path, "cloning dataset");
        if let Err(err) = self.client.clone_dataset(&self.uri, &self.local_path) {
            if !existed {
                if let Err(cleanup) = fs_util::remove_dir_forced(&self.local_path) {
                    warn!(
                        path = %self.local_path,
                        error = %cleanup,
                        "failed to remove partial clone"
                    );
                }
            }
            return Err(err);
        }
        self.state = LifecycleState::InstalledFresh;
        self.dataset_id = self.client.dataset_id(&self.local_path)?;
        self.commit_id = Some(self.client.commit_id(&self.local_path)?);
        self.dirty = false;
        info!(
            dataset_id = self.dataset_id.as_deref().unwrap_or("<none>"),
            commit_id = self.commit_id.as_deref().unwrap_or("<none>"),
            "dataset installed"
        );
        Ok(())
    }

    fn adopt_existing(&mut self, local_id: String) -> Result<(), GrabError> {
        if self.options.skip_id_check {
            debug!(path = %self.local_path, "skipping dataset id check");
        } else {
            let remote_id = self.client.query_id(&self.uri)?;
            if remote_id != local_id {
                return Err(GrabError::RemoteIdentity {
                    path: self.local_path.clone(),
                    local: local_id,
                    remote: remote_id,
                });
            }
        }

        let commit_id = self.client.commit_id(&self.local_path)?;
        let dirty = if self.options.skip_dirty_check {
            debug!(path = %self.local_path, "skipping dirty check");
            false
        } else {
            self.client.is_dirty(&self.local_path)?
        };
        if dirty {
            warn!(
                path = %self.local_path,
                "dataset already has materialized content; results may not match a fresh clone"
            );
        }

        self.state = LifecycleState::InstalledPreexisting;
        self.dataset_id = Some(local_id);
        self.commit_id = Some(commit_id);
        self.dirty = dirty;
        info!(path = %self.local_path, dirty, "using existing dataset");
        Ok(())
    }

    /// Materializes the paths that are not yet realized and returns them.
    /// Fails if any of them could not be fetched. Whatever did arrive is
    /// still recorded for teardown.
    pub fn request(&mut self, paths: &[Utf8PathBuf]) -> Result<Vec<Utf8PathBuf>, GrabError> {
        if !self.is_entered() {
            return Err(GrabError::NotEntered);
        }
        let mut missing = Vec::new();
        let mut seen = BTreeSet::new();
        for path in paths {
            if !seen.insert(path) {
                continue;
            }
            if !self.client.has_content(&self.local_path, path)? {
                missing.push(path.clone());
            }
        }
        if missing.is_empty() {
            debug!(requested = paths.len(), "all requested files already present");
            return Ok(missing);
        }

        debug!(count = missing.len(), "fetching files");
        let result = self.client.fetch(&self.local_path, &missing);
        if let Err(err) = result {
            self.record_arrived(&missing);
            return Err(err);
        }
        if self.state == LifecycleState::InstalledPreexisting {
            self.got_files.extend(missing.iter().cloned());
        }
        Ok(missing)
    }

    fn record_arrived(&mut self, attempted: &[Utf8PathBuf]) {
        if self.state != LifecycleState::InstalledPreexisting {
            return;
        }
        for path in attempted {
            if matches!(self.client.has_content(&self.local_path, path), Ok(true)) {
                self.got_files.insert(path.clone());
            }
        }
    }

    /// Tears the session down. A fresh clone is deleted entirely; an existing
    /// clone only loses the content fetched during this session.
    pub fn exit(&mut self) -> Result<(), GrabError> {
        match self.state {
            LifecycleState::Uninstalled => return Ok(()),
            LifecycleState::InstalledFresh => {
                info!(path = %self.local_path, "removing dataset clone");
                self.client.remove(&self.local_path, RemoveTarget::All)?;
            }
            LifecycleState::InstalledPreexisting => {
                let paths = self.got_files.iter().cloned().collect::<Vec<_>>();
                info!(path = %self.local_path, count = paths.len(), "dropping fetched files");
                self.client.remove(&self.local_path, RemoveTarget::Paths(&paths))?;
            }
        }
        self.state = LifecycleState::Uninstalled;
        self.got_files.clear();
        Ok(())
    }
}
