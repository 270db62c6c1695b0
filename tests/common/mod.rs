#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use kira_datagrabber::error::GrabError;
use kira_datagrabber::remote::{RemoteRepoClient, RemoveTarget};
use kira_datagrabber::workdir::{TempWorkDirs, WorkDirProvider};

pub const PLACEHOLDER: &[u8] = b"annex-placeholder";
pub const COMMIT: &str = "3f2a9c1d0b7e";

pub const BIDS_FILES: &[&str] = &[
    "sub-01/anat/sub-01_T1w.nii.gz",
    "sub-01/func/sub-01_task-rest_bold.nii.gz",
    "sub-01/func/sub-01_task-rest_mask.nii.gz",
    "sub-02/anat/sub-02_T1w.nii.gz",
    "sub-02/func/sub-02_task-rest_bold.nii.gz",
    "sub-02/func/sub-02_task-rest_mask.nii.gz",
    "sub-03/anat/sub-03_T1w.nii.gz",
];

/// Origin repository: real file contents plus a dataset id.
pub struct RemoteFixture {
    _dir: TempDir,
    pub root: Utf8PathBuf,
    pub id: String,
}

pub fn remote_fixture(id: &str, files: &[&str]) -> RemoteFixture {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("origin")).unwrap();
    fs::create_dir_all(root.join(".datalad")).unwrap();
    fs::write(root.join(".datalad/id"), id).unwrap();
    for file in files {
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("content of {file}")).unwrap();
    }
    RemoteFixture {
        _dir: dir,
        root,
        id: id.to_string(),
    }
}

pub fn utf8_tempdir() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, path)
}

pub fn touch(root: &Utf8Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"x").unwrap();
}

/// Simulates a DataLad dataset: clones hold placeholder files until fetched.
#[derive(Clone)]
pub struct MockRemote {
    source: Utf8PathBuf,
    remote_id: String,
    log: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<BTreeSet<String>>>,
}

impl MockRemote {
    pub fn new(fixture: &RemoteFixture) -> Self {
        Self {
            source: fixture.root.clone(),
            remote_id: fixture.id.clone(),
            log: Arc::default(),
            failing: Arc::default(),
        }
    }

    pub fn with_remote_id(mut self, id: &str) -> Self {
        self.remote_id = id.to_string();
        self
    }

    pub fn fail_fetch(&self, relative: &str) {
        self.failing.lock().unwrap().insert(relative.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }
}

pub fn is_placeholder(path: &Utf8Path) -> bool {
    fs::read(path).map(|c| c == PLACEHOLDER).unwrap_or(false)
}

impl RemoteRepoClient for MockRemote {
    fn clone_dataset(&self, _uri: &str, destination: &Utf8Path) -> Result<(), GrabError> {
        self.record("clone".to_string());
        for entry in WalkDir::new(self.source.as_std_path()) {
            let entry = entry.unwrap();
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(self.source.as_std_path()).unwrap();
            let target = destination.as_std_path().join(relative);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            if relative.starts_with(".datalad") {
                fs::copy(entry.path(), &target).unwrap();
            } else {
                fs::write(&target, PLACEHOLDER).unwrap();
            }
        }
        Ok(())
    }

    fn query_id(&self, _uri: &str) -> Result<String, GrabError> {
        self.record("query_id".to_string());
        Ok(self.remote_id.clone())
    }

    fn dataset_id(&self, path: &Utf8Path) -> Result<Option<String>, GrabError> {
        Ok(fs::read_to_string(path.join(".datalad/id")).ok())
    }

    fn commit_id(&self, _path: &Utf8Path) -> Result<String, GrabError> {
        Ok(COMMIT.to_string())
    }

    fn has_content(&self, _dataset: &Utf8Path, path: &Utf8Path) -> Result<bool, GrabError> {
        Ok(path.as_std_path().is_file() && !is_placeholder(path))
    }

    fn is_dirty(&self, dataset: &Utf8Path) -> Result<bool, GrabError> {
        self.record("is_dirty".to_string());
        let dirty = WalkDir::new(dataset.as_std_path())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| !e.path().to_string_lossy().contains(".datalad"))
            .any(|e| fs::read(e.path()).map(|c| c != PLACEHOLDER).unwrap_or(false));
        Ok(dirty)
    }

    fn fetch(&self, dataset: &Utf8Path, paths: &[Utf8PathBuf]) -> Result<(), GrabError> {
        self.record(format!("fetch:{}", paths.len()));
        let failing = self.failing.lock().unwrap().clone();
        let mut failed = Vec::new();
        for path in paths {
            let relative = path.strip_prefix(dataset).unwrap().to_string();
            if failing.contains(&relative) {
                failed.push(relative);
                continue;
            }
            fs::copy(self.source.join(&relative), path).unwrap();
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(GrabError::RemoteOperation {
                operation: "get".to_string(),
                failed,
            })
        }
    }

    fn remove(&self, dataset: &Utf8Path, target: RemoveTarget<'_>) -> Result<(), GrabError> {
        match target {
            RemoveTarget::Paths(paths) => {
                self.record(format!("drop:{}", paths.len()));
                for path in paths {
                    fs::write(path, PLACEHOLDER).unwrap();
                }
            }
            RemoveTarget::All => {
                self.record("remove".to_string());
                fs::remove_dir_all(dataset.as_std_path()).unwrap();
            }
        }
        Ok(())
    }
}

/// Counts calls into a real temporary-directory provider.
#[derive(Default)]
pub struct CountingWorkDirs {
    inner: TempWorkDirs,
    pub created: AtomicUsize,
    pub deleted: AtomicUsize,
    pub last: Mutex<Option<Utf8PathBuf>>,
}

impl CountingWorkDirs {
    pub fn new_in(base: Utf8PathBuf) -> Self {
        Self {
            inner: TempWorkDirs::new_in(base),
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<Utf8PathBuf> {
        self.last.lock().unwrap().clone()
    }
}

impl WorkDirProvider for CountingWorkDirs {
    fn get_tempdir(&self, prefix: &str) -> Result<Utf8PathBuf, GrabError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let dir = self.inner.get_tempdir(prefix)?;
        *self.last.lock().unwrap() = Some(dir.clone());
        Ok(dir)
    }

    fn delete_tempdir(&self, path: &Utf8Path) -> Result<(), GrabError> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_tempdir(path)
    }
}
