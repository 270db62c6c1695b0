use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::GrabError;
use crate::fs_util;
use crate::workdir::{TempWorkDirs, WorkDirProvider};

const ID_TEMPDIR_PREFIX: &str = "kira-dg-id-";

/// What to remove when a session ends.
#[derive(Debug, Clone, Copy)]
pub enum RemoveTarget<'a> {
    /// Drop the content of these files, keeping the clone.
    Paths(&'a [Utf8PathBuf]),
    /// Delete the whole clone.
    All,
}

/// Client for a content-addressed remote repository (a DataLad dataset).
/// All paths are absolute paths inside the local clone.
pub trait RemoteRepoClient: Send + Sync {
    fn clone_dataset(&self, uri: &str, destination: &Utf8Path) -> Result<(), GrabError>;
    /// Canonical dataset id of the remote.
    fn query_id(&self, uri: &str) -> Result<String, GrabError>;
    /// Dataset id of a local clone, or `None` if `path` holds no clone.
    fn dataset_id(&self, path: &Utf8Path) -> Result<Option<String>, GrabError>;
    fn commit_id(&self, path: &Utf8Path) -> Result<String, GrabError>;
    fn has_content(&self, dataset: &Utf8Path, path: &Utf8Path) -> Result<bool, GrabError>;
    /// Whether any annexed content is already realized in the clone.
    fn is_dirty(&self, dataset: &Utf8Path) -> Result<bool, GrabError>;
    /// Fetches content for all `paths`; fails listing every path that could
    /// not be fetched.
    fn fetch(&self, dataset: &Utf8Path, paths: &[Utf8PathBuf]) -> Result<(), GrabError>;
    fn remove(&self, dataset: &Utf8Path, target: RemoveTarget<'_>) -> Result<(), GrabError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub datalad: Option<String>,
    pub git: Option<String>,
    pub git_annex: Option<String>,
}

/// One JSON result record as emitted by `datalad -f json`.
#[derive(Debug, Deserialize)]
struct DataladResult {
    #[serde(default)]
    status: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct SystemDataladClient {
    datalad: Option<PathBuf>,
    git: Option<PathBuf>,
    git_annex: Option<PathBuf>,
    workdirs: Arc<dyn WorkDirProvider>,
}

impl Default for SystemDataladClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemDataladClient {
    pub fn new() -> Self {
        Self {
            datalad: find_in_path("datalad"),
            git: find_in_path("git"),
            git_annex: find_in_path("git-annex"),
            workdirs: Arc::new(TempWorkDirs::new()),
        }
    }

    /// Scratch directories for remote id lookups come from `workdirs`.
    pub fn with_workdirs(mut self, workdirs: Arc<dyn WorkDirProvider>) -> Self {
        self.workdirs = workdirs;
        self
    }

    pub fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            datalad: self
                .datalad
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
            git: self
                .git
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
            git_annex: self
                .git_annex
                .as_ref()
                .and_then(|path| tool_version(path, &["version", "--raw"])),
        }
    }

    fn require_datalad(&self) -> Result<&PathBuf, GrabError> {
        self.datalad
            .as_ref()
            .ok_or_else(|| GrabError::MissingTool("datalad".to_string()))
    }

    fn require_git(&self) -> Result<&PathBuf, GrabError> {
        self.git
            .as_ref()
            .ok_or_else(|| GrabError::MissingTool("git".to_string()))
    }

    fn run_cmd(
        &self,
        operation: &str,
        program: &Path,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<String, GrabError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!(program = %program.display(), ?args, "running");
        let output = cmd
            .output()
            .map_err(|err| GrabError::remote(operation, vec![err.to_string()]))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", program.display())
        } else {
            stderr
        };
        Err(GrabError::remote(operation, vec![message]))
    }

    /// Runs a datalad command with JSON result rendering and collects the
    /// paths of all records that did not succeed. A non-zero exit without
    /// any failed record still fails, carrying the tool's stderr.
    fn run_datalad_json(
        &self,
        operation: &str,
        args: &[String],
        requested: &[Utf8PathBuf],
    ) -> Result<(), GrabError> {
        let datalad = self.require_datalad()?;
        let mut full_args = vec!["-f".to_string(), "json".to_string()];
        full_args.extend_from_slice(args);
        let mut cmd = Command::new(datalad);
        cmd.args(&full_args);
        debug!(?full_args, "running datalad");
        let output = cmd
            .output()
            .map_err(|err| GrabError::remote(operation, vec![err.to_string()]))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let failed = failed_records(&stdout);
        if !failed.is_empty() {
            return Err(GrabError::remote(operation, failed));
        }
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let mut failed = requested.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        if failed.is_empty() {
            failed.push(stderr);
        } else if !stderr.is_empty() {
            debug!(%stderr, "datalad failed without result records");
        }
        Err(GrabError::remote(operation, failed))
    }

    fn git_output(
        &self,
        operation: &str,
        cwd: &Utf8Path,
        args: &[&str],
    ) -> Result<String, GrabError> {
        let git = self.require_git()?;
        let args = args.iter().map(|a| a.to_string()).collect::<Vec<_>>();
        self.run_cmd(operation, git, &args, Some(cwd.as_std_path()))
            .map(|out| out.trim().to_string())
    }
}

impl RemoteRepoClient for SystemDataladClient {
    fn clone_dataset(&self, uri: &str, destination: &Utf8Path) -> Result<(), GrabError> {
        let datalad = self.require_datalad()?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| GrabError::Filesystem(err.to_string()))?;
        }
        let args = vec![
            "clone".to_string(),
            uri.to_string(),
            destination.to_string(),
        ];
        self.run_cmd("clone", datalad, &args, None)
            .map_err(|err| match err {
                GrabError::RemoteOperation { operation, mut failed } => {
                    failed.insert(0, uri.to_string());
                    GrabError::RemoteOperation { operation, failed }
                }
                other => other,
            })?;
        Ok(())
    }

    /// Clones `uri` into a scratch directory and reads the id from there, so
    /// every address `datalad clone` understands works here too.
    fn query_id(&self, uri: &str) -> Result<String, GrabError> {
        let datalad = self.require_datalad()?;
        let scratch = self.workdirs.get_tempdir(ID_TEMPDIR_PREFIX)?;
        let checkout = scratch.join("dataset");
        let args = vec!["clone".to_string(), uri.to_string(), checkout.to_string()];
        let result = self
            .run_cmd("query id", datalad, &args, None)
            .and_then(|_| self.dataset_id(&checkout))
            .and_then(|id| {
                id.ok_or_else(|| {
                    GrabError::remote("query id", vec![format!("{uri}: no datalad.dataset.id")])
                })
            });
        if let Err(err) = self.workdirs.delete_tempdir(&scratch) {
            warn!(path = %scratch, error = %err, "failed to delete temporary directory");
        }
        result
    }

    fn dataset_id(&self, path: &Utf8Path) -> Result<Option<String>, GrabError> {
        let config = path.join(".datalad").join("config");
        if !config.as_std_path().is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(config.as_std_path())
            .map_err(|err| GrabError::Filesystem(format!("read {config}: {err}")))?;
        Ok(parse_dataset_id(&content))
    }

    fn commit_id(&self, path: &Utf8Path) -> Result<String, GrabError> {
        self.git_output("rev-parse", path, &["rev-parse", "HEAD"])
    }

    fn has_content(&self, _dataset: &Utf8Path, path: &Utf8Path) -> Result<bool, GrabError> {
        Ok(fs_util::has_content(path))
    }

    /// Dirty means the local annex already holds object content. Locked
    /// and unlocked files both keep their content in the object store.
    fn is_dirty(&self, dataset: &Utf8Path) -> Result<bool, GrabError> {
        let objects = git_dir(dataset).join("annex").join("objects");
        if !objects.as_std_path().is_dir() {
            return Ok(false);
        }
        for entry in WalkDir::new(objects.as_std_path()).follow_links(false) {
            let entry = entry.map_err(|err| GrabError::Filesystem(err.to_string()))?;
            if entry.file_type().is_file() {
                debug!(path = %entry.path().display(), "annex content already present");
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn fetch(&self, dataset: &Utf8Path, paths: &[Utf8PathBuf]) -> Result<(), GrabError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec![
            "get".to_string(),
            "-d".to_string(),
            dataset.to_string(),
            "--".to_string(),
        ];
        args.extend(paths.iter().map(|p| p.to_string()));
        self.run_datalad_json("get", &args, paths)
    }

    fn remove(&self, dataset: &Utf8Path, target: RemoveTarget<'_>) -> Result<(), GrabError> {
        match target {
            RemoveTarget::Paths(paths) => {
                if paths.is_empty() {
                    return Ok(());
                }
                let mut args = vec![
                    "drop".to_string(),
                    "--reckless".to_string(),
                    "availability".to_string(),
                    "-d".to_string(),
                    dataset.to_string(),
                    "--".to_string(),
                ];
                args.extend(paths.iter().map(|p| p.to_string()));
                self.run_datalad_json("drop", &args, paths)
            }
            RemoveTarget::All => {
                let args = vec![
                    "remove".to_string(),
                    "--reckless".to_string(),
                    "kill".to_string(),
                    "-d".to_string(),
                    dataset.to_string(),
                ];
                self.run_datalad_json("remove", &args, &[])?;
                // `datalad remove` can leave an empty directory behind.
                fs_util::remove_dir_forced(dataset)
            }
        }
    }
}

/// Git directory of a work tree, following a `gitdir:` file as used by
/// subdatasets.
fn git_dir(dataset: &Utf8Path) -> Utf8PathBuf {
    let dot_git = dataset.join(".git");
    if dot_git.as_std_path().is_file() {
        if let Ok(content) = std::fs::read_to_string(dot_git.as_std_path()) {
            if let Some(target) = content.trim().strip_prefix("gitdir:") {
                return dataset.join(target.trim());
            }
        }
    }
    dot_git
}

fn failed_records(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<DataladResult>(line.trim()).ok())
        .filter(|record| matches!(record.status.as_str(), "error" | "impossible"))
        .map(|record| {
            let path = record.path.unwrap_or_else(|| "<unknown>".to_string());
            match record.message {
                Some(serde_json::Value::String(message)) => format!("{path} ({message})"),
                _ => path,
            }
        })
        .collect()
}

/// Extracts `id` from the `[datalad "dataset"]` section of a git config file.
fn parse_dataset_id(config: &str) -> Option<String> {
    let mut in_section = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            let section = line.trim_matches(|c| c == '[' || c == ']');
            in_section =
                section.split_whitespace().collect::<Vec<_>>() == ["datalad", "\"dataset\""];
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "id" {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        None
    } else {
        Some(stdout)
    }
}
