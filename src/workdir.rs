use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::debug;

use crate::error::GrabError;
use crate::fs_util;

/// Supplies and destroys scoped temporary directories.
pub trait WorkDirProvider: Send + Sync {
    fn get_tempdir(&self, prefix: &str) -> Result<Utf8PathBuf, GrabError>;
    fn delete_tempdir(&self, path: &Utf8Path) -> Result<(), GrabError>;
}

/// Creates temporary directories under a base directory (the system temp dir
/// unless told otherwise).
#[derive(Debug, Clone, Default)]
pub struct TempWorkDirs {
    base: Option<Utf8PathBuf>,
}

impl TempWorkDirs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_in(base: Utf8PathBuf) -> Self {
        Self { base: Some(base) }
    }
}

impl WorkDirProvider for TempWorkDirs {
    fn get_tempdir(&self, prefix: &str) -> Result<Utf8PathBuf, GrabError> {
        let mut builder = Builder::new();
        builder.prefix(prefix);
        let dir = match &self.base {
            Some(base) => {
                std::fs::create_dir_all(base.as_std_path())
                    .map_err(|err| GrabError::Filesystem(err.to_string()))?;
                builder.tempdir_in(base.as_std_path())
            }
            None => builder.tempdir(),
        }
        .map_err(|err| GrabError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(dir.keep())
            .map_err(|_| GrabError::Filesystem("invalid temp dir".to_string()))?;
        debug!(%path, "created temporary directory");
        Ok(path)
    }

    fn delete_tempdir(&self, path: &Utf8Path) -> Result<(), GrabError> {
        debug!(%path, "deleting temporary directory");
        fs_util::remove_dir_forced(path)
    }
}
