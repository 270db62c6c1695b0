use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::domain::has_wildcard;
use crate::error::GrabError;
use crate::pattern::glob_regex;

const ANNEX_POINTER_PREFIX: &[u8] = b"/annex/objects/";
const ANNEX_POINTER_MAX_LEN: u64 = 32 * 1024;

/// Lists paths under `root` matching a `/`-separated glob. Symlinks are not
/// followed, so dangling annex placeholders are reported like regular files.
/// `.git` directories are never entered. Results are sorted.
pub fn glob_paths(root: &Utf8Path, glob: &str) -> Result<Vec<Utf8PathBuf>, GrabError> {
    let components = glob
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    let literal_len = components
        .iter()
        .take_while(|part| !has_wildcard(part))
        .count();
    if literal_len == components.len() {
        let path = root.join(components.join("/"));
        return Ok(if path_exists(&path) { vec![path] } else { Vec::new() });
    }

    let base = components[..literal_len]
        .iter()
        .fold(root.to_path_buf(), |acc, part| acc.join(part));
    if !base.as_std_path().is_dir() {
        return Ok(Vec::new());
    }
    let depth = components.len() - literal_len;
    let matcher = glob_regex(&components[literal_len..].join("/"))?;

    let mut out = Vec::new();
    let walker = WalkDir::new(base.as_std_path())
        .follow_links(false)
        .min_depth(depth)
        .max_depth(depth)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|err| GrabError::Filesystem(err.to_string()))?;
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
            continue;
        };
        let Ok(relative) = path.strip_prefix(&base) else {
            continue;
        };
        if matcher.is_match(&to_slash(relative)) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Whether something sits at `path`, counting dangling symlinks.
pub fn path_exists(path: &Utf8Path) -> bool {
    fs::symlink_metadata(path.as_std_path()).is_ok()
}

/// Whether `path` resolves to real content. Dangling symlinks do not, and
/// neither do git-annex pointer files standing in for unlocked content.
pub fn has_content(path: &Utf8Path) -> bool {
    match fs::metadata(path.as_std_path()) {
        Err(_) => false,
        Ok(metadata) if metadata.is_file() && metadata.len() <= ANNEX_POINTER_MAX_LEN => {
            !is_annex_pointer(path)
        }
        Ok(_) => true,
    }
}

fn is_annex_pointer(path: &Utf8Path) -> bool {
    fs::read(path.as_std_path())
        .map(|bytes| bytes.starts_with(ANNEX_POINTER_PREFIX))
        .unwrap_or(false)
}

pub fn to_slash(path: &Utf8Path) -> String {
    path.components()
        .map(|component| component.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Removes a directory tree, first making it writable. git-annex stores
/// objects in read-only directories which `remove_dir_all` cannot delete.
pub fn remove_dir_forced(path: &Utf8Path) -> Result<(), GrabError> {
    if !path_exists(path) {
        return Ok(());
    }
    for entry in WalkDir::new(path.as_std_path()).follow_links(false) {
        let entry = entry.map_err(|err| GrabError::Filesystem(err.to_string()))?;
        if entry.file_type().is_dir() {
            make_writable(entry.path())?;
        }
    }
    fs::remove_dir_all(path.as_std_path())
        .map_err(|err| GrabError::Filesystem(format!("remove {path}: {err}")))
}

fn make_writable(path: &Path) -> Result<(), GrabError> {
    let metadata = fs::metadata(path).map_err(|err| GrabError::Filesystem(err.to_string()))?;
    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)
            .map_err(|err| GrabError::Filesystem(err.to_string()))?;
    }
    Ok(())
}
