//! Filesystem preparation done before any diagnostic starts.

use crate::error::ConfigError;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

const DIR_PREFIX: &str = "nfs-perf-";
const SUFFIX_LEN: usize = 8;
const MAX_ATTEMPTS: usize = 100;

/// Fail early if the archive path is taken.
pub(crate) fn ensure_archive_absent(path: &Path) -> Result<(), ConfigError> {
    if path_exists(path) {
        return Err(ConfigError::ArchiveExists(path.to_path_buf()));
    }
    Ok(())
}

/// Create the (empty) archive file now so a bad path is found before collection, not after.
pub(crate) fn probe_archive(path: &Path) -> Result<(), ConfigError> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(ConfigError::ArchiveExists(path.to_path_buf()))
        }
        Err(source) => Err(ConfigError::ArchiveNotCreatable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub(crate) fn ensure_workdir_absent(path: &Path) -> Result<(), ConfigError> {
    if path_exists(path) {
        return Err(ConfigError::WorkdirExists(path.to_path_buf()));
    }
    Ok(())
}

pub(crate) fn ensure_root(root: &Path) -> Result<(), ConfigError> {
    if !root.is_dir() {
        return Err(ConfigError::MissingRoot(root.to_path_buf()));
    }
    Ok(())
}

/// Create exactly the directory the operator asked for.
pub(crate) fn create_explicit(path: &Path) -> Result<PathBuf, ConfigError> {
    match fs::create_dir(path) {
        Ok(()) => Ok(path.to_path_buf()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(ConfigError::WorkdirExists(path.to_path_buf()))
        }
        Err(source) => Err(ConfigError::WorkdirNotCreatable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Create a fresh `nfs-perf-<date>-<random>` directory under `root`.
pub(crate) fn create_unique(root: &Path) -> Result<PathBuf, ConfigError> {
    let prefix = dated_prefix();
    let mut last_err = None;
    for _ in 0..MAX_ATTEMPTS {
        let candidate = root.join(format!("{prefix}{}", random_suffix()));
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_err = Some(e),
            Err(source) => {
                return Err(ConfigError::WorkdirNotCreatable {
                    path: candidate,
                    source,
                })
            }
        }
    }
    Err(ConfigError::WorkdirNotCreatable {
        path: root.to_path_buf(),
        source: last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AlreadyExists)),
    })
}

/// `nfs-perf-YYYY-MM-DD-`, local date when the offset is known, UTC otherwise.
pub(crate) fn dated_prefix() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let date = now
        .format(time::macros::format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| "unknown-date".into());
    format!("{DIR_PREFIX}{date}-")
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// Dangling symlinks count as existing.
fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}
