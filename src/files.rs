use crate::{
    error::{Result, TrackerError},
    library::FileStamp,
};
use filetime::FileTime;
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

pub const ARCHIVE_EXTENSIONS: [&str; 3] = ["zip", "rar", "7z"];

/// An archive sitting directly in the mods directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalArchive {
    pub filename: String,
    pub size_bytes: u64,
    pub path: PathBuf,
    #[serde(skip)]
    pub mtime: Option<FileStamp>,
}

pub fn is_archive(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ARCHIVE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Archives in `dir`, sorted by filename. Subdirectories are not descended.
pub fn list_archives(dir: &Path) -> Result<Vec<LocalArchive>> {
    let mut archives = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(dir).to_path_buf();
            TrackerError::local_io(path, err.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(filename) = entry.file_name().to_str() else {
            continue;
        };
        if !is_archive(filename) {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|err| TrackerError::local_io(entry.path(), err.into()))?;
        archives.push(LocalArchive {
            filename: filename.to_string(),
            size_bytes: metadata.len(),
            path: entry.path().to_path_buf(),
            mtime: Some(stamp_from_metadata(&metadata)),
        });
    }
    archives.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(archives)
}

pub fn file_stamp(path: &Path) -> Option<FileStamp> {
    fs::metadata(path)
        .ok()
        .map(|metadata| stamp_from_metadata(&metadata))
}

fn stamp_from_metadata(metadata: &fs::Metadata) -> FileStamp {
    let mtime = FileTime::from_last_modification_time(metadata);
    FileStamp {
        secs: mtime.unix_seconds(),
        nanos: mtime.nanoseconds(),
    }
}

/// Rejects names that would escape the mods directory.
pub fn checked_name(filename: &str) -> Result<&str> {
    let trimmed = filename.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
    {
        return Err(TrackerError::Precondition(format!(
            "invalid file name: {filename:?}"
        )));
    }
    Ok(trimmed)
}
