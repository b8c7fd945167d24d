use crate::error::StoreError;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

pub type ItemId = u64;

/// Modification time with the filesystem's full precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileStamp {
    pub secs: i64,
    pub nanos: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub id: ItemId,
    pub game: String,
    pub mod_id: u64,
    pub file_id: u64,
    pub local_file: String,
    #[serde(default)]
    pub local_file_mtime: Option<FileStamp>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub size_in_bytes: Option<u64>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub mod_name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub uploaded_time: Option<String>,
    #[serde(default)]
    pub update_available: bool,
    #[serde(default)]
    pub latest_file_id: Option<u64>,
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub latest_file_name: Option<String>,
    #[serde(default)]
    pub last_checked: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TrackedItem {
    pub fn display_name(&self) -> String {
        self.mod_name
            .clone()
            .or_else(|| self.name.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("Mod {}", self.mod_id))
    }

    pub fn pending_file_id(&self) -> Option<u64> {
        if self.update_available {
            self.latest_file_id
        } else {
            None
        }
    }
}

/// Fields for a new record; the store assigns id and timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewItem {
    pub game: String,
    pub mod_id: u64,
    pub file_id: u64,
    pub local_file: String,
    pub local_file_mtime: Option<FileStamp>,
    pub name: Option<String>,
    pub file_name: Option<String>,
    pub description: Option<String>,
    pub size_in_bytes: Option<u64>,
    pub version: Option<String>,
    pub mod_name: Option<String>,
    pub author: Option<String>,
    pub category_name: Option<String>,
    pub uploaded_time: Option<String>,
}

/// One field of a partial update. Nullable columns use `Field<Option<T>>`,
/// so `Set(None)` clears while `Keep` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Field<T> {
    #[default]
    Keep,
    Set(T),
}

impl<T> Field<T> {
    fn apply(self, target: &mut T) {
        if let Field::Set(value) = self {
            *target = value;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub file_id: Field<u64>,
    pub local_file: Field<String>,
    pub local_file_mtime: Field<Option<FileStamp>>,
    pub name: Field<Option<String>>,
    pub file_name: Field<Option<String>>,
    pub description: Field<Option<String>>,
    pub size_in_bytes: Field<Option<u64>>,
    pub version: Field<Option<String>>,
    pub category_name: Field<Option<String>>,
    pub uploaded_time: Field<Option<String>>,
    pub update_available: Field<bool>,
    pub latest_file_id: Field<Option<u64>>,
    pub latest_version: Field<Option<String>>,
    pub latest_file_name: Field<Option<String>>,
    pub last_checked: Field<Option<i64>>,
}

impl ItemPatch {
    /// Sets all four pending-update fields together.
    pub fn pending(mut self, file_id: u64, version: String, file_name: String) -> Self {
        self.update_available = Field::Set(true);
        self.latest_file_id = Field::Set(Some(file_id));
        self.latest_version = Field::Set(Some(version));
        self.latest_file_name = Field::Set(Some(file_name));
        self
    }

    /// Clears all four pending-update fields together.
    pub fn clear_pending(mut self) -> Self {
        self.update_available = Field::Set(false);
        self.latest_file_id = Field::Set(None);
        self.latest_version = Field::Set(None);
        self.latest_file_name = Field::Set(None);
        self
    }

    fn apply(self, item: &mut TrackedItem) {
        self.file_id.apply(&mut item.file_id);
        self.local_file.apply(&mut item.local_file);
        self.local_file_mtime.apply(&mut item.local_file_mtime);
        self.name.apply(&mut item.name);
        self.file_name.apply(&mut item.file_name);
        self.description.apply(&mut item.description);
        self.size_in_bytes.apply(&mut item.size_in_bytes);
        self.version.apply(&mut item.version);
        self.category_name.apply(&mut item.category_name);
        self.uploaded_time.apply(&mut item.uploaded_time);
        self.update_available.apply(&mut item.update_available);
        self.latest_file_id.apply(&mut item.latest_file_id);
        self.latest_version.apply(&mut item.latest_version);
        self.latest_file_name.apply(&mut item.latest_file_name);
        self.last_checked.apply(&mut item.last_checked);
    }
}

/// Record store for tracked items. Every write is a single atomic
/// read-modify-write; concurrent writers to one item are serialized.
pub trait ItemStore: Send + Sync {
    fn all(&self) -> Result<Vec<TrackedItem>, StoreError>;
    fn get(&self, id: ItemId) -> Result<Option<TrackedItem>, StoreError>;
    fn create(&self, item: NewItem) -> Result<TrackedItem, StoreError>;
    fn update(&self, id: ItemId, patch: ItemPatch) -> Result<Option<TrackedItem>, StoreError>;
    fn delete(&self, id: ItemId) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LibraryFile {
    next_id: ItemId,
    items: Vec<TrackedItem>,
}

impl LibraryFile {
    fn empty() -> Self {
        Self {
            next_id: 1,
            items: Vec::new(),
        }
    }
}

/// JSON-file backed store.
///
/// Writers in separate processes are serialized through an exclusive lock on
/// `<library>.lock`. Every write re-reads the file while holding that lock.
#[derive(Debug)]
pub struct Library {
    path: Option<PathBuf>,
    state: Mutex<LibraryFile>,
}

impl Library {
    pub fn load_or_create(path: &Path) -> Result<Self, StoreError> {
        let state = read_state(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    /// Store without a backing file.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LibraryFile::empty()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current state, refreshed from disk when file backed.
    fn read(&self) -> Result<MutexGuard<'_, LibraryFile>, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(path) = &self.path {
            *state = read_state(path)?;
        }
        Ok(state)
    }

    /// Applies `change` to the latest state and persists the result. A failed
    /// change or write leaves both the file and memory untouched.
    fn write<R>(
        &self,
        change: impl FnOnce(&mut LibraryFile) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(path) = &self.path else {
            let mut next = state.clone();
            let out = change(&mut next)?;
            *state = next;
            return Ok(out);
        };

        let _lock = acquire_write_lock(path)?;
        let current = read_state(path)?;
        let mut next = current.clone();
        let out = change(&mut next)?;
        if next != current {
            let raw = serde_json::to_string_pretty(&next).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
            write_atomic(path, &raw).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        }
        *state = next;
        Ok(out)
    }
}

impl ItemStore for Library {
    fn all(&self) -> Result<Vec<TrackedItem>, StoreError> {
        let state = self.read()?;
        let mut items = state.items.clone();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }

    fn get(&self, id: ItemId) -> Result<Option<TrackedItem>, StoreError> {
        let state = self.read()?;
        Ok(state.items.iter().find(|item| item.id == id).cloned())
    }

    fn create(&self, new: NewItem) -> Result<TrackedItem, StoreError> {
        self.write(|state| {
            let now = now_unix();
            let item = TrackedItem {
                id: state.next_id,
                game: new.game,
                mod_id: new.mod_id,
                file_id: new.file_id,
                local_file: new.local_file,
                local_file_mtime: new.local_file_mtime,
                name: new.name,
                file_name: new.file_name,
                description: new.description,
                size_in_bytes: new.size_in_bytes,
                version: new.version,
                mod_name: new.mod_name,
                author: new.author,
                category_name: new.category_name,
                uploaded_time: new.uploaded_time,
                update_available: false,
                latest_file_id: None,
                latest_version: None,
                latest_file_name: None,
                last_checked: None,
                created_at: now,
                updated_at: now,
            };
            ensure_unique(&state.items, &item)?;

            state.next_id += 1;
            state.items.push(item.clone());
            Ok(item)
        })
    }

    fn update(&self, id: ItemId, patch: ItemPatch) -> Result<Option<TrackedItem>, StoreError> {
        self.write(|state| {
            let Some(index) = state.items.iter().position(|item| item.id == id) else {
                return Ok(None);
            };

            let mut item = state.items[index].clone();
            patch.apply(&mut item);
            normalize_pending(&mut item);
            item.updated_at = now_unix();
            ensure_unique(&state.items, &item)?;

            state.items[index] = item.clone();
            Ok(Some(item))
        })
    }

    fn delete(&self, id: ItemId) -> Result<bool, StoreError> {
        self.write(|state| {
            let before = state.items.len();
            state.items.retain(|item| item.id != id);
            Ok(state.items.len() != before)
        })
    }
}

/// Pending-update fields are either all set with a newer file, or all clear.
/// A check racing a promotion can report a file that is no longer newer.
fn normalize_pending(item: &mut TrackedItem) {
    let pending = item.update_available
        && item.latest_version.is_some()
        && item.latest_file_name.is_some()
        && item
            .latest_file_id
            .is_some_and(|latest| latest > item.file_id);
    if !pending {
        item.update_available = false;
        item.latest_file_id = None;
        item.latest_version = None;
        item.latest_file_name = None;
    }
}

fn ensure_unique(items: &[TrackedItem], candidate: &TrackedItem) -> Result<(), StoreError> {
    for other in items.iter().filter(|other| other.id != candidate.id) {
        if other.local_file == candidate.local_file {
            return Err(StoreError::DuplicateKey {
                key: "local file",
                value: candidate.local_file.clone(),
            });
        }
        if other.mod_id == candidate.mod_id && other.file_id == candidate.file_id {
            return Err(StoreError::DuplicateKey {
                key: "mod/file",
                value: format!("{}/{}", candidate.mod_id, candidate.file_id),
            });
        }
    }
    Ok(())
}

fn read_state(path: &Path) -> Result<LibraryFile, StoreError> {
    if !path.exists() {
        return Ok(LibraryFile::empty());
    }
    let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut state: LibraryFile =
        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    let max_id = state.items.iter().map(|item| item.id).max().unwrap_or(0);
    state.next_id = state.next_id.max(max_id + 1);
    Ok(state)
}

/// Held until the returned handle is dropped.
fn acquire_write_lock(path: &Path) -> Result<File, StoreError> {
    let lock_path = sibling(path, ".lock");
    let io_error = |source| StoreError::Io {
        path: lock_path.clone(),
        source,
    };
    ensure_parent(path).map_err(io_error)?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(io_error)?;
    file.lock_exclusive().map_err(io_error)?;
    Ok(file)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "library".into());
    name.push(suffix);
    path.with_file_name(name)
}

fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    ensure_parent(path)?;
    let temp_path = sibling(path, ".tmp");
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)
}

pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
