use crate::{
    catalog::{Catalog, FileMeta, ModMeta, TrackedRemote},
    checker::{self, UpdateResult},
    config::{AppConfig, API_KEY_ENV, MODS_DIR_ENV},
    error::{Result, TrackerError},
    files,
    library::{Field, ItemId, ItemPatch, ItemStore, Library, NewItem, TrackedItem},
    nexus::NexusClient,
    reconcile::{self, CleanupReport, SweepReport},
    schedule::{self, CheckReport},
};
use anyhow::Context;
use serde::Serialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

const UNMAPPED_PREVIEW: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub game: String,
    pub mod_id: u64,
    pub file_id: u64,
    pub local_file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemEdit {
    pub local_file: Option<String>,
    pub file_id: Option<u64>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalFile {
    pub filename: String,
    pub size_bytes: u64,
    pub path: PathBuf,
    pub mapped: bool,
    pub item_id: Option<ItemId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub total_files: usize,
    pub mapped_files: usize,
    pub unmapped_files: usize,
    pub mods_directory: PathBuf,
    pub unmapped_list: Vec<String>,
}

pub struct App {
    pub config: AppConfig,
    library: Library,
    catalog: Option<Arc<dyn Catalog>>,
}

impl App {
    pub fn initialize() -> anyhow::Result<Self> {
        let config = AppConfig::load_or_create()?;
        let library_path = config.library_path()?;
        let library = Library::load_or_create(&library_path)
            .with_context(|| format!("load library {}", library_path.display()))?;
        let catalog = config.api_key.as_ref().map(|key| {
            Arc::new(NexusClient::new(key.clone(), config.request_timeout())) as Arc<dyn Catalog>
        });
        tracing::debug!(library = %library_path.display(), "library loaded");
        Ok(Self::with_parts(config, library, catalog))
    }

    pub fn with_parts(
        config: AppConfig,
        library: Library,
        catalog: Option<Arc<dyn Catalog>>,
    ) -> Self {
        Self {
            config,
            library,
            catalog,
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    fn catalog(&self) -> Result<&dyn Catalog> {
        self.catalog.as_deref().ok_or_else(|| {
            TrackerError::Configuration(format!("{API_KEY_ENV} is not set"))
        })
    }

    pub fn mods_dir(&self) -> Result<&Path> {
        let dir = self.config.mods_dir.as_deref().ok_or_else(|| {
            TrackerError::Configuration(format!("{MODS_DIR_ENV} is not set"))
        })?;
        if !dir.is_dir() {
            return Err(TrackerError::Configuration(format!(
                "{MODS_DIR_ENV} does not exist: {}",
                dir.display()
            )));
        }
        Ok(dir)
    }

    pub fn items(&self) -> Result<Vec<TrackedItem>> {
        Ok(self.library.all()?)
    }

    pub fn item(&self, id: ItemId) -> Result<TrackedItem> {
        self.library.get(id)?.ok_or(TrackerError::NotFound(id))
    }

    /// Binds a local archive to a catalog file, caching the catalog metadata.
    pub fn add_item(&self, request: AddRequest) -> Result<TrackedItem> {
        let local_file = files::checked_name(&request.local_file)?.to_string();
        let catalog = self.catalog()?;
        let mod_meta = catalog.mod_details(&request.game, request.mod_id)?;
        let file_meta = catalog.file_details(&request.game, request.mod_id, request.file_id)?;
        let local_file_mtime = self
            .mods_dir()
            .ok()
            .and_then(|dir| files::file_stamp(&dir.join(&local_file)));

        let item = self.library.create(NewItem {
            game: request.game,
            mod_id: request.mod_id,
            file_id: request.file_id,
            local_file,
            local_file_mtime,
            name: Some(file_meta.name).filter(|value| !value.is_empty()),
            file_name: Some(file_meta.file_name).filter(|value| !value.is_empty()),
            description: file_meta.description,
            size_in_bytes: file_meta.size_in_bytes,
            version: Some(file_meta.version).filter(|value| !value.is_empty()),
            mod_name: mod_meta.name,
            author: mod_meta.author,
            category_name: file_meta.category_name,
            uploaded_time: file_meta.uploaded_time,
        })?;
        tracing::info!(
            item_id = item.id,
            mod_id = item.mod_id,
            file = %item.local_file,
            "tracking mod"
        );
        Ok(item)
    }

    /// Changing `file_id` by hand drops any pending update, since it may no
    /// longer be newer than the current file.
    pub fn edit_item(&self, id: ItemId, edit: ItemEdit) -> Result<TrackedItem> {
        let current = self.item(id)?;
        let mut patch = ItemPatch::default();
        if let Some(local_file) = edit.local_file {
            let local_file = files::checked_name(&local_file)?.to_string();
            let stamp = self
                .mods_dir()
                .ok()
                .and_then(|dir| files::file_stamp(&dir.join(&local_file)));
            patch.local_file = Field::Set(local_file);
            patch.local_file_mtime = Field::Set(stamp);
        }
        if let Some(version) = edit.version {
            patch.version = Field::Set(Some(version));
        }
        if let Some(file_id) = edit.file_id {
            patch.file_id = Field::Set(file_id);
            if file_id != current.file_id {
                patch = patch.clear_pending();
            }
        }
        self.library
            .update(id, patch)?
            .ok_or(TrackerError::NotFound(id))
    }

    pub fn remove_item(&self, id: ItemId) -> Result<()> {
        if !self.library.delete(id)? {
            return Err(TrackerError::NotFound(id));
        }
        tracing::info!(item_id = id, "stopped tracking mod");
        Ok(())
    }

    pub fn run_update_check(&self) -> Result<CheckReport> {
        schedule::run_update_check(self.catalog()?, &self.library, self.config.check_workers)
    }

    pub fn check_one(&self, id: ItemId) -> Result<Option<UpdateResult>> {
        let item = self.item(id)?;
        checker::check(self.catalog()?, &self.library, &item)
    }

    pub fn mark_updated(&self, id: ItemId) -> Result<TrackedItem> {
        reconcile::mark_updated(self.catalog()?, &self.library, self.mods_dir()?, id)
    }

    pub fn run_auto_detect_sweep(&self) -> Result<SweepReport> {
        reconcile::auto_detect_sweep(self.catalog()?, &self.library, self.mods_dir()?)
    }

    pub fn run_cleanup_sweep(&self) -> Result<CleanupReport> {
        reconcile::cleanup_sweep(&self.library, self.mods_dir()?)
    }

    pub fn local_files(&self) -> Result<Vec<LocalFile>> {
        let tracked: HashMap<String, ItemId> = self
            .library
            .all()?
            .into_iter()
            .map(|item| (item.local_file, item.id))
            .collect();
        let archives = files::list_archives(self.mods_dir()?)?;
        Ok(archives
            .into_iter()
            .map(|archive| {
                let item_id = tracked.get(&archive.filename).copied();
                LocalFile {
                    filename: archive.filename,
                    size_bytes: archive.size_bytes,
                    path: archive.path,
                    mapped: item_id.is_some(),
                    item_id,
                }
            })
            .collect())
    }

    pub fn scan(&self) -> Result<ScanSummary> {
        let local = self.local_files()?;
        let unmapped: Vec<String> = local
            .iter()
            .filter(|file| !file.mapped)
            .map(|file| file.filename.clone())
            .collect();
        Ok(ScanSummary {
            total_files: local.len(),
            mapped_files: local.len() - unmapped.len(),
            unmapped_files: unmapped.len(),
            mods_directory: self.mods_dir()?.to_path_buf(),
            unmapped_list: unmapped.into_iter().take(UNMAPPED_PREVIEW).collect(),
        })
    }

    pub fn delete_local_file(&self, filename: &str) -> Result<PathBuf> {
        let name = files::checked_name(filename)?;
        let path = self.mods_dir()?.join(name);
        if !path.is_file() {
            return Err(TrackerError::FileNotFound(name.to_string()));
        }
        fs::remove_file(&path).map_err(|err| TrackerError::local_io(&path, err))?;
        tracing::info!(path = %path.display(), "deleted local file");
        Ok(path)
    }

    /// Link to the pending file when there is one, else to the current file.
    pub fn download_url(&self, id: ItemId) -> Result<String> {
        let item = self.item(id)?;
        let file_id = item.pending_file_id().unwrap_or(item.file_id);
        Ok(crate::catalog::download_link(&item.game, item.mod_id, file_id))
    }

    pub fn remote_mod(&self, game: &str, mod_id: u64) -> Result<ModMeta> {
        Ok(self.catalog()?.mod_details(game, mod_id)?)
    }

    pub fn remote_files(&self, game: &str, mod_id: u64) -> Result<Vec<FileMeta>> {
        Ok(self.catalog()?.list_files(game, mod_id)?)
    }

    pub fn remote_tracked(&self) -> Result<Vec<TrackedRemote>> {
        Ok(self.catalog()?.tracked_mods()?)
    }
}
