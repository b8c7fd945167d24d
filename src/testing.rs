//! In-memory catalog and fixtures shared by unit tests.

use crate::{
    catalog::{Catalog, FileMeta, ModMeta, Period, TrackedRemote},
    error::CatalogError,
    library::{ItemStore, Library, NewItem, TrackedItem},
};
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

#[derive(Default)]
struct FakeState {
    files: HashMap<(String, u64), Vec<FileMeta>>,
    mods: HashMap<(String, u64), ModMeta>,
    updated: HashMap<String, Vec<u64>>,
    failing_mods: HashSet<u64>,
    failing_games: HashSet<String>,
    failing_details: bool,
    list_calls: Vec<u64>,
    updated_calls: Vec<(String, Period)>,
}

#[derive(Default)]
pub struct FakeCatalog {
    state: Mutex<FakeState>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(self, game: &str, mod_id: u64, files: Vec<FileMeta>) -> Self {
        self.set_files(game, mod_id, files);
        self
    }

    pub fn set_files(&self, game: &str, mod_id: u64, files: Vec<FileMeta>) {
        let mut state = self.state.lock().unwrap();
        state.files.insert((game.to_string(), mod_id), files);
    }

    pub fn with_mod(self, game: &str, meta: ModMeta) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.mods.insert((game.to_string(), meta.mod_id), meta);
        }
        self
    }

    pub fn with_updated(self, game: &str, mod_ids: Vec<u64>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.updated.insert(game.to_string(), mod_ids);
        }
        self
    }

    pub fn fail_mod(&self, mod_id: u64) {
        self.state.lock().unwrap().failing_mods.insert(mod_id);
    }

    pub fn fail_game(&self, game: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_games
            .insert(game.to_string());
    }

    pub fn fail_details(&self, failing: bool) {
        self.state.lock().unwrap().failing_details = failing;
    }

    pub fn list_calls(&self) -> Vec<u64> {
        let mut calls = self.state.lock().unwrap().list_calls.clone();
        calls.sort_unstable();
        calls
    }

    pub fn updated_calls(&self) -> Vec<(String, Period)> {
        let mut calls = self.state.lock().unwrap().updated_calls.clone();
        calls.sort();
        calls
    }
}

impl Catalog for FakeCatalog {
    fn list_files(&self, game: &str, mod_id: u64) -> Result<Vec<FileMeta>, CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls.push(mod_id);
        if state.failing_mods.contains(&mod_id) {
            return Err(CatalogError::Transport("connection reset".to_string()));
        }
        Ok(state
            .files
            .get(&(game.to_string(), mod_id))
            .cloned()
            .unwrap_or_default())
    }

    fn file_details(
        &self,
        game: &str,
        mod_id: u64,
        file_id: u64,
    ) -> Result<FileMeta, CatalogError> {
        let state = self.state.lock().unwrap();
        if state.failing_details || state.failing_mods.contains(&mod_id) {
            return Err(CatalogError::RateLimited);
        }
        state
            .files
            .get(&(game.to_string(), mod_id))
            .and_then(|files| files.iter().find(|file| file.file_id == file_id))
            .cloned()
            .ok_or_else(|| CatalogError::Status {
                status: 404,
                url: format!("{game}/{mod_id}/{file_id}"),
            })
    }

    fn mod_details(&self, game: &str, mod_id: u64) -> Result<ModMeta, CatalogError> {
        let state = self.state.lock().unwrap();
        state
            .mods
            .get(&(game.to_string(), mod_id))
            .cloned()
            .ok_or_else(|| CatalogError::Status {
                status: 404,
                url: format!("{game}/{mod_id}"),
            })
    }

    fn recently_updated(&self, game: &str, period: Period) -> Result<Vec<u64>, CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.updated_calls.push((game.to_string(), period));
        if state.failing_games.contains(game) {
            return Err(CatalogError::Status {
                status: 503,
                url: game.to_string(),
            });
        }
        Ok(state.updated.get(game).cloned().unwrap_or_default())
    }

    fn tracked_mods(&self) -> Result<Vec<TrackedRemote>, CatalogError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .mods
            .keys()
            .map(|(game, mod_id)| TrackedRemote {
                mod_id: *mod_id,
                domain_name: game.clone(),
            })
            .collect())
    }
}

pub fn file(file_id: u64, name: &str, category: &str) -> FileMeta {
    FileMeta {
        file_id,
        name: name.to_string(),
        version: format!("1.{file_id}"),
        category_name: Some(category.to_string()),
        uploaded_time: Some("2024-05-01T12:00:00.000+00:00".to_string()),
        file_name: format!("{}-{file_id}.zip", name.to_lowercase().replace(' ', "_")),
        size_in_bytes: Some(file_id * 1024),
        description: None,
    }
}

pub fn track(
    library: &Library,
    game: &str,
    mod_id: u64,
    file_id: u64,
    local_file: &str,
) -> TrackedItem {
    library
        .create(NewItem {
            game: game.to_string(),
            mod_id,
            file_id,
            local_file: local_file.to_string(),
            name: Some("Main".to_string()),
            version: Some(format!("1.{file_id}")),
            ..NewItem::default()
        })
        .unwrap()
}
