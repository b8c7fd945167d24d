//! Remote catalog interface.
//!
//! File ids are assumed to grow monotonically per mod. Nothing here can verify
//! that; "newer" throughout the crate simply means a numerically larger id.

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};

/// Categories that mark a file as retired on the catalog.
pub const RETIRED_CATEGORIES: [&str; 2] = ["ARCHIVED", "OLD_VERSION"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub uploaded_time: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_name: String,
    #[serde(default)]
    pub size_in_bytes: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FileMeta {
    pub fn is_retired(&self) -> bool {
        self.category_name
            .as_deref()
            .is_some_and(|category| RETIRED_CATEGORIES.contains(&category))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModMeta {
    pub mod_id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub updated_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRemote {
    pub mod_id: u64,
    pub domain_name: String,
}

/// Lookback window for the bulk "recently updated" query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    pub fn as_query(self) -> &'static str {
        match self {
            Period::Day => "1d",
            Period::Week => "1w",
            Period::Month => "1m",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Day => "1 day",
            Period::Week => "1 week",
            Period::Month => "1 month",
        }
    }
}

pub trait Catalog: Send + Sync {
    fn list_files(&self, game: &str, mod_id: u64) -> Result<Vec<FileMeta>, CatalogError>;

    fn file_details(&self, game: &str, mod_id: u64, file_id: u64)
        -> Result<FileMeta, CatalogError>;

    fn mod_details(&self, game: &str, mod_id: u64) -> Result<ModMeta, CatalogError>;

    /// Mod ids in `game` that changed within `period`.
    fn recently_updated(&self, game: &str, period: Period) -> Result<Vec<u64>, CatalogError>;

    fn tracked_mods(&self) -> Result<Vec<TrackedRemote>, CatalogError>;

    /// Files page link; built locally, no request is made.
    fn download_link(&self, game: &str, mod_id: u64, file_id: u64) -> String {
        download_link(game, mod_id, file_id)
    }
}

pub fn download_link(game: &str, mod_id: u64, file_id: u64) -> String {
    format!("https://www.nexusmods.com/{game}/mods/{mod_id}?tab=files&file_id={file_id}")
}

fn null_as_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
