use crate::{
    catalog::{Catalog, FileMeta},
    error::{Result, TrackerError},
    library::{now_unix, Field, ItemId, ItemPatch, ItemStore, TrackedItem},
};
use serde::Serialize;

/// A newer catalog file for one tracked mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub item_id: ItemId,
    pub mod_id: u64,
    pub local_file: String,
    pub version: String,
    pub current_file_id: u64,
    pub latest_version: String,
    pub latest_file_id: u64,
    pub latest_file_name: String,
    pub download_url: String,
    pub update_available: bool,
}

/// Picks the newest active file that belongs to `item`.
///
/// Several files can share a mod page, so a non-empty `item.name` narrows the
/// candidates to files whose name contains it. The substring match is loose:
/// unrelated files sharing a common word match too, and a renamed file stops
/// matching.
pub fn select_candidate<'a>(item: &TrackedItem, files: &'a [FileMeta]) -> Option<&'a FileMeta> {
    let pattern = item.name.as_deref().unwrap_or("");
    files
        .iter()
        .filter(|file| !file.is_retired())
        .filter(|file| pattern.is_empty() || file.name.contains(pattern))
        .max_by_key(|file| file.file_id)
}

/// Compares `item` against the catalog and records the outcome.
///
/// Catalog errors return before anything is written.
pub fn check(
    catalog: &dyn Catalog,
    store: &dyn ItemStore,
    item: &TrackedItem,
) -> Result<Option<UpdateResult>> {
    let files = catalog.list_files(&item.game, item.mod_id)?;
    let Some(candidate) = select_candidate(item, &files) else {
        tracing::debug!(item_id = item.id, mod_id = item.mod_id, "no matching catalog files");
        return Ok(None);
    };

    let update_available = candidate.file_id > item.file_id;
    let base = ItemPatch {
        last_checked: Field::Set(Some(now_unix())),
        ..ItemPatch::default()
    };
    let patch = if update_available {
        base.pending(
            candidate.file_id,
            candidate.version.clone(),
            candidate.file_name.clone(),
        )
    } else {
        base.clear_pending()
    };

    store
        .update(item.id, patch)?
        .ok_or(TrackerError::NotFound(item.id))?;

    if !update_available {
        return Ok(None);
    }

    tracing::info!(
        item_id = item.id,
        mod_id = item.mod_id,
        current = item.file_id,
        latest = candidate.file_id,
        "update available"
    );
    Ok(Some(UpdateResult {
        item_id: item.id,
        mod_id: item.mod_id,
        local_file: item.local_file.clone(),
        version: item.version.clone().unwrap_or_else(|| "unknown".to_string()),
        current_file_id: item.file_id,
        latest_version: candidate.version.clone(),
        latest_file_id: candidate.file_id,
        latest_file_name: candidate.file_name.clone(),
        download_url: catalog.download_link(&item.game, item.mod_id, candidate.file_id),
        update_available: true,
    }))
}
