//! Matching downloaded archives to pending updates.

use crate::{
    catalog::Catalog,
    error::{Result, StoreError, TrackerError},
    files,
    library::{Field, ItemId, ItemPatch, ItemStore, TrackedItem},
};
use serde::Serialize;
use std::{collections::HashMap, fs, path::Path};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Promotion {
    pub item_id: ItemId,
    pub mod_name: String,
    pub old_file: String,
    pub new_file: String,
    pub version: Option<String>,
    pub old_file_removed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub promoted: usize,
    pub details: Vec<Promotion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub item_id: ItemId,
    pub local_file: String,
    pub mod_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub details: Vec<Removal>,
}

/// Rebinds `item` to `new_file_id` stored on disk as `new_local_file`.
///
/// Metadata is fetched before anything is written, so a catalog failure leaves
/// the record as it was. The superseded archive is removed afterwards on a
/// best-effort basis.
pub fn promote(
    catalog: &dyn Catalog,
    store: &dyn ItemStore,
    mods_dir: &Path,
    item: &TrackedItem,
    new_file_id: u64,
    new_local_file: &str,
) -> Result<(TrackedItem, Promotion)> {
    let details = catalog.file_details(&item.game, item.mod_id, new_file_id)?;
    let version = non_empty(details.version);

    let patch = ItemPatch {
        file_id: Field::Set(new_file_id),
        local_file: Field::Set(new_local_file.to_string()),
        local_file_mtime: Field::Set(files::file_stamp(&mods_dir.join(new_local_file))),
        name: Field::Set(non_empty(details.name)),
        file_name: Field::Set(non_empty(details.file_name)),
        description: Field::Set(details.description),
        size_in_bytes: Field::Set(details.size_in_bytes),
        version: Field::Set(version.clone()),
        category_name: Field::Set(details.category_name),
        uploaded_time: Field::Set(details.uploaded_time),
        ..ItemPatch::default()
    }
    .clear_pending();

    let updated = store
        .update(item.id, patch)?
        .ok_or(TrackerError::NotFound(item.id))?;

    let old_file_removed = item.local_file != new_local_file
        && remove_superseded(&mods_dir.join(&item.local_file));

    tracing::info!(
        item_id = item.id,
        old = %item.local_file,
        new = %new_local_file,
        file_id = new_file_id,
        "promoted tracked mod"
    );
    let promotion = Promotion {
        item_id: item.id,
        mod_name: updated.display_name(),
        old_file: item.local_file.clone(),
        new_file: new_local_file.to_string(),
        version,
        old_file_removed,
    };
    Ok((updated, promotion))
}

fn remove_superseded(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed superseded archive");
            true
        }
        Err(err) => {
            let err = TrackerError::local_io(path, err);
            tracing::warn!(error = %err, "could not remove superseded archive");
            false
        }
    }
}

/// Applies the pending update of one item by hand.
pub fn mark_updated(
    catalog: &dyn Catalog,
    store: &dyn ItemStore,
    mods_dir: &Path,
    id: ItemId,
) -> Result<TrackedItem> {
    let item = store.get(id)?.ok_or(TrackerError::NotFound(id))?;
    let Some(latest_file_id) = item.pending_file_id() else {
        return Err(TrackerError::Precondition(format!(
            "tracked mod {id} has no pending update"
        )));
    };
    let new_local_file = item
        .latest_file_name
        .clone()
        .unwrap_or_else(|| item.local_file.clone());

    let (updated, _) = promote(catalog, store, mods_dir, &item, latest_file_id, &new_local_file)?;
    Ok(updated)
}

/// Promotes every pending item whose expected archive has shown up on disk.
pub fn auto_detect_sweep(
    catalog: &dyn Catalog,
    store: &dyn ItemStore,
    mods_dir: &Path,
) -> Result<SweepReport> {
    let archives = files::list_archives(mods_dir)?;

    let mut items = store.all()?;
    items.sort_by_key(|item| item.id);
    let mut pending: HashMap<String, TrackedItem> = HashMap::new();
    for item in items {
        if item.pending_file_id().is_none() {
            continue;
        }
        if let Some(name) = item.latest_file_name.clone() {
            pending.entry(name).or_insert(item);
        }
    }

    let mut report = SweepReport::default();
    for archive in archives {
        let Some(item) = pending.get(&archive.filename) else {
            continue;
        };
        let Some(latest_file_id) = item.pending_file_id() else {
            continue;
        };

        // Same name as the current binding: only a changed mtime means the
        // archive was downloaded again.
        if archive.filename == item.local_file && archive.mtime == item.local_file_mtime {
            tracing::debug!(item_id = item.id, file = %archive.filename, "archive unchanged");
            continue;
        }

        match promote(catalog, store, mods_dir, item, latest_file_id, &archive.filename) {
            Ok((_, promotion)) => report.details.push(promotion),
            Err(TrackerError::Catalog(err)) => {
                tracing::warn!(
                    item_id = item.id,
                    file = %archive.filename,
                    error = %err,
                    "could not fetch file metadata; leaving archive for the next sweep"
                );
            }
            Err(TrackerError::NotFound(id)) => {
                tracing::warn!(item_id = id, "tracked mod vanished during sweep");
            }
            Err(TrackerError::Store(err @ StoreError::DuplicateKey { .. })) => {
                tracing::warn!(
                    item_id = item.id,
                    file = %archive.filename,
                    error = %err,
                    "archive already bound to another tracked mod"
                );
            }
            Err(err) => return Err(err),
        }
    }

    report.promoted = report.details.len();
    tracing::info!(promoted = report.promoted, "auto-detect sweep finished");
    Ok(report)
}

/// Drops records whose archive is gone from the mods directory.
pub fn cleanup_sweep(store: &dyn ItemStore, mods_dir: &Path) -> Result<CleanupReport> {
    if !mods_dir.is_dir() {
        return Err(TrackerError::Configuration(format!(
            "mods directory does not exist: {}",
            mods_dir.display()
        )));
    }

    let mut report = CleanupReport::default();
    for item in store.all()? {
        if mods_dir.join(&item.local_file).exists() {
            continue;
        }
        if store.delete(item.id)? {
            tracing::info!(
                item_id = item.id,
                file = %item.local_file,
                "removed record for missing archive"
            );
            report.details.push(Removal {
                item_id: item.id,
                mod_name: item.display_name(),
                local_file: item.local_file,
            });
        }
    }
    report.details.sort_by_key(|removal| removal.item_id);
    report.removed = report.details.len();
    Ok(report)
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        library::Library,
        testing::{file, track, FakeCatalog},
    };
    use filetime::{set_file_mtime, FileTime};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        catalog: FakeCatalog,
        library: Library,
    }

    impl Fixture {
        fn new() -> Self {
            let catalog = FakeCatalog::new().with_files(
                "skyrim",
                100,
                vec![file(10, "Main", "MAIN"), file(15, "Main", "MAIN")],
            );
            Self {
                dir: tempfile::tempdir().unwrap(),
                catalog,
                library: Library::in_memory(),
            }
        }

        fn mods_dir(&self) -> &Path {
            self.dir.path()
        }

        fn write(&self, name: &str, mtime: i64) {
            let path = self.mods_dir().join(name);
            fs::write(&path, name.as_bytes()).unwrap();
            set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
        }

        /// Tracks `local_file` with a pending update to file 15 named `latest_name`.
        fn pending(&self, local_file: &str, latest_name: &str) -> TrackedItem {
            let item = track(&self.library, "skyrim", 100, 10, local_file);
            let patch = ItemPatch {
                local_file_mtime: Field::Set(files::file_stamp(&self.mods_dir().join(local_file))),
                ..ItemPatch::default()
            }
            .pending(15, "1.15".to_string(), latest_name.to_string());
            self.library.update(item.id, patch).unwrap().unwrap()
        }
    }

    #[test]
    fn sweep_promotes_renamed_download_and_removes_old_file() {
        let fx = Fixture::new();
        fx.write("mod_v1.zip", 1_700_000_000);
        let item = fx.pending("mod_v1.zip", "mod_v2.zip");
        fx.write("mod_v2.zip", 1_700_100_000);

        let report = auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(
            report.details[0],
            Promotion {
                item_id: item.id,
                mod_name: "Main".to_string(),
                old_file: "mod_v1.zip".to_string(),
                new_file: "mod_v2.zip".to_string(),
                version: Some("1.15".to_string()),
                old_file_removed: true,
            }
        );

        let stored = fx.library.get(item.id).unwrap().unwrap();
        assert_eq!(stored.local_file, "mod_v2.zip");
        assert_eq!(stored.file_id, 15);
        assert!(!stored.update_available);
        assert_eq!(stored.latest_file_id, None);
        assert_eq!(stored.latest_version, None);
        assert_eq!(stored.latest_file_name, None);
        assert_eq!(stored.local_file_mtime.map(|stamp| stamp.secs), Some(1_700_100_000));
        assert_eq!(stored.file_name.as_deref(), Some("main-15.zip"));
        assert!(!fx.mods_dir().join("mod_v1.zip").exists());
        assert!(fx.mods_dir().join("mod_v2.zip").exists());
    }

    #[test]
    fn sweep_is_idempotent() {
        let fx = Fixture::new();
        fx.write("mod_v1.zip", 1_700_000_000);
        fx.pending("mod_v1.zip", "mod_v2.zip");
        fx.write("mod_v2.zip", 1_700_100_000);

        assert_eq!(auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap().promoted, 1);
        let after_first = fx.library.all().unwrap();
        assert_eq!(auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap().promoted, 0);
        assert_eq!(fx.library.all().unwrap(), after_first);
    }

    #[test]
    fn unchanged_in_place_archive_is_not_promoted() {
        let fx = Fixture::new();
        fx.write("mod.zip", 1_700_000_000);
        let item = fx.pending("mod.zip", "mod.zip");

        let report = auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(fx.library.get(item.id).unwrap().unwrap(), item);
        assert!(fx.mods_dir().join("mod.zip").exists());
    }

    #[test]
    fn overwritten_in_place_archive_is_promoted() {
        let fx = Fixture::new();
        fx.write("mod.zip", 1_700_000_000);
        let item = fx.pending("mod.zip", "mod.zip");
        fx.write("mod.zip", 1_700_200_000);

        let report = auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap();
        assert_eq!(report.promoted, 1);
        assert!(!report.details[0].old_file_removed);
        let stored = fx.library.get(item.id).unwrap().unwrap();
        assert_eq!(stored.file_id, 15);
        assert_eq!(stored.local_file_mtime.map(|stamp| stamp.secs), Some(1_700_200_000));
        assert!(fx.mods_dir().join("mod.zip").exists());
    }

    #[test]
    fn catalog_failure_keeps_record_and_files() {
        let fx = Fixture::new();
        fx.write("mod_v1.zip", 1_700_000_000);
        let item = fx.pending("mod_v1.zip", "mod_v2.zip");
        fx.write("mod_v2.zip", 1_700_100_000);
        fx.catalog.fail_details(true);

        let report = auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap();
        assert_eq!(report.promoted, 0);
        let stored = fx.library.get(item.id).unwrap().unwrap();
        assert_eq!(stored, item);
        assert!(fx.mods_dir().join("mod_v1.zip").exists());

        fx.catalog.fail_details(false);
        assert_eq!(auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap().promoted, 1);
    }

    #[test]
    fn items_without_pending_update_are_ignored() {
        let fx = Fixture::new();
        fx.write("mod_v1.zip", 1_700_000_000);
        fx.write("main-15.zip", 1_700_000_000);
        let item = track(&fx.library, "skyrim", 100, 10, "mod_v1.zip");

        let report = auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap();
        assert_eq!(report.promoted, 0);
        assert_eq!(fx.library.get(item.id).unwrap().unwrap(), item);
    }

    #[test]
    fn shared_latest_name_goes_to_lowest_id() {
        let fx = Fixture::new();
        fx.catalog.set_files(
            "skyrim",
            200,
            vec![file(20, "Main", "MAIN"), file(25, "Main", "MAIN")],
        );
        fx.write("a.zip", 1_700_000_000);
        fx.write("b.zip", 1_700_000_000);
        let first = fx.pending("a.zip", "shared.zip");
        let second = track(&fx.library, "skyrim", 200, 20, "b.zip");
        fx.library
            .update(
                second.id,
                ItemPatch::default().pending(25, "1.25".to_string(), "shared.zip".to_string()),
            )
            .unwrap();
        fx.write("shared.zip", 1_700_100_000);

        let report = auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(report.details[0].item_id, first.id);
        assert!(fx.library.get(second.id).unwrap().unwrap().update_available);
    }

    #[test]
    fn taken_file_name_does_not_block_other_promotions() {
        let fx = Fixture::new();
        fx.catalog.set_files(
            "skyrim",
            200,
            vec![file(20, "Main", "MAIN"), file(25, "Main", "MAIN")],
        );
        fx.write("a.zip", 1_700_000_000);
        fx.write("taken.zip", 1_700_000_000);
        fx.write("z.zip", 1_700_000_000);
        let blocked = fx.pending("a.zip", "taken.zip");
        track(&fx.library, "skyrim", 300, 30, "taken.zip");
        let other = track(&fx.library, "skyrim", 200, 20, "z.zip");
        fx.library
            .update(
                other.id,
                ItemPatch::default().pending(25, "1.25".to_string(), "z_v2.zip".to_string()),
            )
            .unwrap();
        fx.write("z_v2.zip", 1_700_100_000);

        let report = auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(report.details[0].item_id, other.id);
        let stored = fx.library.get(other.id).unwrap().unwrap();
        assert_eq!(stored.file_id, 25);
        assert_eq!(stored.local_file, "z_v2.zip");

        let stored = fx.library.get(blocked.id).unwrap().unwrap();
        assert_eq!(stored.file_id, 10);
        assert!(stored.update_available);
        assert!(fx.mods_dir().join("a.zip").exists());

        let again = auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap();
        assert_eq!(again.promoted, 0);
    }

    #[test]
    fn failed_removal_of_old_file_keeps_promotion() {
        let fx = Fixture::new();
        fs::create_dir(fx.mods_dir().join("mod_v1.zip")).unwrap();
        let item = fx.pending("mod_v1.zip", "mod_v2.zip");
        fx.write("mod_v2.zip", 1_700_100_000);

        let report = auto_detect_sweep(&fx.catalog, &fx.library, fx.mods_dir()).unwrap();
        assert_eq!(report.promoted, 1);
        assert!(!report.details[0].old_file_removed);
        let stored = fx.library.get(item.id).unwrap().unwrap();
        assert_eq!(stored.file_id, 15);
        assert_eq!(stored.local_file, "mod_v2.zip");
        assert!(!stored.update_available);
        assert!(fx.mods_dir().join("mod_v1.zip").is_dir());
    }

    #[test]
    fn check_from_another_handle_keeps_promotion() {
        let fx = Fixture::new();
        fx.catalog.set_files(
            "skyrim",
            200,
            vec![file(20, "Main", "MAIN"), file(25, "Main", "MAIN")],
        );
        let path = fx.mods_dir().join("modwatch.json");
        let checker_side = Library::load_or_create(&path).unwrap();
        fx.write("mod_v1.zip", 1_700_000_000);
        let promoted = track(&checker_side, "skyrim", 100, 10, "mod_v1.zip");
        checker_side
            .update(
                promoted.id,
                ItemPatch::default().pending(15, "1.15".to_string(), "mod_v2.zip".to_string()),
            )
            .unwrap();
        let checked = track(&checker_side, "skyrim", 200, 20, "other.zip");
        fx.write("mod_v2.zip", 1_700_100_000);

        let sweep_side = Library::load_or_create(&path).unwrap();
        let report = auto_detect_sweep(&fx.catalog, &sweep_side, fx.mods_dir()).unwrap();
        assert_eq!(report.promoted, 1);
        assert!(!fx.mods_dir().join("mod_v1.zip").exists());

        crate::checker::check(&fx.catalog, &checker_side, &checked)
            .unwrap()
            .unwrap();

        let reloaded = Library::load_or_create(&path).unwrap();
        let stored = reloaded.get(promoted.id).unwrap().unwrap();
        assert_eq!(stored.file_id, 15);
        assert_eq!(stored.local_file, "mod_v2.zip");
        assert!(!stored.update_available);
        assert!(reloaded.get(checked.id).unwrap().unwrap().update_available);
    }

    #[test]
    fn mark_updated_uses_latest_file_name() {
        let fx = Fixture::new();
        fx.write("mod_v1.zip", 1_700_000_000);
        let item = fx.pending("mod_v1.zip", "mod_v2.zip");
        fx.write("mod_v2.zip", 1_700_100_000);

        let updated = mark_updated(&fx.catalog, &fx.library, fx.mods_dir(), item.id).unwrap();
        assert_eq!(updated.local_file, "mod_v2.zip");
        assert_eq!(updated.file_id, 15);
        assert_eq!(updated.version.as_deref(), Some("1.15"));
        assert!(!updated.update_available);
        assert!(!fx.mods_dir().join("mod_v1.zip").exists());
    }

    #[test]
    fn mark_updated_in_place_keeps_file() {
        let fx = Fixture::new();
        fx.write("mod.zip", 1_700_000_000);
        let item = fx.pending("mod.zip", "mod.zip");

        let updated = mark_updated(&fx.catalog, &fx.library, fx.mods_dir(), item.id).unwrap();
        assert_eq!(updated.local_file, "mod.zip");
        assert_eq!(updated.file_id, 15);
        assert!(fx.mods_dir().join("mod.zip").exists());
    }

    #[test]
    fn mark_updated_requires_pending_update() {
        let fx = Fixture::new();
        let item = track(&fx.library, "skyrim", 100, 10, "mod.zip");
        let err = mark_updated(&fx.catalog, &fx.library, fx.mods_dir(), item.id).unwrap_err();
        assert!(matches!(err, TrackerError::Precondition(_)));

        let err = mark_updated(&fx.catalog, &fx.library, fx.mods_dir(), 999).unwrap_err();
        assert!(matches!(err, TrackerError::NotFound(999)));
    }

    #[test]
    fn failed_promotion_is_atomic() {
        let fx = Fixture::new();
        fx.write("mod_v1.zip", 1_700_000_000);
        let item = fx.pending("mod_v1.zip", "mod_v2.zip");
        fx.catalog.fail_details(true);

        let err = mark_updated(&fx.catalog, &fx.library, fx.mods_dir(), item.id).unwrap_err();
        assert!(matches!(err, TrackerError::Catalog(_)));
        let stored = fx.library.get(item.id).unwrap().unwrap();
        assert_eq!(stored.file_id, 10);
        assert_eq!(stored.local_file, "mod_v1.zip");
        assert_eq!(stored.latest_file_id, Some(15));
        assert!(stored.update_available);
        assert!(fx.mods_dir().join("mod_v1.zip").exists());
    }

    #[test]
    fn cleanup_removes_records_for_missing_archives() {
        let fx = Fixture::new();
        fx.write("present.zip", 1_700_000_000);
        let kept = track(&fx.library, "skyrim", 1, 10, "present.zip");
        let gone = track(&fx.library, "skyrim", 2, 20, "gone.zip");

        let report = cleanup_sweep(&fx.library, fx.mods_dir()).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.details[0].item_id, gone.id);
        assert_eq!(report.details[0].local_file, "gone.zip");
        assert!(fx.library.get(kept.id).unwrap().is_some());
        assert!(fx.library.get(gone.id).unwrap().is_none());
        assert_eq!(cleanup_sweep(&fx.library, fx.mods_dir()).unwrap().removed, 0);
    }

    #[test]
    fn cleanup_refuses_missing_mods_dir() {
        let fx = Fixture::new();
        track(&fx.library, "skyrim", 1, 10, "present.zip");
        let missing = fx.mods_dir().join("nope");
        let err = cleanup_sweep(&fx.library, &missing).unwrap_err();
        assert!(matches!(err, TrackerError::Configuration(_)));
        assert_eq!(fx.library.all().unwrap().len(), 1);
    }
}
