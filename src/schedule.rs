use crate::{
    catalog::{Catalog, Period},
    checker::{self, UpdateResult},
    error::{Result, TrackerError},
    library::{now_unix, ItemStore, TrackedItem},
};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
};

const DAY_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub period: Option<Period>,
    pub total: usize,
    pub checked: usize,
    pub skipped: usize,
    pub failed: usize,
    pub updates: Vec<UpdateResult>,
}

/// Lookback window sized to the stalest item, so no change can slip between
/// two cycles unseen.
pub fn pick_period(items: &[TrackedItem], now: i64) -> Period {
    let mut oldest: Option<i64> = None;
    for item in items {
        let Some(checked) = item.last_checked else {
            return Period::Month;
        };
        oldest = Some(oldest.map_or(checked, |current| current.min(checked)));
    }
    let Some(oldest) = oldest else {
        return Period::Month;
    };

    let age = now.saturating_sub(oldest);
    if age < DAY_SECS {
        Period::Day
    } else if age < 7 * DAY_SECS {
        Period::Week
    } else {
        Period::Month
    }
}

/// `None` in `recent` means the game's lookup failed and every item is due.
fn needs_check(item: &TrackedItem, recent: &HashMap<String, Option<HashSet<u64>>>) -> bool {
    if item.last_checked.is_none() {
        return true;
    }
    match recent.get(&item.game) {
        Some(Some(mod_ids)) => mod_ids.contains(&item.mod_id),
        _ => true,
    }
}

pub fn run_update_check(
    catalog: &dyn Catalog,
    store: &dyn ItemStore,
    workers: usize,
) -> Result<CheckReport> {
    let items = store.all()?;
    if items.is_empty() {
        return Ok(CheckReport::default());
    }

    let period = pick_period(&items, now_unix());
    let mut by_game: BTreeMap<&str, usize> = BTreeMap::new();
    for item in &items {
        *by_game.entry(item.game.as_str()).or_default() += 1;
    }
    let games: Vec<&str> = by_game.keys().copied().collect();

    let lookups = parallel_map(&games, workers, |game| {
        match catalog.recently_updated(game, period) {
            Ok(mod_ids) => Some(mod_ids.into_iter().collect::<HashSet<u64>>()),
            Err(err) => {
                tracing::warn!(
                    game = *game,
                    error = %err,
                    "recently updated lookup failed; checking every mod of this game"
                );
                None
            }
        }
    });
    let recent: HashMap<String, Option<HashSet<u64>>> = games
        .iter()
        .map(|game| game.to_string())
        .zip(lookups)
        .collect();

    let due: Vec<&TrackedItem> = items.iter().filter(|item| needs_check(item, &recent)).collect();
    let outcomes = parallel_map(&due, workers, |item| checker::check(catalog, store, item));

    let mut report = CheckReport {
        period: Some(period),
        total: items.len(),
        checked: 0,
        skipped: items.len() - due.len(),
        failed: 0,
        updates: Vec::new(),
    };
    let mut store_error = None;
    for (item, outcome) in due.iter().zip(outcomes) {
        match outcome {
            Ok(update) => {
                report.checked += 1;
                report.updates.extend(update);
            }
            Err(TrackerError::Store(err)) => {
                tracing::error!(item_id = item.id, error = %err, "could not record update check");
                store_error.get_or_insert(err);
            }
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    item_id = item.id,
                    mod_id = item.mod_id,
                    error = %err,
                    "update check failed; skipping until next cycle"
                );
            }
        }
    }
    if let Some(err) = store_error {
        return Err(err.into());
    }

    report.updates.sort_by_key(|update| update.item_id);
    tracing::info!(
        period = period.label(),
        total = report.total,
        checked = report.checked,
        skipped = report.skipped,
        failed = report.failed,
        updates = report.updates.len(),
        "update check finished"
    );
    Ok(report)
}

/// Applies `f` to every input on at most `workers` scoped threads, keeping
/// input order in the output.
fn parallel_map<T, R, F>(inputs: &[T], workers: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let workers = workers.clamp(1, inputs.len().max(1));
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let f = &f;
            scope.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(input) = inputs.get(index) else {
                    break;
                };
                if tx.send((index, f(input))).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(inputs.len()).collect();
    for (index, value) in rx {
        slots[index] = Some(value);
    }
    slots.into_iter().flatten().collect()
}
