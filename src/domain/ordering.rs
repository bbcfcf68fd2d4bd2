//! Ordering helpers shared by the store and the reconciling client.

use std::collections::HashSet;

use super::error::{AppError, Result};
use super::models::ImageRecord;

/// Sort records by `order_index`, falling back to `created_at` then `id`.
pub fn sort_records(records: &mut [ImageRecord]) {
    records.sort_by(|a, b| {
        a.order_index
            .cmp(&b.order_index)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Move the element at `from` to `to`, shifting the ones in between.
///
/// # Errors
/// Returns `Validation` if either position is out of range.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) -> Result<()> {
    let len = items.len();
    if from >= len || to >= len {
        return Err(AppError::validation(format!(
            "Position out of range: {from} -> {to} (len {len})"
        )));
    }
    if from != to {
        let item = items.remove(from);
        items.insert(to, item);
    }
    Ok(())
}

/// Index for a new record: current max + 1, or 0 for an empty table.
#[must_use]
pub fn next_order_index(current_max: Option<i64>) -> i64 {
    current_max.map_or(0, |max| max + 1)
}

/// Reject id lists that name the same record twice.
///
/// # Errors
/// Returns `Validation` naming the first duplicate.
pub fn ensure_unique_ids<S: AsRef<str>>(ids: &[S]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_ref()) {
            return Err(AppError::validation(format!(
                "Duplicate id in reorder payload: {}",
                id.as_ref()
            )));
        }
    }
    Ok(())
}

/// Whether the records carry exactly `0..N-1` in list order.
#[must_use]
pub fn is_contiguous(records: &[ImageRecord]) -> bool {
    records
        .iter()
        .zip(0_i64..)
        .all(|(record, expected)| record.order_index == expected)
}

/// Ids in list order.
#[must_use]
pub fn ids_of(records: &[ImageRecord]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}
