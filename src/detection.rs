//! New-code detection between two snapshots.

use std::collections::HashSet;

use crate::codes::{NewCodes, Snapshot};

/// Compute the codes in `current` that were not in `previous`.
///
/// Identity is the (game, code) pair; changes to any other field of an
/// existing code are not reported. With no previous snapshot at all the
/// current one is only a baseline and nothing is new. A game missing from
/// an existing previous snapshot has all of its codes reported.
pub fn detect_new(previous: Option<&Snapshot>, current: &Snapshot) -> NewCodes {
    let mut new_codes = NewCodes::new();

    let Some(previous) = previous else {
        return new_codes;
    };

    for (game, current_codes) in &current.games {
        let mut seen: HashSet<&str> = previous
            .codes(*game)
            .unwrap_or_default()
            .iter()
            .map(|record| record.code.as_str())
            .collect();

        // `insert` also drops repeats of a new code within the current list
        let fresh = current_codes
            .iter()
            .filter(|record| seen.insert(record.code.as_str()))
            .cloned()
            .collect();

        new_codes.insert(*game, fresh);
    }

    new_codes
}
