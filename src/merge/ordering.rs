//! Three-way list merging.
//!
//! Two strategies, chosen by the field's declared [`ListOrder`]:
//!
//! - **Unordered** (sets): removals by either side drop the member, additions
//!   by either side are appended (left first). Never conflicts.
//! - **Ordered**: the relative order of members both sides kept follows the
//!   side that reordered them. If both reordered them differently, the merge
//!   conflicts unless a side was picked. New members are inserted after their
//!   nearest preceding sibling from the inserting branch (or at the front).
//!
//! [`ListOrder`]: crate::model::ListOrder

use std::collections::BTreeSet;

use crate::model::Side;

/// Result of an ordered three-way merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderOutcome<T> {
    /// The merged sequence.
    Merged(Vec<T>),
    /// Both sides reordered the shared members differently.
    Conflict {
        /// Left's order of the shared members.
        left: Vec<T>,
        /// Right's order of the shared members.
        right: Vec<T>,
    },
}

/// Merge an unordered collection.
#[must_use]
pub fn merge_unordered<T: Clone + Ord>(ancestor: &[T], left: &[T], right: &[T]) -> Vec<T> {
    let l: BTreeSet<&T> = left.iter().collect();
    let r: BTreeSet<&T> = right.iter().collect();
    let a: BTreeSet<&T> = ancestor.iter().collect();

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for item in ancestor {
        if l.contains(item) && r.contains(item) && seen.insert(item.clone()) {
            out.push(item.clone());
        }
    }
    for item in left.iter().chain(right) {
        if !a.contains(item) && seen.insert(item.clone()) {
            out.push(item.clone());
        }
    }
    out
}

/// Merge an ordered collection. With `pick`, an order clash resolves to the
/// picked side's order instead of conflicting.
#[must_use]
pub fn merge_ordered<T: Clone + Ord>(
    ancestor: &[T],
    left: &[T],
    right: &[T],
    pick: Option<Side>,
) -> OrderOutcome<T> {
    let l: BTreeSet<&T> = left.iter().collect();
    let r: BTreeSet<&T> = right.iter().collect();
    let a: BTreeSet<&T> = ancestor.iter().collect();

    let common: BTreeSet<&T> = ancestor
        .iter()
        .filter(|x| l.contains(x) && r.contains(x))
        .collect();
    let prev = dedup(ancestor.iter().filter(|x| common.contains(x)));
    let lo = dedup(left.iter().filter(|x| common.contains(x)));
    let ro = dedup(right.iter().filter(|x| common.contains(x)));

    let mut merged = if lo == prev {
        ro
    } else if ro == prev || lo == ro {
        lo
    } else {
        match pick {
            Some(Side::Left) => lo,
            Some(Side::Right) => ro,
            None => return OrderOutcome::Conflict { left: lo, right: ro },
        }
    };

    insert_new(&mut merged, left, &a);
    insert_new(&mut merged, right, &a);
    OrderOutcome::Merged(merged)
}

/// Insert the members of `branch` absent from both the ancestor and `merged`,
/// each after the nearest earlier `branch` member already in `merged`, and
/// after anything another branch inserted there.
fn insert_new<T: Clone + Ord>(merged: &mut Vec<T>, branch: &[T], ancestor: &BTreeSet<&T>) {
    for (i, item) in branch.iter().enumerate() {
        if ancestor.contains(item) || merged.contains(item) {
            continue;
        }
        let mut at = branch[..i]
            .iter()
            .rev()
            .find_map(|prev| merged.iter().rposition(|m| m == prev))
            .map_or(0, |pos| pos + 1);
        // Step over the other branch's insertions at the same spot.
        while at < merged.len() && !ancestor.contains(&merged[at]) && !branch.contains(&merged[at])
        {
            at += 1;
        }
        merged.insert(at, item.clone());
    }
}

fn dedup<'a, T: Clone + Ord + 'a>(items: impl Iterator<Item = &'a T>) -> Vec<T> {
    let mut seen = BTreeSet::new();
    items
        .filter(|x| seen.insert(*x))
        .cloned()
        .collect()
}
