use crate::models::QtVersion;
use std::cmp::Ordering;

/// Classification of two version sets by unique id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionDiff {
    pub added: Vec<i32>,
    pub removed: Vec<i32>,
    pub changed: Vec<i32>,
}

impl VersionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Walk both sets sorted by id. Ids present on both sides are `changed` only
/// when [`QtVersion::is_equivalent_to`] says they differ.
///
/// Inputs need not be sorted; the returned id lists are ascending.
pub fn diff_versions(old: &[QtVersion], new: &[QtVersion]) -> VersionDiff {
    let mut old_sorted: Vec<&QtVersion> = old.iter().collect();
    let mut new_sorted: Vec<&QtVersion> = new.iter().collect();
    old_sorted.sort_by_key(|v| v.unique_id());
    new_sorted.sort_by_key(|v| v.unique_id());

    let mut diff = VersionDiff::default();
    let (mut i, mut j) = (0, 0);
    while i < old_sorted.len() && j < new_sorted.len() {
        let (o, n) = (old_sorted[i], new_sorted[j]);
        match o.unique_id().cmp(&n.unique_id()) {
            Ordering::Less => {
                diff.removed.push(o.unique_id());
                i += 1;
            }
            Ordering::Greater => {
                diff.added.push(n.unique_id());
                j += 1;
            }
            Ordering::Equal => {
                if !o.is_equivalent_to(n) {
                    diff.changed.push(o.unique_id());
                }
                i += 1;
                j += 1;
            }
        }
    }
    diff.removed.extend(old_sorted[i..].iter().map(|v| v.unique_id()));
    diff.added.extend(new_sorted[j..].iter().map(|v| v.unique_id()));
    diff
}
