//! Keyed Set Difference
//!
//! One diff shape shared by every governed entity: index desired and current
//! items by key, then split into missing, changed and extra. Results are
//! sorted by key so plans are deterministic.

use std::collections::BTreeMap;

/// An entity with a stable identity independent of its mutable attributes
pub trait Keyed {
    type Key: Ord + Clone;

    fn key(&self) -> Self::Key;
}

/// A desired item whose current counterpart differs
#[derive(Debug)]
pub struct Change<'a, T> {
    pub desired: &'a T,
    pub current: &'a T,
}

/// Outcome of comparing desired against current items
#[derive(Debug)]
pub struct Diff<'a, T> {
    /// Desired but absent
    pub missing: Vec<&'a T>,
    /// Present on both sides with different attributes
    pub changed: Vec<Change<'a, T>>,
    /// Present but not desired
    pub extra: Vec<&'a T>,
}

impl<'a, T> Diff<'a, T> {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.changed.is_empty() && self.extra.is_empty()
    }
}

/// Compare two collections by key. Items equal under `same` are in sync.
/// On duplicate keys the first occurrence wins.
pub fn diff_by<'a, T, D, C, F>(desired: D, current: C, same: F) -> Diff<'a, T>
where
    T: Keyed + 'a,
    D: IntoIterator<Item = &'a T>,
    C: IntoIterator<Item = &'a T>,
    F: Fn(&T, &T) -> bool,
{
    let mut want: BTreeMap<T::Key, &'a T> = BTreeMap::new();
    for item in desired {
        want.entry(item.key()).or_insert(item);
    }

    let mut have: BTreeMap<T::Key, &'a T> = BTreeMap::new();
    for item in current {
        have.entry(item.key()).or_insert(item);
    }

    let mut result = Diff {
        missing: Vec::new(),
        changed: Vec::new(),
        extra: Vec::new(),
    };

    for (key, desired) in &want {
        match have.get(key) {
            None => result.missing.push(*desired),
            Some(current) if !same(*desired, *current) => result.changed.push(Change {
                desired: *desired,
                current: *current,
            }),
            Some(_) => {}
        }
    }

    result.extra = have
        .iter()
        .filter(|(key, _)| !want.contains_key(*key))
        .map(|(_, item)| *item)
        .collect();

    result
}

/// [`diff_by`] using `PartialEq` as the sameness test
pub fn diff<'a, T, D, C>(desired: D, current: C) -> Diff<'a, T>
where
    T: Keyed + PartialEq + 'a,
    D: IntoIterator<Item = &'a T>,
    C: IntoIterator<Item = &'a T>,
{
    diff_by(desired, current, |a, b| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Item {
        id: u32,
        value: &'static str,
    }

    impl Keyed for Item {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }
    }

    #[test]
    fn test_diff_partitions() {
        let desired = [
            Item { id: 1, value: "a" },
            Item { id: 2, value: "b" },
            Item { id: 3, value: "c" },
        ];
        let current = [
            Item { id: 2, value: "b" },
            Item { id: 3, value: "x" },
            Item { id: 4, value: "d" },
        ];

        let d = diff(&desired, &current);

        assert_eq!(d.missing.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(d.changed.len(), 1);
        assert_eq!(d.changed[0].desired.value, "c");
        assert_eq!(d.changed[0].current.value, "x");
        assert_eq!(d.extra.iter().map(|i| i.id).collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_identical_sets_are_empty() {
        let items = [Item { id: 1, value: "a" }];
        assert!(diff(&items, &items).is_empty());
    }

    #[test]
    fn test_custom_sameness() {
        let desired = [Item { id: 1, value: "A" }];
        let current = [Item { id: 1, value: "a" }];

        let d = diff_by(&desired, &current, |a, b| a.value.eq_ignore_ascii_case(b.value));
        assert!(d.is_empty());
    }
}
