//! Explicit write sets for wallet persistence.
//!
//! Every persisted unit (header, root set, comments, each group) carries a
//! revision counter that only grows. A [`ChangeSet`] lists the units whose
//! revision moved since the last save; the wallet writes exactly those.

use std::collections::BTreeMap;

/// Units of a wallet that need to be written.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChangeSet {
    /// Network, key rank, name, description and id.
    pub header: bool,
    pub root_nodes: bool,
    /// Coin types of changed or new groups.
    pub groups: Vec<u32>,
    pub comments: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        !self.header && !self.root_nodes && self.groups.is_empty() && !self.comments
    }

    /// Every unit, used for the first write of a wallet file.
    pub fn everything(groups: impl IntoIterator<Item = u32>) -> Self {
        Self {
            header: true,
            root_nodes: true,
            groups: groups.into_iter().collect(),
            comments: true,
        }
    }
}

/// Revision counters of the persisted units.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Revisions {
    pub header: u64,
    pub root_nodes: u64,
    pub comments: u64,
    pub groups: BTreeMap<u32, (u64, u64)>,
}

impl Revisions {
    /// Units whose revision differs from `saved`.
    pub fn diff(&self, saved: &Revisions) -> ChangeSet {
        ChangeSet {
            header: self.header != saved.header,
            root_nodes: self.root_nodes != saved.root_nodes,
            groups: self
                .groups
                .iter()
                .filter(|(coin, rev)| saved.groups.get(*coin) != Some(*rev))
                .map(|(coin, _)| *coin)
                .collect(),
            comments: self.comments != saved.comments,
        }
    }

    /// Record the units in `changes` as written at revision `current`.
    pub fn mark_saved(&mut self, current: &Revisions, changes: &ChangeSet) {
        if changes.header {
            self.header = current.header;
        }
        if changes.root_nodes {
            self.root_nodes = current.root_nodes;
        }
        if changes.comments {
            self.comments = current.comments;
        }
        for coin in &changes.groups {
            if let Some(rev) = current.groups.get(coin) {
                self.groups.insert(*coin, *rev);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_lists_moved_units() {
        let saved = Revisions {
            header: 1,
            groups: BTreeMap::from([(0, (1, 4))]),
            ..Default::default()
        };
        let mut current = saved.clone();
        assert!(current.diff(&saved).is_empty());

        current.comments = 1;
        current.groups.insert(0, (1, 5));
        current.groups.insert(1, (0, 0));
        let changes = current.diff(&saved);
        assert_eq!(
            changes,
            ChangeSet {
                comments: true,
                groups: vec![0, 1],
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_partial_save() {
        let mut saved = Revisions::default();
        let current = Revisions {
            header: 2,
            root_nodes: 1,
            groups: BTreeMap::from([(0, (1, 1)), (1, (1, 1))]),
            ..Default::default()
        };
        let partial = ChangeSet {
            header: true,
            groups: vec![1],
            ..Default::default()
        };
        saved.mark_saved(&current, &partial);

        let left = current.diff(&saved);
        assert!(!left.header);
        assert!(left.root_nodes);
        assert_eq!(left.groups, vec![0]);
        assert!(ChangeSet::everything([0, 1]).groups.len() == 2);
    }
}
