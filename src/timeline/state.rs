use super::index::IdentityIndex;
use super::types::{TimelineItem, Timestamp};
use std::collections::HashSet;
use tracing::warn;

/// Result of an in-place overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    Patched,
    /// The timestamp moved, so the item was removed and re-inserted.
    Repositioned,
    Missing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StructuralEdit {
    pub removed: usize,
    pub inserted: usize,
}

impl StructuralEdit {
    pub fn is_empty(&self) -> bool {
        self.removed == 0 && self.inserted == 0
    }
}

/// The committed timeline: item list plus its identity index.
///
/// Both fields are private so the index can only change together with the
/// list. Every structural edit rebuilds the index before returning.
#[derive(Debug, Default)]
pub struct TimelineState {
    items: Vec<TimelineItem>,
    index: IdentityIndex,
    revision: u64,
}

impl TimelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[TimelineItem] {
        &self.items
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bumped on every committed change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn is_sorted(&self) -> bool {
        self.items
            .windows(2)
            .all(|pair| pair[0].timestamp() <= pair[1].timestamp())
    }

    pub fn index_in_sync(&self) -> bool {
        self.index.mirrors(&self.items)
    }

    /// Remove `removed`, then insert `added` at their sorted positions.
    ///
    /// Ids already present (or repeated within `added`) are skipped. Removal
    /// also reaches tool calls folded into a group; a group left empty is
    /// dropped.
    pub fn apply_structural(
        &mut self,
        removed: &HashSet<String>,
        added: Vec<TimelineItem>,
    ) -> StructuralEdit {
        let mut edit = StructuralEdit::default();

        if !removed.is_empty() {
            edit.removed = self.remove_ids(removed);
            self.index.rebuild(&self.items);
        }

        let mut seen = HashSet::new();
        let mut fresh: Vec<TimelineItem> = added
            .into_iter()
            .filter(|item| {
                let id = item.stable_id();
                !self.index.contains(id) && seen.insert(id.to_string())
            })
            .collect();
        if !fresh.is_empty() {
            fresh.sort_by_key(|item| item.timestamp());
            edit.inserted = fresh.len();
            for item in fresh {
                self.insert_sorted(item);
            }
            self.index.rebuild(&self.items);
        }

        if !edit.is_empty() {
            self.revision += 1;
        }
        edit
    }

    /// Overwrite the entry carrying `item`'s id, keeping its slot when the
    /// timestamp is unchanged.
    pub fn overwrite(&mut self, item: TimelineItem) -> Overwrite {
        let Some(slot) = self.index.get(item.stable_id()) else {
            return Overwrite::Missing;
        };
        let result = match slot.member {
            None => self.overwrite_top_level(slot.position, item),
            Some(member) => self.overwrite_member(slot.position, member, item),
        };
        if result != Overwrite::Missing {
            self.revision += 1;
        }
        result
    }

    /// Replace the whole list, as the grouping pass does.
    pub fn replace_all(&mut self, items: Vec<TimelineItem>) {
        let mut seen = HashSet::new();
        self.items = items
            .into_iter()
            .filter(|item| {
                let fresh = seen.insert(item.stable_id().to_string());
                if !fresh {
                    warn!("Dropping duplicate timeline id '{}'", item.stable_id());
                }
                fresh
            })
            .collect();
        self.index.rebuild(&self.items);
        self.revision += 1;
    }

    /// A group that loses its earliest member is re-inserted at its new
    /// timestamp. A group left empty is dropped along with the summary
    /// keyed on its first call; other summaries refresh at the next regroup.
    fn remove_ids(&mut self, removed: &HashSet<String>) -> usize {
        let before = self.count_entities();
        self.items
            .retain(|item| !removed.contains(item.stable_id()));

        let mut shifted = Vec::new();
        let mut orphaned_summaries = HashSet::new();
        for item in self.items.iter_mut() {
            let TimelineItem::ToolCallGroup(group) = item else {
                continue;
            };
            let Some(first_id) = group.tool_calls.first().map(|c| c.id.clone()) else {
                continue;
            };
            let ts = group.timestamp();
            group.tool_calls.retain(|call| !removed.contains(&call.id));
            if group.tool_calls.is_empty() {
                orphaned_summaries.insert(format!("summary-{first_id}"));
            } else if group.timestamp() != ts {
                shifted.push(group.id.clone());
            }
        }

        self.items.retain(|item| match item {
            TimelineItem::ToolCallGroup(group) => !group.tool_calls.is_empty(),
            TimelineItem::TurnSummary(summary) => !orphaned_summaries.contains(&summary.id),
            _ => true,
        });
        for id in shifted {
            if let Some(position) = self.items.iter().position(|item| item.stable_id() == id) {
                let group = self.items.remove(position);
                self.insert_sorted(group);
            }
        }
        before.saturating_sub(self.count_entities())
    }

    fn count_entities(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                TimelineItem::ToolCallGroup(group) => 1 + group.tool_calls.len(),
                _ => 1,
            })
            .sum()
    }

    fn insert_sorted(&mut self, item: TimelineItem) {
        let ts = item.timestamp();
        let at = self.items.partition_point(|it| it.timestamp() <= ts);
        self.items.insert(at, item);
    }

    fn reposition(&mut self, position: usize, item: TimelineItem) -> Overwrite {
        self.items.remove(position);
        self.insert_sorted(item);
        self.index.rebuild(&self.items);
        Overwrite::Repositioned
    }

    fn overwrite_top_level(&mut self, position: usize, item: TimelineItem) -> Overwrite {
        let same_slot = match (&self.items[position], &item) {
            (
                TimelineItem::Message { message: old, .. },
                TimelineItem::Message { message: new, .. },
            ) => old.timestamp == new.timestamp,
            (TimelineItem::ToolCall(old), TimelineItem::ToolCall(new)) => {
                old.timestamp == new.timestamp
            }
            _ => false,
        };
        if !same_slot {
            return self.reposition(position, item);
        }
        match (&mut self.items[position], item) {
            // order_ts stays: a deferred message keeps its placement.
            (
                TimelineItem::Message { message, .. },
                TimelineItem::Message {
                    message: incoming, ..
                },
            ) => *message = incoming,
            (existing, incoming) => *existing = incoming,
        }
        Overwrite::Patched
    }

    fn overwrite_member(
        &mut self,
        position: usize,
        member: usize,
        item: TimelineItem,
    ) -> Overwrite {
        let TimelineItem::ToolCall(incoming) = item else {
            return Overwrite::Missing;
        };
        let TimelineItem::ToolCallGroup(group) = &mut self.items[position] else {
            return Overwrite::Missing;
        };
        let before: Timestamp = group.timestamp();
        let moved = group.tool_calls[member].timestamp != incoming.timestamp;
        group.tool_calls[member] = incoming;
        if !moved {
            return Overwrite::Patched;
        }
        group.tool_calls.sort_by_key(|call| call.timestamp);
        if group.timestamp() == before {
            self.index.rebuild(&self.items);
            return Overwrite::Patched;
        }
        let group = self.items[position].clone();
        self.reposition(position, group)
    }
}
