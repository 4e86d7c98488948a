use super::types::TimelineItem;
use std::collections::HashMap;

/// Where an id lives in the committed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub position: usize,
    /// Set when the id is a tool call folded into the group at `position`.
    pub member: Option<usize>,
}

impl Slot {
    fn top(position: usize) -> Self {
        Self {
            position,
            member: None,
        }
    }
}

/// Positional mirror of the committed list, keyed by stable id.
///
/// Only `TimelineState` rebuilds it, immediately after each structural edit.
#[derive(Debug, Default, Clone)]
pub struct IdentityIndex {
    slots: HashMap<String, Slot>,
}

impl IdentityIndex {
    pub fn build(items: &[TimelineItem]) -> Self {
        let mut index = Self::default();
        index.rebuild(items);
        index
    }

    pub fn rebuild(&mut self, items: &[TimelineItem]) {
        self.slots.clear();
        self.slots.reserve(items.len());
        for (position, item) in items.iter().enumerate() {
            self.slots
                .insert(item.stable_id().to_string(), Slot::top(position));
            if let TimelineItem::ToolCallGroup(group) = item {
                for (member, call) in group.tool_calls.iter().enumerate() {
                    self.slots.insert(
                        call.id.clone(),
                        Slot {
                            position,
                            member: Some(member),
                        },
                    );
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Slot> {
        self.slots.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when every slot points at the item carrying that id.
    pub fn mirrors(&self, items: &[TimelineItem]) -> bool {
        let expected = IdentityIndex::build(items);
        expected.slots == self.slots
    }
}
