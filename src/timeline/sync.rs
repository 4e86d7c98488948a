use super::state::{Overwrite, TimelineState};
use super::types::TimelineEntity;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// What one `sync` call did to the shared timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    /// Only the most recently active entity changed and was patched by id.
    pub fast_path: bool,
    /// Items were added while the reader was pinned near the bottom.
    pub scroll_to_bottom: bool,
}

impl SyncOutcome {
    pub fn structural(&self) -> bool {
        self.added > 0 || self.removed > 0
    }

    pub fn changed(&self) -> bool {
        self.structural() || self.updated > 0
    }
}

/// Reconciles one feed's snapshots against the ids it has already committed.
///
/// One instance per feed; instances never touch each other's ids but share
/// the `TimelineState` they are handed.
#[derive(Debug)]
pub struct FeedSync<E: TimelineEntity> {
    previous_ids: HashSet<String>,
    previous: HashMap<String, E>,
}

impl<E: TimelineEntity> Default for FeedSync<E> {
    fn default() -> Self {
        Self {
            previous_ids: HashSet::new(),
            previous: HashMap::new(),
        }
    }
}

impl<E: TimelineEntity> FeedSync<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget what was seen and treat `snapshot` as already committed.
    pub fn reset_baseline(&mut self, snapshot: &[E]) {
        self.previous_ids.clear();
        self.previous.clear();
        for entity in snapshot {
            self.previous_ids.insert(entity.id().to_string());
            self.previous
                .insert(entity.id().to_string(), entity.clone());
        }
    }

    pub fn sync(
        &mut self,
        state: &mut TimelineState,
        snapshot: Vec<E>,
        near_bottom: bool,
    ) -> SyncOutcome {
        let snapshot = dedup_by_id(snapshot);
        let next_ids: HashSet<String> = snapshot.iter().map(|e| e.id().to_string()).collect();
        let added_ids: HashSet<&str> = next_ids
            .difference(&self.previous_ids)
            .map(String::as_str)
            .collect();
        let removed_ids: HashSet<String> = self
            .previous_ids
            .difference(&next_ids)
            .cloned()
            .collect();

        let mut outcome = SyncOutcome::default();

        if added_ids.is_empty() && removed_ids.is_empty() {
            let changed: Vec<usize> = snapshot
                .iter()
                .enumerate()
                .filter(|(_, e)| self.previous.get(e.id()) != Some(*e))
                .map(|(i, _)| i)
                .collect();
            if changed.is_empty() {
                return outcome;
            }
            if changed == [snapshot.len() - 1] && self.is_live_tail(&snapshot[changed[0]]) {
                let entity = snapshot[changed[0]].clone();
                match state.overwrite(entity.clone().into_item()) {
                    Overwrite::Missing => {
                        // Seen but never committed: recover by inserting it.
                        let edit = state.apply_structural(&HashSet::new(), vec![entity.into_item()]);
                        outcome.added = edit.inserted;
                    }
                    _ => {
                        outcome.updated = 1;
                        outcome.fast_path = true;
                    }
                }
                outcome.scroll_to_bottom = near_bottom && outcome.added > 0;
                self.remember(next_ids, snapshot);
                return outcome;
            }
        }

        let added_items = snapshot
            .iter()
            .filter(|e| added_ids.contains(e.id()))
            .map(|e| e.clone().into_item())
            .collect();
        // Removals and insertions first; the index is rebuilt inside
        // apply_structural before any overwrite below reads it.
        let edit = state.apply_structural(&removed_ids, added_items);
        outcome.added = edit.inserted;
        outcome.removed = edit.removed;

        for entity in &snapshot {
            let Some(previous) = self.previous.get(entity.id()) else {
                continue;
            };
            if previous == entity {
                continue;
            }
            if state.overwrite(entity.clone().into_item()) != Overwrite::Missing {
                outcome.updated += 1;
            }
        }

        outcome.scroll_to_bottom = near_bottom && outcome.added > 0;
        if outcome.changed() {
            debug!(
                "Synced {}: +{} -{} ~{}",
                E::FEED,
                outcome.added,
                outcome.removed,
                outcome.updated
            );
        }
        self.remember(next_ids, snapshot);
        outcome
    }

    fn is_live_tail(&self, entity: &E) -> bool {
        entity.is_live()
            || self
                .previous
                .get(entity.id())
                .is_some_and(|previous| previous.is_live())
    }

    fn remember(&mut self, next_ids: HashSet<String>, snapshot: Vec<E>) {
        self.previous_ids = next_ids;
        self.previous = snapshot
            .into_iter()
            .map(|e| (e.id().to_string(), e))
            .collect();
    }
}

/// Keep the first occurrence of each id.
fn dedup_by_id<E: TimelineEntity>(snapshot: Vec<E>) -> Vec<E> {
    let mut seen = HashSet::with_capacity(snapshot.len());
    snapshot
        .into_iter()
        .filter(|e| seen.insert(e.id().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::grouping::regroup;
    use crate::timeline::types::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn msg(id: &str, role: Role, ts: u64, text: &str) -> Message {
        Message {
            id: id.into(),
            role,
            content: text.into(),
            timestamp: ts,
            is_complete: false,
            blocks: None,
        }
    }

    fn call(id: &str, ts: u64, status: ToolStatus) -> ToolCall {
        ToolCall {
            id: id.into(),
            title: format!("Run {id}"),
            kind: ToolKind::Execute,
            status,
            timestamp: ts,
            iteration_id: None,
            parent_id: None,
            content: Vec::new(),
        }
    }

    fn ids(state: &TimelineState) -> Vec<String> {
        state
            .items()
            .iter()
            .map(|i| i.stable_id().to_string())
            .collect()
    }

    #[test]
    fn test_first_sync_inserts_everything_sorted() {
        let mut state = TimelineState::new();
        let mut feed = FeedSync::<Message>::new();
        let outcome = feed.sync(
            &mut state,
            vec![
                msg("a1", Role::Agent, 20, "x"),
                msg("u1", Role::User, 10, "hi"),
            ],
            true,
        );
        assert_eq!(outcome.added, 2);
        assert!(outcome.scroll_to_bottom);
        assert_eq!(ids(&state), vec!["u1", "a1"]);
    }

    #[test]
    fn test_token_update_takes_fast_path() {
        let mut state = TimelineState::new();
        let mut feed = FeedSync::<Message>::new();
        feed.sync(
            &mut state,
            vec![msg("u1", Role::User, 1, "hi"), msg("a1", Role::Agent, 2, "He")],
            true,
        );
        let rev = state.revision();
        let outcome = feed.sync(
            &mut state,
            vec![msg("u1", Role::User, 1, "hi"), msg("a1", Role::Agent, 2, "Hello")],
            true,
        );
        assert!(outcome.fast_path);
        assert!(!outcome.structural());
        assert!(!outcome.scroll_to_bottom);
        assert_eq!(state.revision(), rev + 1);
        assert_eq!(state.items()[1].as_message().unwrap().content, "Hello");
    }

    #[test]
    fn test_non_tail_change_uses_general_path() {
        let mut state = TimelineState::new();
        let mut feed = FeedSync::<Message>::new();
        feed.sync(
            &mut state,
            vec![msg("u1", Role::User, 1, "hi"), msg("a1", Role::Agent, 2, "ok")],
            false,
        );
        let outcome = feed.sync(
            &mut state,
            vec![msg("u1", Role::User, 1, "hi (edited)"), msg("a1", Role::Agent, 2, "ok")],
            false,
        );
        assert!(!outcome.fast_path);
        assert_eq!(outcome.updated, 1);
        assert_eq!(state.items()[0].as_message().unwrap().content, "hi (edited)");
    }

    #[test]
    fn test_identical_snapshot_is_idempotent() {
        let mut state = TimelineState::new();
        let mut feed = FeedSync::<ToolCall>::new();
        let snapshot = vec![
            call("t1", 1, ToolStatus::Completed),
            call("t2", 2, ToolStatus::InProgress),
        ];
        feed.sync(&mut state, snapshot.clone(), true);
        let rev = state.revision();
        let before = state.items().to_vec();
        let outcome = feed.sync(&mut state, snapshot, true);
        assert!(!outcome.changed());
        assert_eq!(state.revision(), rev);
        assert_eq!(state.items(), before.as_slice());
        assert!(state.index_in_sync());
    }

    #[test]
    fn test_removal_and_update_in_one_sync() {
        let mut state = TimelineState::new();
        let mut feed = FeedSync::<ToolCall>::new();
        feed.sync(
            &mut state,
            vec![
                call("t1", 1, ToolStatus::InProgress),
                call("t2", 2, ToolStatus::InProgress),
                call("t3", 3, ToolStatus::InProgress),
            ],
            false,
        );
        // t1 disappears, t3 completes, t4 arrives: the overwrite of t3 must
        // see positions after t1's removal and t4's insertion.
        let outcome = feed.sync(
            &mut state,
            vec![
                call("t2", 2, ToolStatus::InProgress),
                call("t3", 3, ToolStatus::Completed),
                call("t4", 4, ToolStatus::Pending),
            ],
            false,
        );
        assert_eq!((outcome.added, outcome.removed, outcome.updated), (1, 1, 1));
        assert!(!outcome.scroll_to_bottom);
        assert_eq!(ids(&state), vec!["t2", "t3", "t4"]);
        let TimelineItem::ToolCall(t3) = &state.items()[1] else {
            panic!("expected tool call");
        };
        assert_eq!(t3.status, ToolStatus::Completed);
        assert!(state.index_in_sync());
    }

    #[test]
    fn test_feeds_share_state_without_clobbering() {
        let mut state = TimelineState::new();
        let mut messages = FeedSync::<Message>::new();
        let mut tools = FeedSync::<ToolCall>::new();
        messages.sync(&mut state, vec![msg("u1", Role::User, 0, "go")], false);
        tools.sync(&mut state, vec![call("t1", 5, ToolStatus::InProgress)], false);
        messages.sync(
            &mut state,
            vec![msg("u1", Role::User, 0, "go"), msg("a1", Role::Agent, 9, "done")],
            false,
        );
        tools.sync(&mut state, vec![call("t1", 5, ToolStatus::Completed)], false);
        assert_eq!(ids(&state), vec!["u1", "t1", "a1"]);
        assert!(state.is_sorted());
    }

    #[test]
    fn test_reset_baseline_suppresses_reinsertion() {
        let mut state = TimelineState::new();
        let mut feed = FeedSync::<Message>::new();
        let history = vec![msg("u1", Role::User, 0, "old")];
        state.replace_all(vec![TimelineItem::message(history[0].clone())]);
        feed.reset_baseline(&history);
        let outcome = feed.sync(&mut state, history, true);
        assert!(!outcome.changed());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_duplicate_ids_within_snapshot_collapse() {
        let mut state = TimelineState::new();
        let mut feed = FeedSync::<Message>::new();
        let outcome = feed.sync(
            &mut state,
            vec![msg("u1", Role::User, 0, "a"), msg("u1", Role::User, 0, "b")],
            false,
        );
        assert_eq!(outcome.added, 1);
        assert_eq!(state.items()[0].as_message().unwrap().content, "a");
    }

    fn assert_consistent(state: &TimelineState, seed: u64, step: usize) {
        let order: Vec<(String, u64)> = state
            .items()
            .iter()
            .map(|i| (i.stable_id().to_string(), i.timestamp()))
            .collect();
        assert!(state.is_sorted(), "seed {seed} step {step}: out of order {order:?}");
        assert!(state.index_in_sync(), "seed {seed} step {step}: stale index");
        let mut seen = HashSet::new();
        for item in state.items() {
            assert!(
                seen.insert(item.stable_id().to_string()),
                "seed {seed} step {step}: duplicate {}",
                item.stable_id()
            );
            if let TimelineItem::ToolCallGroup(group) = item {
                for call in &group.tool_calls {
                    assert!(
                        seen.insert(call.id.clone()),
                        "seed {seed} step {step}: duplicate member {}",
                        call.id
                    );
                }
            }
        }
    }

    fn pick(rng: &mut StdRng, len: usize) -> Option<usize> {
        (len > 0).then(|| rng.random_range(0..len))
    }

    #[test]
    fn test_random_snapshot_sequences_keep_timeline_consistent() {
        for seed in 0..300u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut state = TimelineState::new();
            let mut message_feed = FeedSync::<Message>::new();
            let mut tool_feed = FeedSync::<ToolCall>::new();
            let mut messages: Vec<Message> = Vec::new();
            let mut calls: Vec<ToolCall> = Vec::new();

            for step in 0..60 {
                match rng.random_range(0..9) {
                    0 | 1 => {
                        let role = match rng.random_range(0..3) {
                            0 => Role::User,
                            1 => Role::Agent,
                            _ => Role::System,
                        };
                        let ts = rng.random_range(0..100);
                        messages.push(msg(&format!("m{step}"), role, ts, "x"));
                    }
                    2 | 3 => {
                        let status = if rng.random_bool(0.5) {
                            ToolStatus::InProgress
                        } else {
                            ToolStatus::Completed
                        };
                        let ts = rng.random_range(0..100);
                        calls.push(call(&format!("c{step}"), ts, status));
                    }
                    4 => {
                        if let Some(i) = pick(&mut rng, messages.len()) {
                            messages.remove(i);
                        }
                    }
                    5 => {
                        if let Some(i) = pick(&mut rng, calls.len()) {
                            calls.remove(i);
                        }
                    }
                    6 => {
                        if let Some(i) = pick(&mut rng, messages.len()) {
                            messages[i].timestamp = rng.random_range(0..100);
                            messages[i].content.push('y');
                        }
                    }
                    7 => {
                        if let Some(i) = pick(&mut rng, calls.len()) {
                            calls[i].timestamp = rng.random_range(0..100);
                            calls[i].status = ToolStatus::Completed;
                        }
                    }
                    _ => {
                        let items = regroup(&messages, &calls, rng.random_bool(0.3), None);
                        state.replace_all(items);
                        message_feed.reset_baseline(&messages);
                        tool_feed.reset_baseline(&calls);
                        assert_consistent(&state, seed, step);
                        continue;
                    }
                }
                message_feed.sync(&mut state, messages.clone(), true);
                assert_consistent(&state, seed, step);
                tool_feed.sync(&mut state, calls.clone(), true);
                assert_consistent(&state, seed, step);
            }
        }
    }
}
