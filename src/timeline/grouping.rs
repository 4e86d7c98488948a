use super::summary::summarize_turn;
use super::types::{Message, Role, TimelineItem, ToolCall, ToolCallGroup, Timestamp};
use std::collections::{BTreeMap, HashSet};

/// Split a tool-call snapshot into the calls shown at top level and the
/// children shown nested under their parent.
///
/// A call whose parent id is not in the snapshot stays top-level.
pub fn split_nested(calls: &[ToolCall]) -> (Vec<ToolCall>, BTreeMap<String, Vec<ToolCall>>) {
    let ids: HashSet<&str> = calls.iter().map(|c| c.id.as_str()).collect();
    let mut top_level = Vec::new();
    let mut children: BTreeMap<String, Vec<ToolCall>> = BTreeMap::new();
    for call in calls {
        match call.parent_id.as_deref() {
            Some(parent) if parent != call.id && ids.contains(parent) => {
                children
                    .entry(parent.to_string())
                    .or_default()
                    .push(call.clone());
            }
            _ => top_level.push(call.clone()),
        }
    }
    for list in children.values_mut() {
        list.sort_by_key(|c| c.timestamp);
    }
    (top_level, children)
}

/// Rebuild the presentation timeline from the full message and top-level
/// tool-call lists.
///
/// Tool calls between grouping points fold into a `ToolCallGroup`; each turn
/// that used tools gets a `TurnSummary` right after its last group; system
/// messages that arrive mid-turn are held back until the next boundary.
/// While `is_streaming`, a trailing run of tool calls stays ungrouped so it
/// can be watched live.
pub fn regroup(
    messages: &[Message],
    top_level: &[ToolCall],
    is_streaming: bool,
    current_iteration: Option<&str>,
) -> Vec<TimelineItem> {
    let mut entries: Vec<Entry<'_>> = messages
        .iter()
        .map(Entry::Message)
        .chain(top_level.iter().map(Entry::Tool))
        .collect();
    // Stable: on equal timestamps messages stay ahead of tool calls.
    entries.sort_by_key(|e| e.timestamp());

    let mut pass = Pass::new(current_iteration);
    for entry in entries {
        match entry {
            Entry::Message(message) => match message.role {
                Role::System => pass.on_system(message),
                Role::User => pass.on_user(message),
                Role::Agent => pass.on_agent(message),
            },
            Entry::Tool(call) => {
                pass.buffer.push(call.clone());
                pass.turn.push(call.clone());
            }
        }
    }
    pass.finish(is_streaming)
}

enum Entry<'a> {
    Message(&'a Message),
    Tool(&'a ToolCall),
}

impl Entry<'_> {
    fn timestamp(&self) -> Timestamp {
        match self {
            Entry::Message(m) => m.timestamp,
            Entry::Tool(c) => c.timestamp,
        }
    }
}

struct Pass<'a> {
    out: Vec<TimelineItem>,
    /// Tool calls since the last grouping point.
    buffer: Vec<ToolCall>,
    /// Every tool call of the current turn.
    turn: Vec<ToolCall>,
    last_agent_message_id: Option<String>,
    pending_system: Vec<Message>,
    /// Output position of the current turn's latest group.
    last_group_at: Option<usize>,
    current_iteration: Option<&'a str>,
}

impl<'a> Pass<'a> {
    fn new(current_iteration: Option<&'a str>) -> Self {
        Self {
            out: Vec::new(),
            buffer: Vec::new(),
            turn: Vec::new(),
            last_agent_message_id: None,
            pending_system: Vec::new(),
            last_group_at: None,
            current_iteration,
        }
    }

    fn on_system(&mut self, message: &Message) {
        if self.buffer.is_empty() && self.turn.is_empty() {
            self.flush_system();
            self.push_message(message.clone());
        } else {
            self.pending_system.push(message.clone());
        }
    }

    fn on_user(&mut self, message: &Message) {
        if !self.buffer.is_empty() {
            self.flush_group(false);
        }
        self.emit_summary();
        self.flush_system();
        self.push_message(message.clone());
    }

    fn on_agent(&mut self, message: &Message) {
        if !self.buffer.is_empty() {
            self.flush_group(true);
        }
        self.push_message(message.clone());
        self.last_agent_message_id = Some(message.id.clone());
    }

    fn finish(mut self, is_streaming: bool) -> Vec<TimelineItem> {
        if !self.buffer.is_empty() {
            if is_streaming {
                for call in std::mem::take(&mut self.buffer) {
                    self.out.push(TimelineItem::ToolCall(call));
                }
            } else {
                self.flush_group(true);
                self.emit_summary();
                self.flush_system();
            }
        } else if !is_streaming {
            self.emit_summary();
        }
        self.flush_system();
        self.out
    }

    fn flush_group(&mut self, turn_complete: bool) {
        let tool_calls = std::mem::take(&mut self.buffer);
        let Some(first) = tool_calls.first() else {
            return;
        };
        let iteration_id = tool_calls
            .iter()
            .find_map(|c| c.iteration_id.clone())
            .or_else(|| self.current_iteration.map(String::from));
        let group = ToolCallGroup {
            id: format!("group-{}", first.id),
            iteration_id,
            tool_calls,
            anchor_message_id: self.last_agent_message_id.clone(),
            turn_complete,
        };
        self.out.push(TimelineItem::ToolCallGroup(group));
        self.last_group_at = Some(self.out.len() - 1);
    }

    fn emit_summary(&mut self) {
        let turn = std::mem::take(&mut self.turn);
        let Some(summary) = summarize_turn(&turn) else {
            return;
        };
        let item = TimelineItem::TurnSummary(summary);
        match self.last_group_at.take() {
            Some(at) => self.out.insert(at + 1, item),
            None => self.out.push(item),
        }
    }

    fn flush_system(&mut self) {
        for message in std::mem::take(&mut self.pending_system) {
            self.push_message(message);
        }
    }

    /// Messages are placed no earlier than the item before them.
    fn push_message(&mut self, message: Message) {
        let floor = self.out.last().map(|i| i.timestamp()).unwrap_or(0);
        let order_ts = message.timestamp.max(floor);
        self.out.push(TimelineItem::Message { message, order_ts });
    }
}
