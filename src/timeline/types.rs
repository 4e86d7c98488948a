use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

// ---------------------------------------------------------------------------
// Session entities (as emitted by the agent session)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Agent,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uri: Option<String>,
    },
    ResourceLink {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    pub timestamp: Timestamp,
    #[serde(default = "default_true")]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<ContentBlock>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Read,
    Edit,
    Delete,
    Move,
    Search,
    Execute,
    Think,
    Fetch,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ToolStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ToolStatus::Pending | ToolStatus::InProgress)
    }
}

/// Payload attached to a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text {
        text: String,
    },
    /// A file edit. `old_text` is absent (or empty) when the file is created.
    Diff {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_text: Option<String>,
        #[serde(default)]
        new_text: String,
    },
    Terminal {
        terminal_id: String,
        #[serde(default)]
        output: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub title: String,
    pub kind: ToolKind,
    pub status: ToolStatus,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub content: Vec<ToolContent>,
}

// ---------------------------------------------------------------------------
// Presentation items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallGroup {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_message_id: Option<String>,
    pub turn_complete: bool,
}

impl ToolCallGroup {
    /// Earliest member timestamp; members are kept in chronological order.
    pub fn timestamp(&self) -> Timestamp {
        self.tool_calls
            .iter()
            .map(|c| c.timestamp)
            .min()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub is_new: bool,
    pub lines_added: usize,
    pub lines_removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnSummary {
    pub id: String,
    /// Latest member timestamp.
    pub timestamp: Timestamp,
    pub duration_ms: u64,
    pub tool_call_count: usize,
    pub file_changes: Vec<FileChange>,
}

/// One entry of the committed timeline.
///
/// Messages carry a separate `order_ts`: normally equal to the message's own
/// timestamp, but a system message deferred past a turn boundary is placed
/// with an ordering timestamp clamped to the item before it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum TimelineItem {
    Message { message: Message, order_ts: Timestamp },
    ToolCall(ToolCall),
    ToolCallGroup(ToolCallGroup),
    TurnSummary(TurnSummary),
}

impl TimelineItem {
    pub fn message(message: Message) -> Self {
        let order_ts = message.timestamp;
        TimelineItem::Message { message, order_ts }
    }

    pub fn stable_id(&self) -> &str {
        match self {
            TimelineItem::Message { message, .. } => &message.id,
            TimelineItem::ToolCall(call) => &call.id,
            TimelineItem::ToolCallGroup(group) => &group.id,
            TimelineItem::TurnSummary(summary) => &summary.id,
        }
    }

    /// Ordering timestamp; the committed list is sorted ascending by this.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            TimelineItem::Message { order_ts, .. } => *order_ts,
            TimelineItem::ToolCall(call) => call.timestamp,
            TimelineItem::ToolCallGroup(group) => group.timestamp(),
            TimelineItem::TurnSummary(summary) => summary.timestamp,
        }
    }

    #[cfg(test)]
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            TimelineItem::Message { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// An entity type delivered by the session as a full snapshot.
pub trait TimelineEntity: Clone + PartialEq {
    const FEED: &'static str;

    fn id(&self) -> &str;
    fn timestamp(&self) -> Timestamp;
    fn into_item(self) -> TimelineItem;
    /// Whether this entity is the kind that receives token-level updates
    /// (an agent message being written, a running tool call).
    fn is_live(&self) -> bool;
}

impl TimelineEntity for Message {
    const FEED: &'static str = "messages";

    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn into_item(self) -> TimelineItem {
        TimelineItem::message(self)
    }

    fn is_live(&self) -> bool {
        self.role == Role::Agent
    }
}

impl TimelineEntity for ToolCall {
    const FEED: &'static str = "tool_calls";

    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn into_item(self) -> TimelineItem {
        TimelineItem::ToolCall(self)
    }

    fn is_live(&self) -> bool {
        self.status.is_active()
    }
}
