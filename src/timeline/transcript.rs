use super::actor::TimelineCommand;
use super::types::{Message, ToolCall};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Historical messages and tool calls supplied once when a session is
/// attached. Same shape as a live snapshot pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionHistory {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl SessionHistory {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session history {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Session history at {} is invalid", path.display()))
    }
}

/// One line of a recorded session: the event and the delay before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    #[serde(default)]
    pub after_ms: u64,
    pub event: TimelineCommand,
}

/// Parse a JSON Lines transcript. Blank lines are skipped.
pub fn parse_transcript(content: &str) -> Result<Vec<TranscriptEntry>> {
    let mut entries = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: TranscriptEntry = serde_json::from_str(line)
            .with_context(|| format!("Invalid transcript entry on line {}", lineno + 1))?;
        entries.push(entry);
    }
    Ok(entries)
}

pub fn load_transcript(path: &Path) -> Result<Vec<TranscriptEntry>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read transcript {}", path.display()))?;
    parse_transcript(&content)
}
