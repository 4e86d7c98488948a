use super::types::{FileChange, ToolCall, ToolContent, TurnSummary};

/// Build the summary for one turn's tool calls. `None` for an empty turn.
pub fn summarize_turn(turn: &[ToolCall]) -> Option<TurnSummary> {
    let first = turn.first()?;
    let earliest = turn.iter().map(|c| c.timestamp).min().unwrap_or(first.timestamp);
    let latest = turn.iter().map(|c| c.timestamp).max().unwrap_or(first.timestamp);
    Some(TurnSummary {
        id: format!("summary-{}", first.id),
        timestamp: latest,
        duration_ms: latest.saturating_sub(earliest),
        tool_call_count: turn.len(),
        file_changes: file_changes(turn),
    })
}

/// Aggregate diff content per path, in first-touched order.
///
/// A path is new when its first diff has no prior content. Line deltas come
/// from line-count differences and never go negative.
pub fn file_changes(calls: &[ToolCall]) -> Vec<FileChange> {
    let mut changes: Vec<FileChange> = Vec::new();
    for call in calls {
        for content in &call.content {
            let ToolContent::Diff {
                path,
                old_text,
                new_text,
            } = content
            else {
                continue;
            };
            let old_lines = old_text.as_deref().map(count_lines).unwrap_or(0);
            let new_lines = count_lines(new_text);
            let added = new_lines.saturating_sub(old_lines);
            let removed = old_lines.saturating_sub(new_lines);

            match changes.iter_mut().find(|c| &c.path == path) {
                Some(existing) => {
                    existing.lines_added += added;
                    existing.lines_removed += removed;
                }
                None => changes.push(FileChange {
                    path: path.clone(),
                    is_new: old_text.as_deref().is_none_or(str::is_empty),
                    lines_added: added,
                    lines_removed: removed,
                }),
            }
        }
    }
    changes
}

fn count_lines(text: &str) -> usize {
    text.lines().count()
}
