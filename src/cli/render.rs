use crate::timeline::scroll::{ScrollAnchor, ScrollRequest, ScrollTarget};
use crate::timeline::types::{
    Role, Timestamp, ToolCall, ToolCallGroup, ToolStatus, TurnSummary,
};
use crate::timeline::TimelineItem;
use chrono::DateTime;
use serde_json::json;
use std::collections::BTreeMap;

fn clock(ts: Timestamp) -> String {
    i64::try_from(ts)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn status_mark(status: ToolStatus) -> &'static str {
    match status {
        ToolStatus::Pending => "…",
        ToolStatus::InProgress => "~",
        ToolStatus::Completed => "✓",
        ToolStatus::Failed => "✗",
    }
}

/// First line of a message, trimmed so one item stays on one row.
fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    let mut out: String = first.chars().take(80).collect();
    if first.chars().count() > 80 || text.lines().nth(1).is_some() {
        out.push_str(" …");
    }
    out
}

fn tool_line(call: &ToolCall, indent: &str) -> String {
    format!("{indent}{} {}", status_mark(call.status), call.title)
}

fn push_children(
    lines: &mut Vec<String>,
    call: &ToolCall,
    children: &BTreeMap<String, Vec<ToolCall>>,
    indent: &str,
) {
    if let Some(nested) = children.get(&call.id) {
        let deeper = format!("{indent}    ");
        for child in nested {
            lines.push(tool_line(child, &deeper));
        }
    }
}

fn group_lines(
    group: &ToolCallGroup,
    children: &BTreeMap<String, Vec<ToolCall>>,
    lines: &mut Vec<String>,
) {
    let mut header = format!(
        "[{}] tools   {} call{}",
        clock(group.timestamp()),
        group.tool_calls.len(),
        if group.tool_calls.len() == 1 { "" } else { "s" }
    );
    if let Some(iteration) = &group.iteration_id {
        header.push_str(&format!(" (iteration {iteration})"));
    }
    if !group.turn_complete {
        header.push_str(" [running]");
    }
    lines.push(header);
    for call in &group.tool_calls {
        lines.push(tool_line(call, "             "));
        push_children(lines, call, children, "             ");
    }
}

fn summary_line(summary: &TurnSummary) -> String {
    let added: usize = summary.file_changes.iter().map(|f| f.lines_added).sum();
    let removed: usize = summary.file_changes.iter().map(|f| f.lines_removed).sum();
    let mut line = format!(
        "[{}] summary {} tool call{} in {:.1}s",
        clock(summary.timestamp),
        summary.tool_call_count,
        if summary.tool_call_count == 1 { "" } else { "s" },
        summary.duration_ms as f64 / 1000.0
    );
    if !summary.file_changes.is_empty() {
        line.push_str(&format!(
            ", {} file{} changed (+{added} -{removed})",
            summary.file_changes.len(),
            if summary.file_changes.len() == 1 { "" } else { "s" }
        ));
    }
    line
}

/// Plain-text rendering, one item per line with group members indented.
pub fn timeline_text(
    items: &[TimelineItem],
    children: &BTreeMap<String, Vec<ToolCall>>,
) -> String {
    let mut lines = Vec::new();
    for item in items {
        match item {
            TimelineItem::Message { message, .. } => {
                let role = match message.role {
                    Role::User => "user   ",
                    Role::Agent => "agent  ",
                    Role::System => "system ",
                };
                let pending = if message.is_complete { "" } else { " [streaming]" };
                lines.push(format!(
                    "[{}] {role} {}{pending}",
                    clock(message.timestamp),
                    preview(&message.content)
                ));
            }
            TimelineItem::ToolCall(call) => {
                lines.push(format!(
                    "[{}] tool    {}",
                    clock(call.timestamp),
                    tool_line(call, "")
                ));
                push_children(&mut lines, call, children, "             ");
            }
            TimelineItem::ToolCallGroup(group) => group_lines(group, children, &mut lines),
            TimelineItem::TurnSummary(summary) => lines.push(summary_line(summary)),
        }
    }
    lines.join("\n")
}

pub fn timeline_json(
    revision: Option<u64>,
    items: &[TimelineItem],
    children: &BTreeMap<String, Vec<ToolCall>>,
) -> serde_json::Value {
    let mut value = json!({
        "items": items,
        "children": children,
    });
    if let Some(revision) = revision {
        value["revision"] = json!(revision);
    }
    value
}

pub fn scroll_text(request: &ScrollRequest) -> String {
    let target = match &request.target {
        ScrollTarget::Bottom => "bottom".to_string(),
        ScrollTarget::Item { id, anchor } => {
            let anchor = match anchor {
                ScrollAnchor::Top => "top",
                ScrollAnchor::Center => "center",
                ScrollAnchor::Bottom => "bottom",
            };
            format!("item {id} ({anchor})")
        }
    };
    let mut flags = Vec::new();
    if request.animated {
        flags.push("animated");
    }
    if request.force {
        flags.push("forced");
    }
    if flags.is_empty() {
        format!("scroll #{} -> {target}", request.id)
    } else {
        format!("scroll #{} -> {target} [{}]", request.id, flags.join(", "))
    }
}
