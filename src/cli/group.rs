use super::render;
use crate::timeline::grouping::{regroup, split_nested};
use crate::timeline::transcript::SessionHistory;
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Run one grouping pass over a saved session and print the result.
pub fn run(file: &Path, streaming: bool, json: bool) -> Result<()> {
    let history = SessionHistory::load(file)?;
    let (top_level, children) = split_nested(&history.tool_calls);
    let items = regroup(&history.messages, &top_level, streaming, None);
    info!(
        "Grouped {} messages and {} tool calls into {} items",
        history.messages.len(),
        history.tool_calls.len(),
        items.len()
    );

    if json {
        let value = render::timeline_json(None, &items, &children);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", render::timeline_text(&items, &children));
    }
    Ok(())
}
