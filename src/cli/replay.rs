use super::render;
use crate::config::TimelineConfig;
use crate::timeline::transcript::{load_transcript, TranscriptEntry};
use crate::timeline::{TimelineHandle, TimelineView};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

pub async fn run(config: &TimelineConfig, file: &Path, json: bool) -> Result<()> {
    let entries = load_transcript(file)?;
    info!("Replaying {} events from {}", entries.len(), file.display());
    let view = replay(config, entries, |line| println!("{line}"), json).await?;
    if json {
        let value = render::timeline_json(Some(view.revision), &view.items, &view.children);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", render::timeline_text(&view.items, &view.children));
    }
    Ok(())
}

/// Feed recorded events to a fresh timeline in real time, reporting each
/// scroll request through `emit` as it fires. Returns the final view after
/// buffered snapshots have been flushed.
pub async fn replay<F>(
    config: &TimelineConfig,
    entries: Vec<TranscriptEntry>,
    emit: F,
    json: bool,
) -> Result<TimelineView>
where
    F: Fn(String) + Send + 'static,
{
    let handle = TimelineHandle::spawn(config);
    let mut requests = WatchStream::from_changes(handle.subscribe_scroll());
    let printer = tokio::spawn(async move {
        while let Some(request) = requests.next().await {
            let Some(request) = request else {
                continue;
            };
            let line = if json {
                match serde_json::to_string(&request) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to serialize scroll request {}: {}", request.id, e);
                        continue;
                    }
                }
            } else {
                render::scroll_text(&request)
            };
            emit(line);
        }
    });

    for entry in entries {
        if entry.after_ms > 0 {
            tokio::time::sleep(Duration::from_millis(entry.after_ms)).await;
        }
        handle.send(entry.event)?;
    }
    // Let pending timers fire before the final flush.
    tokio::time::sleep(settle_window(config)).await;

    let view = handle.shutdown().await?;
    if let Err(e) = printer.await {
        warn!("Scroll request printer stopped abnormally: {}", e);
    }
    Ok(view)
}

fn settle_window(config: &TimelineConfig) -> Duration {
    let settle = config.settle_delay_ms * (u64::from(config.settle_retries) + 1);
    let longest = config
        .coalesce_interval_ms
        .max(config.tool_throttle_ms)
        .max(config.scroll_delay_ms);
    Duration::from_millis(settle + longest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::scroll::ScrollRequest;
    use crate::timeline::transcript::parse_transcript;
    use crate::timeline::TimelineItem;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_replay_groups_turn_and_reports_scrolls() {
        let transcript = r#"
{"event": {"type": "streaming", "active": true}}
{"event": {"type": "messages", "snapshot": [{"id": "u1", "role": "user", "content": "rename it", "timestamp": 0}]}}
{"after_ms": 10, "event": {"type": "tool_calls", "snapshot": [{"id": "t1", "title": "Edit a.rs", "kind": "edit", "status": "in_progress", "timestamp": 10}]}}
{"after_ms": 30, "event": {"type": "tool_calls", "snapshot": [{"id": "t1", "title": "Edit a.rs", "kind": "edit", "status": "completed", "timestamp": 10}]}}
{"after_ms": 10, "event": {"type": "messages", "snapshot": [{"id": "u1", "role": "user", "content": "rename it", "timestamp": 0}, {"id": "a1", "role": "agent", "content": "Renamed.", "timestamp": 60, "is_complete": false}]}}
{"after_ms": 100, "event": {"type": "streaming", "active": false}}
"#;
        let entries = parse_transcript(transcript).unwrap();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let view = replay(
            &TimelineConfig::default(),
            entries,
            move |line| sink.lock().unwrap().push(line),
            false,
        )
        .await
        .unwrap();

        assert!(!view.is_streaming);
        assert_eq!(view.items.len(), 4);
        assert!(matches!(view.items[1], TimelineItem::ToolCallGroup(_)));
        assert!(matches!(view.items[2], TimelineItem::TurnSummary(_)));

        let lines = lines.lock().unwrap();
        assert!(!lines.is_empty());
        assert!(lines.iter().all(|line| line.ends_with("-> bottom")), "{lines:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_json_replay_emits_one_request_per_line() {
        let transcript = r#"
{"event": {"type": "messages", "snapshot": [{"id": "u1", "role": "user", "content": "hi", "timestamp": 0}]}}
{"after_ms": 40, "event": {"type": "jump_to_bottom"}}
"#;
        let entries = parse_transcript(transcript).unwrap();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        replay(
            &TimelineConfig::default(),
            entries,
            move |line| sink.lock().unwrap().push(line),
            true,
        )
        .await
        .unwrap();

        let lines = lines.lock().unwrap();
        let requests: Vec<ScrollRequest> = lines
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(requests.len(), 2, "{lines:?}");
        assert!(!requests[0].force);
        assert!(requests[1].force);
        assert!(requests[0].id < requests[1].id);
    }

    #[test]
    fn test_settle_window_covers_retry_budget() {
        let config = TimelineConfig::default();
        assert_eq!(settle_window(&config), Duration::from_millis(150 * 4 + 100));
    }
}
