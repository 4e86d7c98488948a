use super::grouping::{regroup, split_nested};
use super::scheduler::{BatchScheduler, SchedulerAction, SchedulerConfig};
use super::scroll::{AutoScroll, ScrollAnchor, ScrollRequest};
use super::state::TimelineState;
use super::sync::{FeedSync, SyncOutcome};
use super::transcript::SessionHistory;
use super::types::{Message, TimelineItem, ToolCall};
use crate::config::TimelineConfig;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Inbound events: session snapshots plus viewport signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineCommand {
    Messages { snapshot: Vec<Message> },
    ToolCalls { snapshot: Vec<ToolCall> },
    Streaming { active: bool },
    Iteration { id: Option<String> },
    AttachHistory { history: SessionHistory },
    NearBottom { near_bottom: bool },
    ResizeStarted,
    ResizeEnded,
    JumpToBottom,
    ScrollToItem { id: String, anchor: ScrollAnchor },
}

/// Read-only snapshot of the committed timeline for the render layer.
#[derive(Debug, Clone, Default)]
pub struct TimelineView {
    pub revision: u64,
    pub items: Arc<Vec<TimelineItem>>,
    /// Parent tool-call id → nested child calls.
    pub children: Arc<BTreeMap<String, Vec<ToolCall>>>,
    pub is_streaming: bool,
}

/// Sole owner of the timeline state. Runs as one task; every sync, regroup
/// and timer firing is handled in turn on that task.
pub struct TimelineActor {
    state: TimelineState,
    messages: FeedSync<Message>,
    tool_calls: FeedSync<ToolCall>,
    scheduler: BatchScheduler,
    scroll: AutoScroll,
    /// Last committed snapshots, the input of the grouping pass.
    latest_messages: Vec<Message>,
    latest_tool_calls: Vec<ToolCall>,
    children: Arc<BTreeMap<String, Vec<ToolCall>>>,
    current_iteration: Option<String>,
    view_tx: watch::Sender<TimelineView>,
    scroll_tx: watch::Sender<Option<ScrollRequest>>,
}

impl TimelineActor {
    pub fn new(
        config: &TimelineConfig,
        view_tx: watch::Sender<TimelineView>,
        scroll_tx: watch::Sender<Option<ScrollRequest>>,
    ) -> Self {
        Self {
            state: TimelineState::new(),
            messages: FeedSync::new(),
            tool_calls: FeedSync::new(),
            scheduler: BatchScheduler::new(SchedulerConfig::from(config)),
            scroll: AutoScroll::new(Duration::from_millis(config.scroll_delay_ms)),
            latest_messages: Vec::new(),
            latest_tool_calls: Vec::new(),
            children: Arc::new(BTreeMap::new()),
            current_iteration: None,
            view_tx,
            scroll_tx,
        }
    }

    /// Process commands until the channel closes, then commit anything still
    /// buffered and return the final view.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<TimelineCommand>) -> TimelineView {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd, Instant::now()),
                    None => break,
                },
                _ = sleep_until(deadline) => self.fire_timers(Instant::now()),
            }
        }

        let now = Instant::now();
        for action in self.scheduler.drain() {
            self.apply(action, now);
        }
        debug!("Timeline actor stopped at revision {}", self.state.revision());
        self.view_tx.borrow().clone()
    }

    pub fn handle(&mut self, cmd: TimelineCommand, now: Instant) {
        match cmd {
            TimelineCommand::Messages { snapshot } => {
                if let Some(action) = self.scheduler.on_messages(snapshot, now) {
                    self.apply(action, now);
                }
            }
            TimelineCommand::ToolCalls { snapshot } => {
                if let Some(action) = self.scheduler.on_tool_calls(snapshot, now) {
                    self.apply(action, now);
                }
            }
            TimelineCommand::Streaming { active } => {
                let was = self.scheduler.is_streaming();
                for action in self.scheduler.on_streaming(active, now) {
                    self.apply(action, now);
                }
                if was != active {
                    self.publish_view();
                }
            }
            TimelineCommand::Iteration { id } => {
                self.current_iteration = id;
            }
            TimelineCommand::AttachHistory { history } => self.attach_history(history),
            TimelineCommand::NearBottom { near_bottom } => {
                self.scroll.set_near_bottom(near_bottom);
            }
            TimelineCommand::ResizeStarted => self.scroll.begin_resize(),
            TimelineCommand::ResizeEnded => self.scroll.end_resize(),
            TimelineCommand::JumpToBottom => {
                let request = self.scroll.jump_to_bottom();
                self.publish_scroll(request);
            }
            TimelineCommand::ScrollToItem { id, anchor } => {
                if !self.state.contains(&id) {
                    warn!("Ignoring scroll to unknown item {}", id);
                    return;
                }
                let request = self.scroll.scroll_to_item(id, anchor);
                self.publish_scroll(request);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.scheduler.next_deadline(), self.scroll.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn fire_timers(&mut self, now: Instant) {
        for action in self.scheduler.poll(now) {
            self.apply(action, now);
        }
        if let Some(request) = self.scroll.poll(now) {
            self.publish_scroll(request);
        }
    }

    fn apply(&mut self, action: SchedulerAction, now: Instant) {
        match action {
            SchedulerAction::CommitMessages(snapshot) => {
                self.latest_messages = snapshot.clone();
                let outcome =
                    self.messages
                        .sync(&mut self.state, snapshot, self.scroll.is_near_bottom());
                self.after_sync(outcome, false, now);
            }
            SchedulerAction::CommitToolCalls(snapshot) => {
                let (top_level, children) = split_nested(&snapshot);
                self.latest_tool_calls = snapshot;
                let children_changed = *self.children != children;
                if children_changed {
                    self.children = Arc::new(children);
                }
                let outcome =
                    self.tool_calls
                        .sync(&mut self.state, top_level, self.scroll.is_near_bottom());
                self.after_sync(outcome, children_changed, now);
            }
            SchedulerAction::Regroup { settled } => {
                self.regroup();
                if !settled {
                    debug!("Regrouped before tool calls settled");
                }
            }
        }
    }

    fn after_sync(&mut self, outcome: SyncOutcome, children_changed: bool, now: Instant) {
        if outcome.fast_path {
            debug!("Patched live tail in place");
        }
        if outcome.scroll_to_bottom && self.scroll.on_structural_addition(now) {
            debug!("Scheduled auto-scroll to bottom");
        }
        if outcome.changed() || children_changed {
            self.publish_view();
        }
    }

    fn attach_history(&mut self, history: SessionHistory) {
        info!(
            "Attaching history: {} messages, {} tool calls",
            history.messages.len(),
            history.tool_calls.len()
        );
        self.latest_messages = history.messages;
        self.latest_tool_calls = history.tool_calls;
        self.regroup();
    }

    /// Full rebuild from the latest snapshots; both feeds restart from the
    /// rebuilt list as their baseline.
    fn regroup(&mut self) {
        let (top_level, children) = split_nested(&self.latest_tool_calls);
        let items = regroup(
            &self.latest_messages,
            &top_level,
            self.scheduler.is_streaming(),
            self.current_iteration.as_deref(),
        );
        info!(
            "Regrouped {} messages and {} tool calls into {} items",
            self.latest_messages.len(),
            top_level.len(),
            items.len()
        );
        self.state.replace_all(items);
        self.children = Arc::new(children);
        self.messages.reset_baseline(&self.latest_messages);
        self.tool_calls.reset_baseline(&top_level);
        self.publish_view();
    }

    fn publish_view(&self) {
        debug_assert!(self.state.is_sorted(), "timeline out of order");
        debug_assert!(self.state.index_in_sync(), "identity index is stale");
        self.view_tx.send_replace(TimelineView {
            revision: self.state.revision(),
            items: Arc::new(self.state.items().to_vec()),
            children: self.children.clone(),
            is_streaming: self.scheduler.is_streaming(),
        });
    }

    fn publish_scroll(&self, request: ScrollRequest) {
        debug!("Scroll request {}: {:?}", request.id, request.target);
        self.scroll_tx.send_replace(Some(request));
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Client side of a running `TimelineActor`.
pub struct TimelineHandle {
    commands: mpsc::UnboundedSender<TimelineCommand>,
    view: watch::Receiver<TimelineView>,
    scroll: watch::Receiver<Option<ScrollRequest>>,
    task: JoinHandle<TimelineView>,
}

impl TimelineHandle {
    pub fn spawn(config: &TimelineConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(TimelineView::default());
        let (scroll_tx, scroll) = watch::channel(None);
        let actor = TimelineActor::new(config, view_tx, scroll_tx);
        let task = tokio::spawn(actor.run(rx));
        Self {
            commands,
            view,
            scroll,
            task,
        }
    }

    pub fn send(&self, cmd: TimelineCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|_| anyhow!("Timeline actor has stopped"))
    }

    #[cfg(test)]
    pub fn view(&self) -> TimelineView {
        self.view.borrow().clone()
    }

    pub fn subscribe_scroll(&self) -> watch::Receiver<Option<ScrollRequest>> {
        self.scroll.clone()
    }

    /// Close the command channel and wait for the actor to flush and stop.
    pub async fn shutdown(self) -> Result<TimelineView> {
        drop(self.commands);
        self.task
            .await
            .map_err(|e| anyhow!("Timeline actor panicked: {e}"))
    }
}
