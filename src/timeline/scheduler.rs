use super::types::{Message, ToolCall};
use crate::config::TimelineConfig;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub coalesce_interval: Duration,
    pub tool_throttle: Duration,
    pub settle_retries: u32,
    pub settle_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&TimelineConfig::default())
    }
}

impl From<&TimelineConfig> for SchedulerConfig {
    fn from(cfg: &TimelineConfig) -> Self {
        Self {
            coalesce_interval: Duration::from_millis(cfg.coalesce_interval_ms),
            tool_throttle: Duration::from_millis(cfg.tool_throttle_ms),
            settle_retries: cfg.settle_retries,
            settle_delay: Duration::from_millis(cfg.settle_delay_ms),
        }
    }
}

/// Work the owner must carry out, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerAction {
    CommitMessages(Vec<Message>),
    CommitToolCalls(Vec<ToolCall>),
    /// Run the full grouping pass. `settled` is false when the tool-call ids
    /// were still moving after the retry budget ran out.
    Regroup { settled: bool },
}

#[derive(Debug)]
struct SettleCheck {
    observed: HashSet<String>,
    retries: u32,
    deadline: Instant,
}

/// Decides when snapshots are committed and when the grouping pass runs.
///
/// Holds deadlines, not timers: the owner sleeps until `next_deadline()` and
/// then calls `poll`. Starting a new window replaces the old deadline.
#[derive(Debug)]
pub struct BatchScheduler {
    config: SchedulerConfig,
    streaming: bool,
    pending_messages: Option<Vec<Message>>,
    message_deadline: Option<Instant>,
    pending_tool_calls: Option<Vec<ToolCall>>,
    tool_window_ends: Option<Instant>,
    latest_tool_ids: HashSet<String>,
    settle: Option<SettleCheck>,
}

impl BatchScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            streaming: false,
            pending_messages: None,
            message_deadline: None,
            pending_tool_calls: None,
            tool_window_ends: None,
            latest_tool_ids: HashSet::new(),
            settle: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    #[cfg(test)]
    pub fn is_settling(&self) -> bool {
        self.settle.is_some()
    }

    /// While streaming only the newest snapshot is kept until the coalescing
    /// window closes; otherwise it commits straight away.
    pub fn on_messages(&mut self, snapshot: Vec<Message>, now: Instant) -> Option<SchedulerAction> {
        if !self.streaming {
            self.pending_messages = None;
            self.message_deadline = None;
            return Some(SchedulerAction::CommitMessages(snapshot));
        }
        self.pending_messages = Some(snapshot);
        if self.message_deadline.is_none() {
            self.message_deadline = Some(now + self.config.coalesce_interval);
        }
        None
    }

    /// Leading-edge throttle: the first snapshot of a window commits, later
    /// ones within the window collapse into one trailing commit.
    pub fn on_tool_calls(&mut self, snapshot: Vec<ToolCall>, now: Instant) -> Option<SchedulerAction> {
        self.latest_tool_ids = snapshot.iter().map(|c| c.id.clone()).collect();
        match self.tool_window_ends {
            Some(end) if now < end => {
                self.pending_tool_calls = Some(snapshot);
                None
            }
            _ => {
                self.pending_tool_calls = None;
                self.tool_window_ends = Some(now + self.config.tool_throttle);
                Some(SchedulerAction::CommitToolCalls(snapshot))
            }
        }
    }

    /// Edge-triggered: repeating the current value does nothing.
    pub fn on_streaming(&mut self, active: bool, now: Instant) -> Vec<SchedulerAction> {
        if active == self.streaming {
            return Vec::new();
        }
        self.streaming = active;
        let mut actions = Vec::new();
        if active {
            // The previous generation still owes its regroup; run it now
            // instead of waiting for ids that will keep moving.
            if self.settle.take().is_some() {
                debug!("Streaming restarted before tool calls settled; regrouping now");
                self.flush_tool_calls(now, &mut actions);
                actions.push(SchedulerAction::Regroup { settled: false });
            }
            return actions;
        }

        self.message_deadline = None;
        if let Some(snapshot) = self.pending_messages.take() {
            actions.push(SchedulerAction::CommitMessages(snapshot));
        }
        self.settle = Some(SettleCheck {
            observed: self.latest_tool_ids.clone(),
            retries: 0,
            deadline: now + self.config.settle_delay,
        });
        debug!("Streaming ended; waiting for tool calls to settle");
        actions
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let tool_deadline = self
            .pending_tool_calls
            .as_ref()
            .and(self.tool_window_ends);
        [
            self.message_deadline,
            tool_deadline,
            self.settle.as_ref().map(|s| s.deadline),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Fire every deadline that is due at `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();

        if self.message_deadline.is_some_and(|d| d <= now) {
            self.message_deadline = None;
            if let Some(snapshot) = self.pending_messages.take() {
                actions.push(SchedulerAction::CommitMessages(snapshot));
                if self.streaming {
                    self.message_deadline = Some(now + self.config.coalesce_interval);
                }
            }
        }

        if self.tool_window_ends.is_some_and(|d| d <= now) {
            self.flush_tool_calls(now, &mut actions);
        }

        if let Some(settle) = self.settle.as_mut() {
            if settle.deadline <= now {
                if settle.observed == self.latest_tool_ids {
                    self.settle = None;
                    self.flush_tool_calls(now, &mut actions);
                    actions.push(SchedulerAction::Regroup { settled: true });
                } else if settle.retries >= self.config.settle_retries {
                    warn!(
                        "Tool calls still changing after {} settle retries; regrouping anyway",
                        settle.retries
                    );
                    self.settle = None;
                    self.flush_tool_calls(now, &mut actions);
                    actions.push(SchedulerAction::Regroup { settled: false });
                } else {
                    settle.retries += 1;
                    settle.observed = self.latest_tool_ids.clone();
                    settle.deadline = now + self.config.settle_delay;
                }
            }
        }

        actions
    }

    /// Commit whatever is buffered, for shutdown. A regroup still waiting to
    /// settle runs best-effort.
    pub fn drain(&mut self) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();
        self.message_deadline = None;
        self.tool_window_ends = None;
        if let Some(snapshot) = self.pending_messages.take() {
            actions.push(SchedulerAction::CommitMessages(snapshot));
        }
        if let Some(snapshot) = self.pending_tool_calls.take() {
            actions.push(SchedulerAction::CommitToolCalls(snapshot));
        }
        if let Some(settle) = self.settle.take() {
            let settled = settle.observed == self.latest_tool_ids;
            actions.push(SchedulerAction::Regroup { settled });
        }
        actions
    }

    fn flush_tool_calls(&mut self, now: Instant, actions: &mut Vec<SchedulerAction>) {
        match self.pending_tool_calls.take() {
            Some(snapshot) => {
                actions.push(SchedulerAction::CommitToolCalls(snapshot));
                self.tool_window_ends = Some(now + self.config.tool_throttle);
            }
            None => {
                if self.tool_window_ends.is_some_and(|d| d <= now) {
                    self.tool_window_ends = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::types::{Role, ToolKind, ToolStatus};

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            coalesce_interval: Duration::from_millis(50),
            tool_throttle: Duration::from_millis(100),
            settle_retries: 3,
            settle_delay: Duration::from_millis(150),
        }
    }

    fn agent(text: &str) -> Vec<Message> {
        vec![Message {
            id: "a1".into(),
            role: Role::Agent,
            content: text.into(),
            timestamp: 1,
            is_complete: false,
            blocks: None,
        }]
    }

    fn calls(ids: &[&str]) -> Vec<ToolCall> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| ToolCall {
                id: id.to_string(),
                title: id.to_string(),
                kind: ToolKind::Read,
                status: ToolStatus::InProgress,
                timestamp: i as u64,
                iteration_id: None,
                parent_id: None,
                content: Vec::new(),
            })
            .collect()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_messages_commit_immediately_when_idle() {
        let mut sched = BatchScheduler::new(config());
        let action = sched.on_messages(agent("hi"), Instant::now());
        assert_eq!(action, Some(SchedulerAction::CommitMessages(agent("hi"))));
        assert!(sched.next_deadline().is_none());
    }

    #[test]
    fn test_fifty_updates_in_one_window_commit_once() {
        let t0 = Instant::now();
        let mut sched = BatchScheduler::new(config());
        sched.on_streaming(true, t0);
        for i in 0..50u64 {
            let at = t0 + Duration::from_micros(i * 900);
            assert!(sched.on_messages(agent(&format!("tok{i}")), at).is_none());
        }
        assert_eq!(sched.next_deadline(), Some(t0 + ms(50)));
        assert!(sched.poll(t0 + ms(49)).is_empty());
        let actions = sched.poll(t0 + ms(50));
        assert_eq!(actions, vec![SchedulerAction::CommitMessages(agent("tok49"))]);
        // Rescheduled while streaming, but nothing new arrived.
        assert!(sched.poll(t0 + ms(100)).is_empty());
        assert!(sched.next_deadline().is_none());
    }

    #[test]
    fn test_tool_calls_throttle_independently() {
        let t0 = Instant::now();
        let mut sched = BatchScheduler::new(config());
        sched.on_streaming(true, t0);
        sched.on_messages(agent("x"), t0);
        assert!(matches!(
            sched.on_tool_calls(calls(&["t1"]), t0),
            Some(SchedulerAction::CommitToolCalls(_))
        ));
        assert!(sched.on_tool_calls(calls(&["t1", "t2"]), t0 + ms(10)).is_none());
        assert!(sched.on_tool_calls(calls(&["t1", "t2", "t3"]), t0 + ms(20)).is_none());

        let at_50 = sched.poll(t0 + ms(50));
        assert_eq!(at_50, vec![SchedulerAction::CommitMessages(agent("x"))]);
        let at_100 = sched.poll(t0 + ms(100));
        assert_eq!(
            at_100,
            vec![SchedulerAction::CommitToolCalls(calls(&["t1", "t2", "t3"]))]
        );
    }

    #[test]
    fn test_streaming_end_is_edge_triggered() {
        let t0 = Instant::now();
        let mut sched = BatchScheduler::new(config());
        assert!(sched.on_streaming(false, t0).is_empty());
        assert!(!sched.is_settling());

        sched.on_streaming(true, t0);
        sched.on_messages(agent("final"), t0 + ms(5));
        let actions = sched.on_streaming(false, t0 + ms(10));
        assert_eq!(actions, vec![SchedulerAction::CommitMessages(agent("final"))]);
        assert!(sched.is_settling());
        assert!(sched.on_streaming(false, t0 + ms(11)).is_empty());

        let actions = sched.poll(t0 + ms(160));
        assert_eq!(actions, vec![SchedulerAction::Regroup { settled: true }]);
        assert!(!sched.is_settling());
        assert!(sched.poll(t0 + ms(1000)).is_empty());
    }

    #[test]
    fn test_settle_waits_for_trailing_tool_update() {
        let t0 = Instant::now();
        let mut sched = BatchScheduler::new(config());
        sched.on_streaming(true, t0);
        sched.on_tool_calls(calls(&["t1"]), t0);
        sched.on_streaming(false, t0 + ms(200));
        // A late tool call arrives during the first observation window.
        sched.on_tool_calls(calls(&["t1", "t2"]), t0 + ms(250));
        assert!(sched.poll(t0 + ms(350)).is_empty());
        let actions = sched.poll(t0 + ms(500));
        assert_eq!(actions, vec![SchedulerAction::Regroup { settled: true }]);
    }

    #[test]
    fn test_settle_gives_up_after_budget() {
        let t0 = Instant::now();
        let mut sched = BatchScheduler::new(config());
        sched.on_streaming(true, t0);
        sched.on_streaming(false, t0);
        let mut now = t0;
        let mut regroup = None;
        for round in 0..10u64 {
            // Keep the id set moving every observation window.
            let id = format!("t{round}");
            sched.on_tool_calls(calls(&[id.as_str()]), now + ms(1));
            now += ms(150);
            let actions = sched.poll(now);
            if let Some(found) = actions
                .iter()
                .find(|a| matches!(a, SchedulerAction::Regroup { .. }))
            {
                regroup = Some((round, found.clone()));
                break;
            }
        }
        let (round, action) = regroup.expect("settle must give up");
        assert_eq!(round, 3);
        assert_eq!(action, SchedulerAction::Regroup { settled: false });
    }

    #[test]
    fn test_restarting_stream_runs_owed_regroup() {
        let t0 = Instant::now();
        let mut sched = BatchScheduler::new(config());
        sched.on_streaming(true, t0);
        sched.on_tool_calls(calls(&["t1"]), t0);
        sched.on_tool_calls(calls(&["t1", "t2"]), t0 + ms(1));
        sched.on_streaming(false, t0 + ms(2));
        let actions = sched.on_streaming(true, t0 + ms(3));
        assert_eq!(
            actions,
            vec![
                SchedulerAction::CommitToolCalls(calls(&["t1", "t2"])),
                SchedulerAction::Regroup { settled: false },
            ]
        );
        assert!(!sched.is_settling());
        assert!(sched.poll(t0 + ms(500)).is_empty());
    }

    #[test]
    fn test_restart_without_pending_settle_emits_nothing() {
        let t0 = Instant::now();
        let mut sched = BatchScheduler::new(config());
        assert!(sched.on_streaming(true, t0).is_empty());
        sched.on_streaming(false, t0 + ms(1));
        let settled = sched.poll(t0 + ms(1000));
        assert!(settled.contains(&SchedulerAction::Regroup { settled: true }));
        assert!(sched.on_streaming(true, t0 + ms(1001)).is_empty());
    }

    #[test]
    fn test_drain_flushes_everything() {
        let t0 = Instant::now();
        let mut sched = BatchScheduler::new(config());
        sched.on_streaming(true, t0);
        sched.on_messages(agent("x"), t0);
        sched.on_tool_calls(calls(&["t1"]), t0);
        sched.on_tool_calls(calls(&["t1", "t2"]), t0 + ms(1));
        let actions = sched.drain();
        assert_eq!(
            actions,
            vec![
                SchedulerAction::CommitMessages(agent("x")),
                SchedulerAction::CommitToolCalls(calls(&["t1", "t2"])),
            ]
        );
        assert!(sched.next_deadline().is_none());
    }
}
