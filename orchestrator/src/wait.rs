//! Wait/reconciliation engine.
//!
//! `wait` suspends the caller until at least one of the ordinary agents it
//! names reaches a terminal state, or until the timeout elapses. Watchdog
//! handles are reported with their current status and never block; closed
//! agents are reported separately and never block either.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use codex_agent_protocol::AgentId;
use codex_agent_protocol::protocol::AgentState;
use codex_agent_protocol::protocol::WatchdogStatus;
use futures::future::select_all;
use serde::Deserialize;
use serde::Serialize;

use crate::registry::AgentRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitResult {
    /// Ordinary agents that are terminal, with their final state.
    pub completed: BTreeMap<AgentId, AgentState>,
    /// Ordinary agents still running. Callers wait on these again.
    pub still_active: BTreeSet<AgentId>,
    /// Watchdog handles named in the request, as of return.
    pub watchdogs: BTreeMap<AgentId, WatchdogStatus>,
    /// Agents that were closed through `close`.
    pub closed: BTreeSet<AgentId>,
    pub timed_out: bool,
}

impl WaitResult {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
            && self.still_active.is_empty()
            && self.watchdogs.is_empty()
            && self.closed.is_empty()
    }
}

/// The classified id set of one `wait` call.
#[derive(Default)]
pub(crate) struct WaitSet {
    agents: Vec<Arc<AgentRecord>>,
    closed: BTreeSet<AgentId>,
    watchdogs: BTreeMap<AgentId, WatchdogStatus>,
}

impl WaitSet {
    pub(crate) fn track(&mut self, record: Arc<AgentRecord>) {
        if record.is_closed() {
            self.closed.insert(record.id);
        } else if !self.agents.iter().any(|r| r.id == record.id) {
            self.agents.push(record);
        }
    }

    pub(crate) fn watchdog(&mut self, status: WatchdogStatus) {
        self.watchdogs.insert(status.watchdog_id, status);
    }

    /// Suspend until one tracked agent is terminal. Returns true on timeout.
    /// Does not suspend at all when nothing is trackable or something is
    /// already terminal.
    pub(crate) async fn wait_any_terminal(&self, timeout: Duration) -> bool {
        if self.agents.is_empty() || self.agents.iter().any(|r| r.state().is_terminal()) {
            return false;
        }
        let mut receivers: Vec<_> = self.agents.iter().map(|r| r.subscribe_state()).collect();
        let waits = receivers.iter_mut().map(|rx| {
            Box::pin(async move {
                // A dropped sender means the record is gone; treat as done.
                let _ = rx.wait_for(|state| state.is_terminal()).await;
            })
        });
        tokio::time::timeout(timeout, select_all(waits))
            .await
            .is_err()
    }

    /// Build the result from current state. `refresh` re-reads watchdog
    /// statuses so the caller sees them as of return.
    pub(crate) fn finish(
        self,
        timed_out: bool,
        refresh: impl Fn(&AgentId) -> Option<WatchdogStatus>,
    ) -> WaitResult {
        let mut result = WaitResult {
            closed: self.closed,
            timed_out,
            ..WaitResult::default()
        };
        for record in self.agents {
            if record.is_closed() {
                result.closed.insert(record.id);
                continue;
            }
            let state = record.state();
            if state.is_terminal() {
                result.completed.insert(record.id, state);
            } else {
                result.still_active.insert(record.id);
            }
        }
        for (id, status) in self.watchdogs {
            result.watchdogs.insert(id, refresh(&id).unwrap_or(status));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use codex_agent_protocol::protocol::AgentOrigin;
    use codex_agent_protocol::protocol::ContextItem;
    use codex_agent_protocol::protocol::SpawnMode;
    use pretty_assertions::assert_eq;

    fn agent(registry: &Registry) -> Arc<AgentRecord> {
        registry
            .create(
                None,
                SpawnMode::Fresh,
                AgentOrigin::Root,
                ContextItem::message("work"),
            )
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn empty_set_returns_immediately() {
        let set = WaitSet::default();
        assert!(!set.wait_any_terminal(Duration::from_secs(30)).await);
        let result = set.finish(false, |_| None);
        assert!(result.is_empty());
        assert!(!result.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn already_terminal_agent_short_circuits() {
        let registry = Registry::default();
        let done = agent(&registry);
        let running = agent(&registry);
        done.set_state(AgentState::Completed);

        let mut set = WaitSet::default();
        set.track(Arc::clone(&done));
        set.track(Arc::clone(&running));
        let start = tokio::time::Instant::now();
        assert!(!set.wait_any_terminal(Duration::from_secs(30)).await);
        assert_eq!(start.elapsed(), Duration::ZERO);

        let result = set.finish(false, |_| None);
        assert_eq!(
            result.completed,
            BTreeMap::from([(done.id, AgentState::Completed)])
        );
        assert_eq!(result.still_active, BTreeSet::from([running.id]));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_touching_agents() {
        let registry = Registry::default();
        let running = agent(&registry);
        let mut set = WaitSet::default();
        set.track(Arc::clone(&running));

        assert!(set.wait_any_terminal(Duration::from_millis(500)).await);
        let result = set.finish(true, |_| None);
        assert!(result.timed_out);
        assert_eq!(running.state(), AgentState::Active);
        assert_eq!(result.still_active, BTreeSet::from([running.id]));
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_when_an_agent_finishes() {
        let registry = Registry::default();
        let running = agent(&registry);
        let mut set = WaitSet::default();
        set.track(Arc::clone(&running));

        let finisher = Arc::clone(&running);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            finisher.set_state(AgentState::Failed);
        });
        assert!(!set.wait_any_terminal(Duration::from_secs(30)).await);
        let result = set.finish(false, |_| None);
        assert_eq!(
            result.completed,
            BTreeMap::from([(running.id, AgentState::Failed)])
        );
    }

    #[test]
    fn closed_agents_are_reported_separately() {
        let registry = Registry::default();
        let closed = agent(&registry);
        registry.close(&closed.id);

        let mut set = WaitSet::default();
        set.track(Arc::clone(&closed));
        let result = set.finish(false, |_| None);
        assert_eq!(result.closed, BTreeSet::from([closed.id]));
        assert!(result.completed.is_empty());
        assert!(result.still_active.is_empty());
    }
}
