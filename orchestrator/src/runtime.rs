//! The agent runtime façade.
//!
//! `AgentRuntime` is cheap to clone and is what agents, tool handlers, and
//! check-in runners hold. Every operation except `wait` returns without
//! suspending on other agents. Dropping the last clone stops every watchdog.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use codex_agent_protocol::AgentId;
use codex_agent_protocol::protocol::AgentOrigin;
use codex_agent_protocol::protocol::AgentSnapshot;
use codex_agent_protocol::protocol::AgentState;
use codex_agent_protocol::protocol::CloseResult;
use codex_agent_protocol::protocol::ContextItem;
use codex_agent_protocol::protocol::Envelope;
use codex_agent_protocol::protocol::Event;
use codex_agent_protocol::protocol::InboxMessage;
use codex_agent_protocol::protocol::MessageTarget;
use codex_agent_protocol::protocol::SpawnMode;
use codex_agent_protocol::protocol::TeamTask;
use codex_agent_protocol::protocol::WatchdogStatus;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::error::AgentError;
use crate::error::Result;
use crate::events::EventEmitter;
use crate::registry::Registry;
use crate::router;
use crate::spawner::SpawnOutcome;
use crate::spawner::SpawnRequest;
use crate::task_list::TaskList;
use crate::wait::WaitResult;
use crate::wait::WaitSet;
use crate::watchdog::CheckInRunner;
use crate::watchdog::SilentCheckIn;
use crate::watchdog::WatchdogHandle;
use crate::watchdog::WatchdogScheduler;

#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    registry: Registry,
    watchdogs: RwLock<HashMap<AgentId, WatchdogHandle>>,
    events: EventEmitter,
    send_seq: AtomicU64,
    check_in_runner: Arc<dyn CheckInRunner>,
    tasks: TaskList,
    shutdown: CancellationToken,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Non-owning handle held by watchdog schedulers.
#[derive(Clone)]
pub(crate) struct WeakAgentRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakAgentRuntime {
    pub(crate) fn upgrade(&self) -> Option<AgentRuntime> {
        self.inner.upgrade().map(|inner| AgentRuntime { inner })
    }
}

impl AgentRuntime {
    /// A runtime whose check-ins do no work of their own and report through
    /// fallback delivery.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_runner(config, Arc::new(SilentCheckIn))
    }

    pub fn with_runner(config: RuntimeConfig, check_in_runner: Arc<dyn CheckInRunner>) -> Self {
        let events = EventEmitter::new(config.event_capacity);
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                registry: Registry::default(),
                watchdogs: RwLock::new(HashMap::new()),
                events,
                send_seq: AtomicU64::new(0),
                check_in_runner,
                tasks: TaskList::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> WeakAgentRuntime {
        WeakAgentRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub(crate) fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    pub(crate) fn check_in_runner(&self) -> Arc<dyn CheckInRunner> {
        Arc::clone(&self.inner.check_in_runner)
    }

    /// Subscribe to runtime events. Slow subscribers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Register a parentless agent, typically the coordinating agent.
    pub fn create_root(&self, message: impl Into<String>) -> Result<AgentId> {
        let record = self.inner.registry.create(
            None,
            SpawnMode::Fresh,
            AgentOrigin::Root,
            ContextItem::message(message),
        )?;
        self.inner
            .events
            .agent_spawned(record.id, None, record.spawn_mode, record.origin);
        tracing::info!(agent_id = %record.id, "registered root agent");
        Ok(record.id)
    }

    /// Create a child agent of `caller`, or a watchdog handle on an owner
    /// (by default `caller`) when `request.mode` is `Watchdog`. An unknown or
    /// finished `caller` is an invalid parent, or an invalid owner when it
    /// would own the watchdog.
    pub fn spawn(&self, caller: AgentId, request: SpawnRequest) -> Result<SpawnOutcome> {
        let interval_s = request.validated_interval(&self.inner.config)?;

        if let Some(interval_s) = interval_s {
            let owner = request.owner.unwrap_or(caller);
            let watchdog_id = self.start_watchdog(owner, interval_s, request.message)?;
            return Ok(SpawnOutcome::Watchdog(watchdog_id));
        }

        let record = self.inner.registry.create(
            Some(caller),
            request.mode,
            AgentOrigin::Spawned,
            ContextItem::message(request.message),
        )?;
        self.inner.events.agent_spawned(
            record.id,
            record.parent_id,
            record.spawn_mode,
            record.origin,
        );
        tracing::info!(
            agent_id = %record.id,
            parent_id = %caller,
            spawn_mode = ?record.spawn_mode,
            "spawned child agent"
        );
        Ok(SpawnOutcome::Agent(record.id))
    }

    fn start_watchdog(&self, owner_id: AgentId, interval_s: u64, prompt: String) -> Result<AgentId> {
        let owner = self
            .inner
            .registry
            .find(&owner_id)
            .filter(|owner| owner.state() == AgentState::Active && !owner.is_closed())
            .ok_or(AgentError::InvalidOwner(owner_id))?;
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            AgentError::InvalidRequest("watchdogs require a running tokio runtime".to_string())
        })?;

        let (watchdog, scheduler) = WatchdogScheduler::new(
            self.downgrade(),
            owner,
            interval_s,
            prompt,
            self.inner.shutdown.child_token(),
        );
        let watchdog_id = scheduler.watchdog_id();
        self.write_watchdogs().insert(watchdog_id, watchdog);
        self.inner
            .events
            .watchdog_started(watchdog_id, owner_id, interval_s);
        tracing::info!(
            watchdog_id = %watchdog_id,
            owner_id = %owner_id,
            interval_s,
            "started watchdog"
        );
        handle.spawn(scheduler.run());
        Ok(watchdog_id)
    }

    /// Queue `message` for `target` as seen from `sender`. Never blocks and
    /// changes no state when it fails.
    pub fn send(
        &self,
        sender: AgentId,
        target: MessageTarget,
        message: impl Into<String>,
        interrupt: bool,
    ) -> Result<()> {
        let sender = self.inner.registry.get(&sender)?;
        let target = router::resolve_target(&self.inner.registry, &sender, target)?;
        let seq = self.inner.send_seq.fetch_add(1, Ordering::Relaxed);
        router::deliver(&sender, &target, seq, message.into(), interrupt);
        self.inner
            .events
            .message_queued(seq, sender.id, target.id, interrupt);
        Ok(())
    }

    /// Send `message` to every direct child of `sender` that still accepts
    /// messages. Returns how many children received it.
    pub fn broadcast(&self, sender: AgentId, message: impl Into<String>) -> Result<usize> {
        let sender = self.inner.registry.get(&sender)?;
        let message = message.into();
        let mut delivered = 0;
        for child in self.inner.registry.children_of(&sender.id) {
            if !child.accepts_messages() {
                continue;
            }
            let seq = self.inner.send_seq.fetch_add(1, Ordering::Relaxed);
            router::deliver(&sender, &child, seq, message.clone(), false);
            self.inner
                .events
                .message_queued(seq, sender.id, child.id, false);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Wait until one of the ordinary agents in `ids` is terminal or the
    /// (clamped) timeout elapses. Watchdog ids never block.
    pub async fn wait(&self, ids: &[AgentId], timeout: Option<Duration>) -> Result<WaitResult> {
        let mut set = WaitSet::default();
        for id in ids {
            if let Some(status) = self.watchdog_status(id) {
                set.watchdog(status);
                continue;
            }
            set.track(self.inner.registry.get(id)?);
        }

        let timeout = self.inner.config.wait_timeout(timeout);
        let timed_out = set.wait_any_terminal(timeout).await;
        let result = set.finish(timed_out, |id| self.watchdog_status(id));
        tracing::debug!(
            completed = result.completed.len(),
            still_active = result.still_active.len(),
            closed = result.closed.len(),
            timed_out,
            "wait returned"
        );
        Ok(result)
    }

    /// Cancel and close an agent, or stop a watchdog handle. Idempotent;
    /// unknown ids change nothing and are reported as such.
    pub fn close(&self, id: AgentId) -> CloseResult {
        if let Some(watchdog) = self.read_watchdogs().get(&id) {
            let newly_closed = watchdog.close();
            if newly_closed {
                tracing::info!(watchdog_id = %id, owner_id = %watchdog.owner_id, "closed watchdog");
            }
            return CloseResult::Watchdog {
                newly_closed,
                status: watchdog.status(),
            };
        }
        let Some(outcome) = self.inner.registry.close(&id) else {
            tracing::debug!(agent_id = %id, "ignoring close of unknown agent");
            return CloseResult::Unknown { id };
        };
        if outcome.canceled {
            self.inner
                .events
                .agent_state_changed(id, AgentState::Canceled);
        }
        if outcome.newly_closed {
            self.inner.events.agent_closed(id, outcome.state);
            tracing::info!(agent_id = %id, state = %outcome.state, "closed agent");
        }
        CloseResult::Agent {
            id,
            state: outcome.state,
            newly_closed: outcome.newly_closed,
        }
    }

    pub fn get_state(&self, id: AgentId) -> Result<AgentState> {
        Ok(self.inner.registry.get(&id)?.state())
    }

    /// Move `id` to `requested` on behalf of `caller`. Returns the state the
    /// agent ends up in, which is unchanged if it was already terminal.
    pub fn transition(
        &self,
        caller: AgentId,
        id: AgentId,
        requested: AgentState,
    ) -> Result<AgentState> {
        let (state, changed) = self.inner.registry.transition(caller, id, requested)?;
        if changed {
            self.inner.events.agent_state_changed(id, state);
            tracing::info!(agent_id = %id, caller = %caller, %state, "agent state changed");
        }
        Ok(state)
    }

    pub fn list_agents(&self) -> Vec<AgentSnapshot> {
        self.inner.registry.list()
    }

    pub fn list_watchdogs(&self) -> Vec<WatchdogStatus> {
        let mut statuses: Vec<WatchdogStatus> =
            self.read_watchdogs().values().map(WatchdogHandle::status).collect();
        statuses.sort_by_key(|status| (status.owner_id, status.watchdog_id));
        statuses
    }

    /// `None` when `id` is not a watchdog handle.
    pub fn watchdog_status(&self, id: &AgentId) -> Option<WatchdogStatus> {
        self.read_watchdogs().get(id).map(WatchdogHandle::status)
    }

    /// Mark the start of a turn: the agent is running and not idle.
    pub fn begin_turn(&self, id: AgentId) -> Result<()> {
        self.inner.registry.get(&id)?.set_activity(true);
        Ok(())
    }

    /// Mark the end of a turn: the agent's idle time starts now.
    pub fn end_turn(&self, id: AgentId) -> Result<()> {
        self.inner.registry.get(&id)?.set_activity(false);
        Ok(())
    }

    pub fn append_context(&self, id: AgentId, item: ContextItem) -> Result<()> {
        self.inner.registry.get(&id)?.append_context(item);
        Ok(())
    }

    pub fn context(&self, id: AgentId) -> Result<Context> {
        Ok(self.inner.registry.get(&id)?.context())
    }

    /// Take every queued message for `id`, in delivery order, appending each
    /// to the agent's context.
    pub fn drain_messages(&self, id: AgentId) -> Result<Vec<Envelope>> {
        let record = self.inner.registry.get(&id)?;
        let envelopes = record.mailbox.drain();
        for envelope in &envelopes {
            record.append_context(ContextItem::from_agent(
                envelope.from,
                envelope.message.clone(),
            ));
        }
        Ok(envelopes)
    }

    /// Whether an interrupt was requested since the last call.
    pub fn take_interrupt(&self, id: AgentId) -> Result<bool> {
        Ok(self.inner.registry.get(&id)?.mailbox.take_interrupt())
    }

    pub fn read_inbox(&self, id: AgentId) -> Result<Vec<InboxMessage>> {
        Ok(self.inner.registry.get(&id)?.inbox.read_all())
    }

    pub fn consume_inbox(&self, id: AgentId) -> Result<Vec<InboxMessage>> {
        Ok(self.inner.registry.get(&id)?.inbox.consume_unread())
    }

    /// Unread inbox messages rendered for injection into a prompt, or `None`
    /// when there are none.
    pub fn consume_inbox_as_tags(&self, id: AgentId) -> Result<Option<String>> {
        let record = self.inner.registry.get(&id)?;
        Ok(record.inbox.consume_as_tags(&self.inner.config.inbox_tag))
    }

    /// Add a task to the shared task list, optionally assigned up front.
    pub fn create_task(
        &self,
        caller: AgentId,
        title: impl Into<String>,
        depends_on: Vec<String>,
        assigned_to: Option<AgentId>,
    ) -> Result<TeamTask> {
        self.inner.registry.get(&caller)?;
        if let Some(assignee) = assigned_to {
            self.inner.registry.get(&assignee)?;
        }
        let task = self.inner.tasks.create_task(title, depends_on, assigned_to)?;
        tracing::info!(task_id = %task.id, created_by = %caller, "created team task");
        self.inner.events.team_task_updated(task.clone());
        Ok(task)
    }

    pub fn assign_task(&self, task_id: &str, assignee: AgentId) -> Result<TeamTask> {
        self.inner.registry.get(&assignee)?;
        let task = self.inner.tasks.assign_task(task_id, assignee)?;
        self.inner.events.team_task_updated(task.clone());
        Ok(task)
    }

    /// Claim the next ready task for `caller`, if any.
    pub fn accept_task(&self, caller: AgentId) -> Result<Option<TeamTask>> {
        self.inner.registry.get(&caller)?;
        let task = self.inner.tasks.accept_next_task(caller);
        if let Some(task) = &task {
            tracing::debug!(task_id = %task.id, agent_id = %caller, "accepted team task");
            self.inner.events.team_task_updated(task.clone());
        }
        Ok(task)
    }

    pub fn complete_task(&self, caller: AgentId, task_id: &str) -> Result<TeamTask> {
        self.inner.registry.get(&caller)?;
        let task = self.inner.tasks.complete_task(task_id, caller)?;
        self.inner.events.team_task_updated(task.clone());
        Ok(task)
    }

    pub fn get_task(&self, task_id: &str) -> Result<TeamTask> {
        self.inner.tasks.get_task(task_id)
    }

    pub fn get_tasks(&self) -> Vec<TeamTask> {
        self.inner.tasks.get_tasks()
    }

    /// Stop every watchdog. Agents are left as they are. Dropping the last
    /// runtime handle has the same effect on watchdogs.
    pub fn shutdown(&self) {
        for watchdog in self.read_watchdogs().values() {
            watchdog.close();
        }
        self.inner.shutdown.cancel();
        tracing::info!("agent runtime shut down");
    }

    fn read_watchdogs(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<AgentId, WatchdogHandle>> {
        self.inner
            .watchdogs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_watchdogs(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<AgentId, WatchdogHandle>> {
        self.inner
            .watchdogs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn dropping_the_runtime_stops_its_watchdogs() {
        let runtime = AgentRuntime::new(RuntimeConfig::default());
        let owner = runtime.create_root("work").unwrap();
        runtime
            .spawn(owner, SpawnRequest::watchdog("check").with_interval(60))
            .unwrap();
        let owner_record = Arc::downgrade(&runtime.registry().get(&owner).unwrap());
        let inner = Arc::downgrade(&runtime.inner);

        drop(runtime);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(inner.upgrade().is_none());
        assert!(
            owner_record.upgrade().is_none(),
            "scheduler task should have exited and released the owner"
        );
    }
}
