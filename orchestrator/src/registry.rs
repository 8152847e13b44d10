//! Task registry: identity, parent linkage, spawn mode, and state of every
//! agent in the tree.
//!
//! The map lock is only held to look up or insert records. Each record owns
//! its state in a `watch` channel, so state transitions are atomic per agent
//! and waiters can subscribe without touching the map.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use codex_agent_protocol::AgentId;
use codex_agent_protocol::protocol::AgentOrigin;
use codex_agent_protocol::protocol::AgentSnapshot;
use codex_agent_protocol::protocol::AgentState;
use codex_agent_protocol::protocol::ContextItem;
use codex_agent_protocol::protocol::SpawnMode;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::context::Context;
use crate::context::propagate;
use crate::error::AgentError;
use crate::error::Result;
use crate::idle_clock::Activity;
use crate::inbox::Inbox;
use crate::router::Mailbox;

#[derive(Debug)]
pub(crate) struct AgentRecord {
    pub(crate) id: AgentId,
    pub(crate) parent_id: Option<AgentId>,
    pub(crate) spawn_mode: SpawnMode,
    pub(crate) origin: AgentOrigin,
    created_seq: u64,
    state: watch::Sender<AgentState>,
    activity: watch::Sender<Activity>,
    closed: AtomicBool,
    /// Only meaningful for check-ins: set once the check-in messages its owner.
    sent_to_owner: AtomicBool,
    /// Set once a finished check-in has handed back its payload.
    released: AtomicBool,
    context: Mutex<Context>,
    pub(crate) mailbox: Mailbox,
    pub(crate) inbox: Inbox,
}

impl AgentRecord {
    pub(crate) fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    pub(crate) fn subscribe_activity(&self) -> watch::Receiver<Activity> {
        self.activity.subscribe()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn accepts_messages(&self) -> bool {
        !self.is_closed() && !self.is_released() && self.state() != AgentState::Canceled
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Drop the context, queued messages, and inbox of a terminal agent,
    /// keeping only its identity and final state. Released agents accept no
    /// further messages. Returns false if the agent is still running or was
    /// already released.
    pub(crate) fn release(&self) -> bool {
        if !self.state().is_terminal() || self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.lock_context() = Context::new();
        self.mailbox.drain();
        self.inbox.clear();
        true
    }

    /// Move to `next` unless already terminal. Returns whether the state
    /// changed; terminal states are never left.
    pub(crate) fn set_state(&self, next: AgentState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    pub(crate) fn set_activity(&self, running: bool) {
        self.activity.send_if_modified(|current| match (running, *current) {
            (true, Activity::Running) => false,
            (false, Activity::Idle { .. }) => false,
            (true, Activity::Idle { .. }) => {
                *current = Activity::Running;
                true
            }
            (false, Activity::Running) => {
                *current = Activity::Idle {
                    since: Instant::now(),
                };
                true
            }
        });
    }

    pub(crate) fn context(&self) -> Context {
        self.lock_context().snapshot()
    }

    pub(crate) fn append_context(&self, item: ContextItem) {
        self.lock_context().push(item);
    }

    pub(crate) fn mark_sent_to_owner(&self) {
        self.sent_to_owner.store(true, Ordering::Release);
    }

    pub(crate) fn sent_to_owner(&self) -> bool {
        self.sent_to_owner.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            parent_id: self.parent_id,
            spawn_mode: self.spawn_mode,
            origin: self.origin,
            state: self.state(),
            closed: self.is_closed(),
            pending_messages: self.mailbox.len(),
            context_len: self.lock_context().len(),
        }
    }

    fn lock_context(&self) -> std::sync::MutexGuard<'_, Context> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outcome of a `close` request on a known agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CloseOutcome {
    pub(crate) state: AgentState,
    /// False when the agent had already been closed.
    pub(crate) newly_closed: bool,
    /// True when closing moved the agent from Active to Canceled.
    pub(crate) canceled: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    agents: RwLock<HashMap<AgentId, Arc<AgentRecord>>>,
    next_seq: AtomicU64,
}

impl Registry {
    /// Register a new ACTIVE agent. `parent_id` must name a known,
    /// non-terminal, unclosed agent; the child's context is derived from the
    /// parent's context as it is at this call.
    pub(crate) fn create(
        &self,
        parent_id: Option<AgentId>,
        spawn_mode: SpawnMode,
        origin: AgentOrigin,
        initial: ContextItem,
    ) -> Result<Arc<AgentRecord>> {
        let parent_context = match parent_id {
            Some(parent_id) => {
                let parent = self
                    .find(&parent_id)
                    .filter(|p| !p.state().is_terminal() && !p.is_closed())
                    .ok_or(AgentError::InvalidParent(parent_id))?;
                Some(parent.context())
            }
            None => None,
        };
        let context = propagate(spawn_mode, parent_context.as_ref(), initial)?;

        let (state, _) = watch::channel(AgentState::Active);
        let (activity, _) = watch::channel(Activity::Idle {
            since: Instant::now(),
        });
        let record = Arc::new(AgentRecord {
            id: AgentId::new(),
            parent_id,
            spawn_mode,
            origin,
            created_seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            state,
            activity,
            closed: AtomicBool::new(false),
            sent_to_owner: AtomicBool::new(false),
            released: AtomicBool::new(false),
            context: Mutex::new(context),
            mailbox: Mailbox::default(),
            inbox: Inbox::new(),
        });
        self.write().insert(record.id, Arc::clone(&record));
        Ok(record)
    }

    pub(crate) fn find(&self, id: &AgentId) -> Option<Arc<AgentRecord>> {
        self.read().get(id).cloned()
    }

    pub(crate) fn get(&self, id: &AgentId) -> Result<Arc<AgentRecord>> {
        self.find(id).ok_or(AgentError::UnknownTask(*id))
    }

    /// Apply a transition request. The agent itself may move to any state;
    /// anyone else may only request cancellation. Requests against a
    /// terminal agent are ignored and report the existing state, as are
    /// requests for `Active`.
    pub(crate) fn transition(
        &self,
        caller: AgentId,
        id: AgentId,
        requested: AgentState,
    ) -> Result<(AgentState, bool)> {
        let record = self.get(&id)?;
        if requested == AgentState::Active {
            return Ok((record.state(), false));
        }
        if caller != id && requested != AgentState::Canceled {
            return Err(AgentError::TransitionDenied {
                caller,
                agent_id: id,
                requested,
            });
        }
        let changed = record.set_state(requested);
        Ok((record.state(), changed))
    }

    /// Cancel (if still active) and mark closed. `None` for unknown ids.
    pub(crate) fn close(&self, id: &AgentId) -> Option<CloseOutcome> {
        let record = self.find(id)?;
        // Closed before canceled so a waiter woken by the cancel sees it.
        let newly_closed = !record.closed.swap(true, Ordering::AcqRel);
        let canceled = record.set_state(AgentState::Canceled);
        Some(CloseOutcome {
            state: record.state(),
            newly_closed,
            canceled,
        })
    }

    pub(crate) fn children_of(&self, id: &AgentId) -> Vec<Arc<AgentRecord>> {
        let mut children: Vec<Arc<AgentRecord>> = self
            .read()
            .values()
            .filter(|r| r.parent_id.as_ref() == Some(id))
            .cloned()
            .collect();
        children.sort_by_key(|r| r.created_seq);
        children
    }

    /// Non-blocking view of every agent, in creation order.
    pub(crate) fn list(&self) -> Vec<AgentSnapshot> {
        let mut records: Vec<Arc<AgentRecord>> = self.read().values().cloned().collect();
        records.sort_by_key(|r| r.created_seq);
        records.iter().map(|r| r.snapshot()).collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<AgentId, Arc<AgentRecord>>> {
        self.agents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<AgentId, Arc<AgentRecord>>> {
        self.agents.write().unwrap_or_else(PoisonError::into_inner)
    }
}
