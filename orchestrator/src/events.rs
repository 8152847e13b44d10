//! Runtime event fan-out.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use codex_agent_protocol::AgentId;
use codex_agent_protocol::protocol::AgentClosedEvent;
use codex_agent_protocol::protocol::AgentOrigin;
use codex_agent_protocol::protocol::AgentSpawnedEvent;
use codex_agent_protocol::protocol::AgentState;
use codex_agent_protocol::protocol::AgentStateChangedEvent;
use codex_agent_protocol::protocol::CheckInFinishedEvent;
use codex_agent_protocol::protocol::CheckInRecord;
use codex_agent_protocol::protocol::CheckInStartedEvent;
use codex_agent_protocol::protocol::Event;
use codex_agent_protocol::protocol::EventMsg;
use codex_agent_protocol::protocol::FallbackDeliveredEvent;
use codex_agent_protocol::protocol::MessageQueuedEvent;
use codex_agent_protocol::protocol::SpawnMode;
use codex_agent_protocol::protocol::TeamTask;
use codex_agent_protocol::protocol::TeamTaskUpdatedEvent;
use codex_agent_protocol::protocol::WatchdogPhase;
use codex_agent_protocol::protocol::WatchdogStartedEvent;
use codex_agent_protocol::protocol::WatchdogStoppedEvent;
use tokio::sync::broadcast;

/// Helper to emit runtime events. Emitting with no subscribers is fine;
/// slow subscribers lag and lose the oldest events.
pub struct EventEmitter {
    tx: broadcast::Sender<Event>,
    next_seq: AtomicU64,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    fn emit(&self, msg: EventMsg) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(Event { seq, msg });
    }

    pub fn agent_spawned(
        &self,
        agent_id: AgentId,
        parent_id: Option<AgentId>,
        spawn_mode: SpawnMode,
        origin: AgentOrigin,
    ) {
        self.emit(EventMsg::AgentSpawned(AgentSpawnedEvent {
            agent_id,
            parent_id,
            spawn_mode,
            origin,
        }));
    }

    pub fn agent_state_changed(&self, agent_id: AgentId, state: AgentState) {
        self.emit(EventMsg::AgentStateChanged(AgentStateChangedEvent {
            agent_id,
            state,
        }));
    }

    pub fn agent_closed(&self, agent_id: AgentId, state: AgentState) {
        self.emit(EventMsg::AgentClosed(AgentClosedEvent { agent_id, state }));
    }

    pub fn message_queued(&self, seq: u64, from: AgentId, to: AgentId, interrupt: bool) {
        self.emit(EventMsg::MessageQueued(MessageQueuedEvent {
            seq,
            from,
            to,
            interrupt,
        }));
    }

    pub fn watchdog_started(&self, watchdog_id: AgentId, owner_id: AgentId, interval_s: u64) {
        self.emit(EventMsg::WatchdogStarted(WatchdogStartedEvent {
            watchdog_id,
            owner_id,
            interval_s,
        }));
    }

    pub fn check_in_started(&self, watchdog_id: AgentId, owner_id: AgentId, agent_id: AgentId) {
        self.emit(EventMsg::CheckInStarted(CheckInStartedEvent {
            watchdog_id,
            owner_id,
            agent_id,
        }));
    }

    pub fn check_in_finished(&self, watchdog_id: AgentId, record: CheckInRecord) {
        self.emit(EventMsg::CheckInFinished(CheckInFinishedEvent {
            watchdog_id,
            record,
        }));
    }

    pub fn fallback_delivered(&self, check_in_id: AgentId, owner_id: AgentId) {
        self.emit(EventMsg::FallbackDelivered(FallbackDeliveredEvent {
            check_in_id,
            owner_id,
        }));
    }

    pub fn watchdog_stopped(&self, watchdog_id: AgentId, phase: WatchdogPhase) {
        self.emit(EventMsg::WatchdogStopped(WatchdogStoppedEvent {
            watchdog_id,
            phase,
        }));
    }

    pub fn team_task_updated(&self, task: TeamTask) {
        self.emit(EventMsg::TeamTaskUpdated(TeamTaskUpdatedEvent { task }));
    }
}
