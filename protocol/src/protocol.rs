//! Agent tree data model, watchdog status, and runtime events.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::AgentId;
use crate::ParseAgentIdError;

/// How a new agent obtains its starting context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnMode {
    /// Empty context plus the initial message.
    #[default]
    Fresh,
    /// Snapshot of the spawning agent's context plus the initial message.
    Forked,
    /// Not an agent: attaches a watchdog handle to an owner.
    Watchdog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Active,
    Completed,
    Failed,
    Canceled,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AgentState::Active)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Active => "active",
            AgentState::Completed => "completed",
            AgentState::Failed => "failed",
            AgentState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Why an agent exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AgentOrigin {
    Root,
    Spawned,
    /// Ephemeral task forked from the owner each time a watchdog fires.
    CheckIn { watchdog_id: AgentId },
}

impl AgentOrigin {
    pub fn is_check_in(&self) -> bool {
        matches!(self, AgentOrigin::CheckIn { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ItemSource {
    /// Initial or externally supplied message.
    Message,
    /// Message delivered from another agent.
    Agent { id: AgentId },
    /// Fact recorded on the owner by one of its check-ins.
    Note { from: AgentId },
}

/// One entry in an agent's accumulated conversation/state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
    pub source: ItemSource,
    pub content: String,
}

impl ContextItem {
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            source: ItemSource::Message,
            content: content.into(),
        }
    }

    pub fn from_agent(id: AgentId, content: impl Into<String>) -> Self {
        Self {
            source: ItemSource::Agent { id },
            content: content.into(),
        }
    }

    pub fn note(from: AgentId, content: impl Into<String>) -> Self {
        Self {
            source: ItemSource::Note { from },
            content: content.into(),
        }
    }
}

/// Recipient of a `send`. `Parent` is what an omitted target, `"parent"`,
/// and `"root"` all resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTarget {
    #[default]
    Parent,
    Agent(AgentId),
}

impl FromStr for MessageTarget {
    type Err = ParseAgentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "parent" | "root" => Ok(MessageTarget::Parent),
            other => other.parse().map(MessageTarget::Agent),
        }
    }
}

impl From<AgentId> for MessageTarget {
    fn from(id: AgentId) -> Self {
        MessageTarget::Agent(id)
    }
}

/// A message queued on an agent's primary channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Runtime-wide send sequence number; increases in send order.
    pub seq: u64,
    pub from: AgentId,
    pub to: AgentId,
    pub message: String,
    pub interrupt: bool,
}

/// A message in an agent's secondary inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub from: AgentId,
    pub timestamp: String,
    pub content: String,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<AgentId>,
    pub spawn_mode: SpawnMode,
    pub origin: AgentOrigin,
    pub state: AgentState,
    pub closed: bool,
    pub pending_messages: usize,
    pub context_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogPhase {
    /// Waiting for the owner's idle clock to reach the interval.
    Armed,
    /// A check-in is in flight.
    Firing,
    Closed,
    /// The owner reached a terminal state; no further check-ins can fork.
    OwnerGone,
}

/// How a finished check-in reached its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// The check-in called `send` on its owner.
    Primary,
    /// The runtime posted a status message to the owner's inbox.
    Fallback,
    /// Nothing reached the owner.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInRecord {
    pub agent_id: AgentId,
    pub state: AgentState,
    pub delivery: Delivery,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Point-in-time view of a watchdog handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogStatus {
    pub watchdog_id: AgentId,
    pub owner_id: AgentId,
    pub interval_s: u64,
    pub phase: WatchdogPhase,
    /// Number of check-ins spawned so far.
    pub check_ins: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_in: Option<CheckInRecord>,
}

/// What a `close` request found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloseResult {
    Agent {
        id: AgentId,
        state: AgentState,
        /// False when the agent had already been closed.
        newly_closed: bool,
    },
    Watchdog {
        newly_closed: bool,
        status: WatchdogStatus,
    },
    /// Neither an agent nor a watchdog handle. Nothing changed.
    Unknown { id: AgentId },
}

impl CloseResult {
    /// Whether `id` named an agent or watchdog, closed now or earlier.
    pub fn is_known(&self) -> bool {
        !matches!(self, CloseResult::Unknown { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamTaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// One entry of the shared task list agents claim work from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamTask {
    pub id: String,
    pub title: String,
    pub status: TeamTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<AgentId>,
    /// Ids of tasks that must be completed before this one can be accepted.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub msg: EventMsg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMsg {
    AgentSpawned(AgentSpawnedEvent),
    AgentStateChanged(AgentStateChangedEvent),
    AgentClosed(AgentClosedEvent),
    MessageQueued(MessageQueuedEvent),
    WatchdogStarted(WatchdogStartedEvent),
    CheckInStarted(CheckInStartedEvent),
    CheckInFinished(CheckInFinishedEvent),
    FallbackDelivered(FallbackDeliveredEvent),
    WatchdogStopped(WatchdogStoppedEvent),
    TeamTaskUpdated(TeamTaskUpdatedEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpawnedEvent {
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<AgentId>,
    pub spawn_mode: SpawnMode,
    pub origin: AgentOrigin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStateChangedEvent {
    pub agent_id: AgentId,
    pub state: AgentState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentClosedEvent {
    pub agent_id: AgentId,
    pub state: AgentState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageQueuedEvent {
    pub seq: u64,
    pub from: AgentId,
    pub to: AgentId,
    pub interrupt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogStartedEvent {
    pub watchdog_id: AgentId,
    pub owner_id: AgentId,
    pub interval_s: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInStartedEvent {
    pub watchdog_id: AgentId,
    pub owner_id: AgentId,
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInFinishedEvent {
    pub watchdog_id: AgentId,
    pub record: CheckInRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackDeliveredEvent {
    pub check_in_id: AgentId,
    pub owner_id: AgentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogStoppedEvent {
    pub watchdog_id: AgentId,
    pub phase: WatchdogPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamTaskUpdatedEvent {
    pub task: TeamTask,
}
