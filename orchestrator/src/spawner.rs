//! Spawn requests and their outcomes.

use codex_agent_protocol::AgentId;
use codex_agent_protocol::protocol::SpawnMode;
use serde::Deserialize;
use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::error::AgentError;
use crate::error::Result;

/// A request from a running agent to create a child agent or a watchdog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequest {
    /// Initial message for an agent, or the check-in prompt for a watchdog.
    pub message: String,
    #[serde(default)]
    pub mode: SpawnMode,
    /// Watchdog only. Falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_s: Option<u64>,
    /// Watchdog only. Defaults to the spawning agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<AgentId>,
}

impl SpawnRequest {
    pub fn fresh(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            mode: SpawnMode::Fresh,
            interval_s: None,
            owner: None,
        }
    }

    pub fn forked(message: impl Into<String>) -> Self {
        Self {
            mode: SpawnMode::Forked,
            ..Self::fresh(message)
        }
    }

    pub fn watchdog(message: impl Into<String>) -> Self {
        Self {
            mode: SpawnMode::Watchdog,
            ..Self::fresh(message)
        }
    }

    pub fn with_interval(mut self, interval_s: u64) -> Self {
        self.interval_s = Some(interval_s);
        self
    }

    pub fn with_owner(mut self, owner: AgentId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Resolve the watchdog interval, rejecting watchdog-only fields on
    /// agent spawns.
    pub(crate) fn validated_interval(&self, config: &RuntimeConfig) -> Result<Option<u64>> {
        if self.mode != SpawnMode::Watchdog {
            if self.interval_s.is_some() || self.owner.is_some() {
                return Err(AgentError::InvalidRequest(
                    "interval_s and owner only apply to watchdog spawns".to_string(),
                ));
            }
            return Ok(None);
        }
        let interval_s = self
            .interval_s
            .unwrap_or(config.default_watchdog_interval_s);
        if interval_s < config.min_watchdog_interval_s {
            return Err(AgentError::InvalidRequest(format!(
                "interval_s must be at least {}",
                config.min_watchdog_interval_s
            )));
        }
        Ok(Some(interval_s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SpawnOutcome {
    Agent(AgentId),
    Watchdog(AgentId),
}

impl SpawnOutcome {
    pub fn id(&self) -> AgentId {
        match self {
            SpawnOutcome::Agent(id) | SpawnOutcome::Watchdog(id) => *id,
        }
    }

    pub fn is_watchdog(&self) -> bool {
        matches!(self, SpawnOutcome::Watchdog(_))
    }
}
