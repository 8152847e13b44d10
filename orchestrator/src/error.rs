use codex_agent_protocol::AgentId;
use codex_agent_protocol::protocol::AgentState;

/// Errors surfaced synchronously by runtime operations. All are recoverable
/// by the caller; none leave partial state behind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("parent agent {0} is unknown or already terminal")]
    InvalidParent(AgentId),
    #[error("watchdog owner {0} is unknown or not active")]
    InvalidOwner(AgentId),
    #[error("unknown agent {0}")]
    UnknownTask(AgentId),
    #[error("cannot deliver to {0}: target is unknown, closed, or canceled")]
    UnknownTarget(String),
    #[error("agent {caller} may not move agent {agent_id} to {requested}")]
    TransitionDenied {
        caller: AgentId,
        agent_id: AgentId,
        requested: AgentState,
    },
    #[error("unknown team task `{0}`")]
    UnknownTeamTask(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
