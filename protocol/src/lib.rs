//! Wire types shared by the agent runtime, its tool surface, and the CLI.

mod agent_id;
pub mod protocol;

pub use agent_id::AgentId;
pub use agent_id::ParseAgentIdError;
