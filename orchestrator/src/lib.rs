//! Agent orchestration runtime.
//!
//! A coordinating agent creates a tree of child agents (fresh or forked from
//! its own context), exchanges messages with them, and reconciles their
//! completion through `wait`. Watchdog handles attach an idle clock to an
//! owner agent and fork short-lived check-in agents whenever the owner has
//! been idle for longer than the configured interval.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod idle_clock;
pub mod inbox;
mod registry;
mod router;
pub mod runtime;
pub mod spawner;
pub mod task_list;
pub mod tools;
pub mod wait;
pub mod watchdog;

pub use codex_agent_protocol::AgentId;
pub use config::RuntimeConfig;
pub use context::Context;
pub use error::AgentError;
pub use runtime::AgentRuntime;
pub use spawner::SpawnOutcome;
pub use spawner::SpawnRequest;
pub use wait::WaitResult;
pub use watchdog::CheckInRunner;
pub use watchdog::CheckInSession;
pub use watchdog::SilentCheckIn;
