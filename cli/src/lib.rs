//! `codex-agents`: drive an agent runtime from JSON-lines commands.
//!
//! Each input line is one command object tagged by `op`; each command
//! produces exactly one response line, `{"ok": true, "result": ...}` or
//! `{"ok": false, "error": "..."}`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use codex_agent_orchestrator::AgentId;
use codex_agent_orchestrator::AgentRuntime;
use codex_agent_orchestrator::RuntimeConfig;
use codex_agent_orchestrator::tools::handle_tool_call;
use codex_agent_protocol::protocol::AgentState;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

#[derive(Parser, Debug, Default)]
#[command(name = "codex-agents", version, about)]
pub struct Cli {
    /// Runtime config file (TOML; top level or an `[agents]` table)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Default watchdog interval in seconds (overrides config)
    #[arg(long)]
    pub watchdog_interval: Option<u64>,

    /// Default wait timeout in milliseconds (overrides config)
    #[arg(long)]
    pub wait_timeout_ms: Option<u64>,

    /// Disable fallback delivery of silent check-ins
    #[arg(long)]
    pub no_fallback: bool,

    /// Also print runtime events as JSON lines
    #[arg(long)]
    pub events: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    pub dry_run: bool,

    /// Extra logging (routing, wait results, watchdog firings)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Load the config file, if any, and apply flag overrides on top.
    pub fn resolve_config(&self) -> anyhow::Result<RuntimeConfig> {
        let mut config = match &self.config {
            Some(path) => RuntimeConfig::load(path)?,
            None => RuntimeConfig::default(),
        };
        if let Some(interval_s) = self.watchdog_interval {
            config.default_watchdog_interval_s = interval_s;
        }
        if let Some(timeout_ms) = self.wait_timeout_ms {
            config.default_wait_timeout_ms = timeout_ms;
        }
        if self.no_fallback {
            config.fallback_delivery = false;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateRoot {
        message: String,
    },
    /// Run a tool call as `caller`. `arguments` may be an object or a JSON
    /// string holding one.
    Tool {
        caller: AgentId,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    BeginTurn {
        id: AgentId,
    },
    EndTurn {
        id: AgentId,
    },
    Transition {
        #[serde(default)]
        caller: Option<AgentId>,
        id: AgentId,
        state: AgentState,
    },
    Drain {
        id: AgentId,
    },
    Inbox {
        id: AgentId,
        #[serde(default)]
        consume: bool,
    },
    Context {
        id: AgentId,
    },
    State {
        id: AgentId,
    },
    List,
    Sleep {
        ms: u64,
    },
    Shutdown,
}

pub struct Session {
    runtime: AgentRuntime,
}

impl Session {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    /// Parse and run one input line. Returns `None` for blank lines.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let response = match serde_json::from_str::<Command>(line) {
            Ok(command) => self.execute(command).await,
            Err(e) => Err(anyhow::anyhow!("invalid command: {e}")),
        };
        Some(match response {
            Ok(result) => json!({ "ok": true, "result": result }),
            Err(e) => json!({ "ok": false, "error": format!("{e:#}") }),
        })
    }

    pub async fn execute(&self, command: Command) -> anyhow::Result<Value> {
        let runtime = &self.runtime;
        let result = match command {
            Command::CreateRoot { message } => json!({ "id": runtime.create_root(message)? }),
            Command::Tool {
                caller,
                name,
                arguments,
            } => {
                let arguments = match arguments {
                    Value::String(raw) => raw,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                let text = handle_tool_call(runtime, caller, &name, &arguments).await?;
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            Command::BeginTurn { id } => {
                runtime.begin_turn(id)?;
                Value::Null
            }
            Command::EndTurn { id } => {
                runtime.end_turn(id)?;
                Value::Null
            }
            Command::Transition { caller, id, state } => {
                let state = runtime.transition(caller.unwrap_or(id), id, state)?;
                json!({ "state": state })
            }
            Command::Drain { id } => serde_json::to_value(runtime.drain_messages(id)?)?,
            Command::Inbox { id, consume } => {
                let messages = if consume {
                    runtime.consume_inbox(id)?
                } else {
                    runtime.read_inbox(id)?
                };
                serde_json::to_value(messages)?
            }
            Command::Context { id } => serde_json::to_value(runtime.context(id)?)?,
            Command::State { id } => json!({ "state": runtime.get_state(id)? }),
            Command::List => json!({
                "agents": runtime.list_agents(),
                "watchdogs": runtime.list_watchdogs(),
            }),
            Command::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Value::Null
            }
            Command::Shutdown => {
                runtime.shutdown();
                Value::Null
            }
        };
        Ok(result)
    }
}
