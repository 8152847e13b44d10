//! Tool-call surface exposed to model-driven agents.
//!
//! Each handler takes the calling agent and the raw JSON arguments of a
//! function call and returns JSON text for the model. Every failure becomes
//! a [`ToolCallError::RespondToModel`] so the model can correct itself.

use std::time::Duration;

use async_trait::async_trait;
use codex_agent_protocol::AgentId;
use codex_agent_protocol::protocol::MessageTarget;
use codex_agent_protocol::protocol::SpawnMode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::AgentError;
use crate::runtime::AgentRuntime;
use crate::spawner::SpawnRequest;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolCallError {
    #[error("{0}")]
    RespondToModel(String),
    #[error("unsupported tool `{0}`")]
    UnsupportedTool(String),
}

impl From<AgentError> for ToolCallError {
    fn from(err: AgentError) -> Self {
        ToolCallError::RespondToModel(err.to_string())
    }
}

pub struct ToolInvocation {
    pub runtime: AgentRuntime,
    pub caller: AgentId,
    pub arguments: String,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError>;
}

pub const TOOL_NAMES: [&str; 11] = [
    "spawn_agent",
    "send_message",
    "broadcast_message",
    "wait",
    "close_agent",
    "list_agents",
    "request_shutdown",
    "assign_task",
    "accept_task",
    "complete_task",
    "get_tasks",
];

/// Sent to the parent by `request_shutdown`.
pub const SHUTDOWN_REQUEST_MESSAGE: &str = "Requesting shutdown: work complete.";

pub fn handler_for(name: &str) -> Option<Box<dyn ToolHandler>> {
    let handler: Box<dyn ToolHandler> = match name {
        "spawn_agent" => Box::new(SpawnAgentHandler),
        "send_message" => Box::new(SendMessageHandler),
        "broadcast_message" => Box::new(BroadcastMessageHandler),
        "wait" => Box::new(WaitHandler),
        "close_agent" => Box::new(CloseAgentHandler),
        "list_agents" => Box::new(ListAgentsHandler),
        "request_shutdown" => Box::new(RequestShutdownHandler),
        "assign_task" => Box::new(AssignTaskHandler),
        "accept_task" => Box::new(AcceptTaskHandler),
        "complete_task" => Box::new(CompleteTaskHandler),
        "get_tasks" => Box::new(GetTasksHandler),
        _ => return None,
    };
    Some(handler)
}

/// Dispatch one function call by tool name.
pub async fn handle_tool_call(
    runtime: &AgentRuntime,
    caller: AgentId,
    tool_name: &str,
    arguments: &str,
) -> Result<String, ToolCallError> {
    let handler = handler_for(tool_name)
        .ok_or_else(|| ToolCallError::UnsupportedTool(tool_name.to_string()))?;
    tracing::debug!(caller = %caller, tool = tool_name, "handling tool call");
    handler
        .handle(ToolInvocation {
            runtime: runtime.clone(),
            caller,
            arguments: arguments.to_string(),
        })
        .await
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: &str) -> Result<T, ToolCallError> {
    // Tools without required arguments accept an empty payload.
    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(arguments).map_err(|e| {
        ToolCallError::RespondToModel(format!("Failed to parse {tool} arguments: {e}"))
    })
}

fn parse_id(raw: &str) -> Result<AgentId, ToolCallError> {
    raw.parse()
        .map_err(|e| ToolCallError::RespondToModel(format!("{e}")))
}

fn to_text(value: serde_json::Value) -> String {
    value.to_string()
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, ToolCallError> {
    serde_json::to_string(value)
        .map_err(|e| ToolCallError::RespondToModel(format!("Failed to encode result: {e}")))
}

pub struct SpawnAgentHandler;

#[derive(Debug, Deserialize)]
struct SpawnAgentArgs {
    message: String,
    #[serde(default)]
    spawn_mode: SpawnMode,
    #[serde(default)]
    interval_s: Option<u64>,
    #[serde(default)]
    owner: Option<String>,
}

#[async_trait]
impl ToolHandler for SpawnAgentHandler {
    fn name(&self) -> &'static str {
        "spawn_agent"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        let args: SpawnAgentArgs = parse_args(self.name(), &invocation.arguments)?;
        let owner = args.owner.as_deref().map(parse_id).transpose()?;
        let request = SpawnRequest {
            message: args.message,
            mode: args.spawn_mode,
            interval_s: args.interval_s,
            owner,
        };
        let outcome = invocation.runtime.spawn(invocation.caller, request)?;
        encode(&outcome)
    }
}

pub struct SendMessageHandler;

#[derive(Debug, Deserialize)]
struct SendMessageArgs {
    message: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    interrupt: bool,
}

#[async_trait]
impl ToolHandler for SendMessageHandler {
    fn name(&self) -> &'static str {
        "send_message"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        let args: SendMessageArgs = parse_args(self.name(), &invocation.arguments)?;
        let target = match args.target.as_deref() {
            None => MessageTarget::Parent,
            Some(raw) => raw
                .parse()
                .map_err(|_| AgentError::UnknownTarget(raw.to_string()))?,
        };
        invocation
            .runtime
            .send(invocation.caller, target, args.message, args.interrupt)?;
        Ok(to_text(json!({ "status": "queued" })))
    }
}

pub struct WaitHandler;

#[derive(Debug, Deserialize)]
struct WaitArgs {
    ids: Vec<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[async_trait]
impl ToolHandler for WaitHandler {
    fn name(&self) -> &'static str {
        "wait"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        let args: WaitArgs = parse_args(self.name(), &invocation.arguments)?;
        let ids = args
            .ids
            .iter()
            .map(|raw| parse_id(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let result = invocation
            .runtime
            .wait(&ids, args.timeout_ms.map(Duration::from_millis))
            .await?;
        encode(&result)
    }
}

pub struct CloseAgentHandler;

#[derive(Debug, Deserialize)]
struct CloseAgentArgs {
    id: String,
}

#[async_trait]
impl ToolHandler for CloseAgentHandler {
    fn name(&self) -> &'static str {
        "close_agent"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        let args: CloseAgentArgs = parse_args(self.name(), &invocation.arguments)?;
        let id = parse_id(&args.id)?;
        let result = invocation.runtime.close(id);
        let mut value = serde_json::to_value(&result)
            .map_err(|e| ToolCallError::RespondToModel(format!("Failed to encode result: {e}")))?;
        value["closed"] = json!(result.is_known());
        Ok(to_text(value))
    }
}

pub struct ListAgentsHandler;

#[async_trait]
impl ToolHandler for ListAgentsHandler {
    fn name(&self) -> &'static str {
        "list_agents"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        Ok(to_text(json!({
            "agents": invocation.runtime.list_agents(),
            "watchdogs": invocation.runtime.list_watchdogs(),
        })))
    }
}

pub struct BroadcastMessageHandler;

#[derive(Debug, Deserialize)]
struct BroadcastMessageArgs {
    message: String,
}

#[async_trait]
impl ToolHandler for BroadcastMessageHandler {
    fn name(&self) -> &'static str {
        "broadcast_message"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        let args: BroadcastMessageArgs = parse_args(self.name(), &invocation.arguments)?;
        let delivered = invocation
            .runtime
            .broadcast(invocation.caller, args.message)?;
        Ok(to_text(json!({ "status": "broadcast", "delivered": delivered })))
    }
}

/// Ask the parent to close the caller. The caller keeps running until the
/// parent acts on the request.
pub struct RequestShutdownHandler;

#[async_trait]
impl ToolHandler for RequestShutdownHandler {
    fn name(&self) -> &'static str {
        "request_shutdown"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        invocation.runtime.send(
            invocation.caller,
            MessageTarget::Parent,
            SHUTDOWN_REQUEST_MESSAGE,
            false,
        )?;
        Ok(to_text(json!({ "status": "shutdown_requested" })))
    }
}

/// Create a task, optionally assigning it right away.
pub struct AssignTaskHandler;

#[derive(Debug, Deserialize)]
struct AssignTaskArgs {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    assigned_to: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[async_trait]
impl ToolHandler for AssignTaskHandler {
    fn name(&self) -> &'static str {
        "assign_task"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        let args: AssignTaskArgs = parse_args(self.name(), &invocation.arguments)?;
        let assignee = args.assigned_to.as_deref().map(parse_id).transpose()?;
        let task = match (args.task_id, args.title) {
            (Some(task_id), None) => {
                let assignee = assignee.ok_or_else(|| {
                    ToolCallError::RespondToModel(
                        "assigned_to is required to assign an existing task".to_string(),
                    )
                })?;
                invocation.runtime.assign_task(&task_id, assignee)?
            }
            (None, Some(title)) => invocation.runtime.create_task(
                invocation.caller,
                title,
                args.depends_on,
                assignee,
            )?,
            _ => {
                return Err(ToolCallError::RespondToModel(
                    "pass either title (new task) or task_id (existing task)".to_string(),
                ));
            }
        };
        encode(&task)
    }
}

pub struct AcceptTaskHandler;

#[async_trait]
impl ToolHandler for AcceptTaskHandler {
    fn name(&self) -> &'static str {
        "accept_task"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        match invocation.runtime.accept_task(invocation.caller)? {
            Some(task) => Ok(to_text(json!({ "status": "accepted", "task": task }))),
            None => Ok(to_text(json!({ "status": "no_tasks_available" }))),
        }
    }
}

pub struct CompleteTaskHandler;

#[derive(Debug, Deserialize)]
struct CompleteTaskArgs {
    task_id: String,
}

#[async_trait]
impl ToolHandler for CompleteTaskHandler {
    fn name(&self) -> &'static str {
        "complete_task"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        let args: CompleteTaskArgs = parse_args(self.name(), &invocation.arguments)?;
        let task = invocation
            .runtime
            .complete_task(invocation.caller, &args.task_id)?;
        encode(&task)
    }
}

pub struct GetTasksHandler;

#[derive(Debug, Deserialize)]
struct GetTasksArgs {
    #[serde(default)]
    task_id: Option<String>,
}

#[async_trait]
impl ToolHandler for GetTasksHandler {
    fn name(&self) -> &'static str {
        "get_tasks"
    }

    async fn handle(&self, invocation: ToolInvocation) -> Result<String, ToolCallError> {
        let args: GetTasksArgs = parse_args(self.name(), &invocation.arguments)?;
        match args.task_id {
            Some(task_id) => encode(&invocation.runtime.get_task(&task_id)?),
            None => Ok(to_text(json!({ "tasks": invocation.runtime.get_tasks() }))),
        }
    }
}
