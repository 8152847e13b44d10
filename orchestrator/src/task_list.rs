//! Shared task list agents claim work from.
//!
//! Tasks start `Pending`. An agent either gets one assigned, which moves it
//! straight to `InProgress`, or accepts the next pending, unassigned task
//! whose dependencies are all completed. The list lives in memory for the
//! lifetime of the runtime.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use codex_agent_protocol::AgentId;
use codex_agent_protocol::protocol::TeamTask;
use codex_agent_protocol::protocol::TeamTaskStatus;

use crate::error::AgentError;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct TaskList {
    tasks: Mutex<Vec<TeamTask>>,
    next_id: AtomicU64,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Every id in `depends_on` must already be on the list.
    pub fn create_task(
        &self,
        title: impl Into<String>,
        depends_on: Vec<String>,
        assigned_to: Option<AgentId>,
    ) -> Result<TeamTask> {
        let mut tasks = self.lock();
        if let Some(missing) = depends_on
            .iter()
            .find(|dep| !tasks.iter().any(|task| &task.id == *dep))
        {
            return Err(AgentError::UnknownTeamTask(missing.clone()));
        }
        let id = format!("task-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let status = if assigned_to.is_some() {
            TeamTaskStatus::InProgress
        } else {
            TeamTaskStatus::Pending
        };
        let task = TeamTask {
            id,
            title: title.into(),
            status,
            assigned_to,
            depends_on,
        };
        tasks.push(task.clone());
        Ok(task)
    }

    /// Claim the first pending, unassigned task whose dependencies are all
    /// completed. `None` when nothing is ready.
    pub fn accept_next_task(&self, agent: AgentId) -> Option<TeamTask> {
        let mut tasks = self.lock();
        let ready = tasks.iter().position(|task| {
            task.status == TeamTaskStatus::Pending
                && task.assigned_to.is_none()
                && task.depends_on.iter().all(|dep| {
                    tasks
                        .iter()
                        .any(|other| &other.id == dep && other.status == TeamTaskStatus::Completed)
                })
        })?;
        let task = &mut tasks[ready];
        task.status = TeamTaskStatus::InProgress;
        task.assigned_to = Some(agent);
        Some(task.clone())
    }

    /// Hand `id` to `agent`. A pending task moves to `InProgress`; completed
    /// tasks cannot be reassigned.
    pub fn assign_task(&self, id: &str, agent: AgentId) -> Result<TeamTask> {
        let mut tasks = self.lock();
        let task = find_mut(&mut tasks, id)?;
        if task.status == TeamTaskStatus::Completed {
            return Err(AgentError::InvalidRequest(format!(
                "task {id} is already completed"
            )));
        }
        task.assigned_to = Some(agent);
        task.status = TeamTaskStatus::InProgress;
        Ok(task.clone())
    }

    /// Mark `id` completed on behalf of `agent`. Only the assignee may
    /// complete an assigned task. Completing twice is a no-op.
    pub fn complete_task(&self, id: &str, agent: AgentId) -> Result<TeamTask> {
        let mut tasks = self.lock();
        let task = find_mut(&mut tasks, id)?;
        if task.status == TeamTaskStatus::Completed {
            return Ok(task.clone());
        }
        match task.assigned_to {
            Some(assignee) if assignee != agent => {
                return Err(AgentError::InvalidRequest(format!(
                    "task {id} is assigned to {assignee}"
                )));
            }
            _ => {}
        }
        task.status = TeamTaskStatus::Completed;
        if task.assigned_to.is_none() {
            task.assigned_to = Some(agent);
        }
        Ok(task.clone())
    }

    pub fn get_task(&self, id: &str) -> Result<TeamTask> {
        self.lock()
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or_else(|| AgentError::UnknownTeamTask(id.to_string()))
    }

    /// Every task, in creation order.
    pub fn get_tasks(&self) -> Vec<TeamTask> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TeamTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn find_mut<'a>(tasks: &'a mut [TeamTask], id: &str) -> Result<&'a mut TeamTask> {
    tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or_else(|| AgentError::UnknownTeamTask(id.to_string()))
}
