//! Watchdog handles and the idle-triggered check-in scheduler.
//!
//! Each watchdog handle runs one scheduler task. The task owns the handle's
//! [`IdleClock`], follows the owner's activity and state channels, and when
//! the owner has been idle for `interval_s` it forks a check-in agent from
//! the owner's current context and hands it to the configured
//! [`CheckInRunner`]. Check-ins of one handle run strictly one after another.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codex_agent_protocol::AgentId;
use codex_agent_protocol::protocol::AgentOrigin;
use codex_agent_protocol::protocol::AgentState;
use codex_agent_protocol::protocol::CheckInRecord;
use codex_agent_protocol::protocol::ContextItem;
use codex_agent_protocol::protocol::Delivery;
use codex_agent_protocol::protocol::MessageTarget;
use codex_agent_protocol::protocol::SpawnMode;
use codex_agent_protocol::protocol::WatchdogPhase;
use codex_agent_protocol::protocol::WatchdogStatus;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::AgentError;
use crate::error::Result;
use crate::idle_clock::IdleClock;
use crate::registry::AgentRecord;
use crate::runtime::AgentRuntime;
use crate::runtime::WeakAgentRuntime;

/// Does the bounded work of one check-in.
///
/// Implementations report to the owner with [`CheckInSession::send_to_owner`]
/// and persist anything the next check-in must know with
/// [`CheckInSession::record_on_owner`]; the check-in agent itself is
/// discarded afterwards. The returned summary is kept on the watchdog status
/// and used as the fallback message when nothing was sent.
#[async_trait]
pub trait CheckInRunner: Send + Sync {
    async fn run(&self, session: CheckInSession) -> anyhow::Result<Option<String>>;
}

/// Runner that does nothing and leaves reporting to fallback delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCheckIn;

#[async_trait]
impl CheckInRunner for SilentCheckIn {
    async fn run(&self, _session: CheckInSession) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// What a check-in runner gets to work with.
pub struct CheckInSession {
    runtime: AgentRuntime,
    agent_id: AgentId,
    owner_id: AgentId,
    watchdog_id: AgentId,
    prompt: String,
    context: Context,
}

impl CheckInSession {
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn owner_id(&self) -> AgentId {
        self.owner_id
    }

    pub fn watchdog_id(&self) -> AgentId {
        self.watchdog_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// The owner's context as of check-in start, plus the prompt.
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    /// Primary delivery: message the owner.
    pub fn send_to_owner(&self, message: impl Into<String>) -> Result<()> {
        self.runtime
            .send(self.agent_id, MessageTarget::Parent, message, false)
    }

    /// Append a fact to the owner's own context so it outlives this check-in.
    pub fn record_on_owner(&self, note: impl Into<String>) -> Result<()> {
        self.runtime
            .append_context(self.owner_id, ContextItem::note(self.agent_id, note))
    }
}

/// Registry entry for a live or closed watchdog.
pub(crate) struct WatchdogHandle {
    pub(crate) owner_id: AgentId,
    cancel: CancellationToken,
    status: Arc<watch::Sender<WatchdogStatus>>,
}

impl WatchdogHandle {
    pub(crate) fn status(&self) -> WatchdogStatus {
        self.status.borrow().clone()
    }

    /// Stop future check-ins. Returns false if the handle was already closed.
    pub(crate) fn close(&self) -> bool {
        let was_open = !self.cancel.is_cancelled();
        self.cancel.cancel();
        self.status.send_modify(|status| status.phase = WatchdogPhase::Closed);
        was_open
    }
}

/// Holds the runtime weakly: dropping the last [`AgentRuntime`] cancels the
/// scheduler instead of being kept alive by it.
pub(crate) struct WatchdogScheduler {
    runtime: WeakAgentRuntime,
    watchdog_id: AgentId,
    owner: Arc<AgentRecord>,
    interval: Duration,
    prompt: String,
    cancel: CancellationToken,
    status: Arc<watch::Sender<WatchdogStatus>>,
}

impl WatchdogScheduler {
    /// Build the handle/scheduler pair for a new watchdog on `owner`.
    pub(crate) fn new(
        runtime: WeakAgentRuntime,
        owner: Arc<AgentRecord>,
        interval_s: u64,
        prompt: String,
        cancel: CancellationToken,
    ) -> (WatchdogHandle, WatchdogScheduler) {
        let watchdog_id = AgentId::new();
        let (status, _) = watch::channel(WatchdogStatus {
            watchdog_id,
            owner_id: owner.id,
            interval_s,
            phase: WatchdogPhase::Armed,
            check_ins: 0,
            last_check_in: None,
        });
        let status = Arc::new(status);
        let handle = WatchdogHandle {
            owner_id: owner.id,
            cancel: cancel.clone(),
            status: Arc::clone(&status),
        };
        let scheduler = WatchdogScheduler {
            runtime,
            watchdog_id,
            owner,
            interval: Duration::from_secs(interval_s),
            prompt,
            cancel,
            status,
        };
        (handle, scheduler)
    }

    pub(crate) fn watchdog_id(&self) -> AgentId {
        self.watchdog_id
    }

    pub(crate) async fn run(self) {
        let mut activity = self.owner.subscribe_activity();
        let mut owner_state = self.owner.subscribe_state();
        let mut clock = IdleClock::new(*activity.borrow_and_update(), Instant::now());
        let mut stopped = WatchdogPhase::OwnerGone;

        loop {
            if self.cancel.is_cancelled() {
                stopped = WatchdogPhase::Closed;
                break;
            }
            if owner_state.borrow_and_update().is_terminal() {
                break;
            }
            let deadline = clock.deadline(self.interval);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    stopped = WatchdogPhase::Closed;
                    break;
                }
                changed = owner_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = activity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    clock.observe(*activity.borrow_and_update());
                }
                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    if !clock.is_due(now, self.interval) {
                        continue;
                    }
                    clock.rearm(now);
                    if let Err(err) = self.fire().await {
                        tracing::warn!(
                            watchdog_id = %self.watchdog_id,
                            owner_id = %self.owner.id,
                            error = %err,
                            "watchdog could not fork a check-in; going dormant"
                        );
                        break;
                    }
                    // Activity seen while the check-in ran carries its own
                    // idle-since timestamp, so catching up here is exact.
                    clock.observe(*activity.borrow_and_update());
                }
            }
        }

        self.status.send_modify(|status| {
            if status.phase != WatchdogPhase::Closed {
                status.phase = stopped;
            }
        });
        let phase = self.status.borrow().phase;
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.events().watchdog_stopped(self.watchdog_id, phase);
        }
        tracing::info!(
            watchdog_id = %self.watchdog_id,
            owner_id = %self.owner.id,
            ?phase,
            "watchdog stopped"
        );
    }

    /// Fork one check-in from the owner, run it to a terminal state, settle
    /// its delivery, and release its forked context.
    async fn fire(&self) -> Result<()> {
        let Some(runtime) = self.runtime.upgrade() else {
            return Err(AgentError::InvalidRequest(
                "agent runtime was dropped".to_string(),
            ));
        };
        let record = runtime
            .registry()
            .create(
                Some(self.owner.id),
                SpawnMode::Forked,
                AgentOrigin::CheckIn {
                    watchdog_id: self.watchdog_id,
                },
                ContextItem::message(self.prompt.clone()),
            )
            .map_err(|_| AgentError::InvalidOwner(self.owner.id))?;

        self.status.send_modify(|status| {
            if status.phase == WatchdogPhase::Armed {
                status.phase = WatchdogPhase::Firing;
            }
            status.check_ins += 1;
        });
        runtime
            .events()
            .agent_spawned(record.id, record.parent_id, record.spawn_mode, record.origin);
        runtime
            .events()
            .check_in_started(self.watchdog_id, self.owner.id, record.id);
        tracing::info!(
            watchdog_id = %self.watchdog_id,
            owner_id = %self.owner.id,
            check_in_id = %record.id,
            "watchdog fired; starting check-in"
        );

        let session = CheckInSession {
            runtime: runtime.clone(),
            agent_id: record.id,
            owner_id: self.owner.id,
            watchdog_id: self.watchdog_id,
            prompt: self.prompt.clone(),
            context: record.context(),
        };
        let runner = runtime.check_in_runner();
        let mut task = tokio::spawn(async move { runner.run(session).await });
        let budget = runtime.config().check_in_timeout();
        let (state, summary) = match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(Ok(summary))) => (AgentState::Completed, summary),
            Ok(Ok(Err(err))) => (AgentState::Failed, Some(format!("check-in failed: {err:#}"))),
            Ok(Err(err)) => (AgentState::Failed, Some(format!("check-in aborted: {err}"))),
            Err(_) => {
                task.abort();
                (
                    AgentState::Failed,
                    Some(format!("check-in exceeded {}s", budget.as_secs())),
                )
            }
        };

        if record.set_state(state) {
            runtime.events().agent_state_changed(record.id, state);
        }
        let state = record.state();
        let delivery = self.settle_delivery(&runtime, &record, state, summary.as_deref());
        // Only the id and final state stay registered for `wait`.
        record.release();
        let finished = CheckInRecord {
            agent_id: record.id,
            state,
            delivery,
            summary,
        };
        self.status.send_modify(|status| {
            if status.phase == WatchdogPhase::Firing {
                status.phase = WatchdogPhase::Armed;
            }
            status.last_check_in = Some(finished.clone());
        });
        runtime.events().check_in_finished(self.watchdog_id, finished);
        Ok(())
    }

    /// Decide how the finished check-in reached its owner, posting the
    /// best-effort fallback message when it never sent one. Never fails.
    fn settle_delivery(
        &self,
        runtime: &AgentRuntime,
        check_in: &AgentRecord,
        state: AgentState,
        summary: Option<&str>,
    ) -> Delivery {
        if check_in.sent_to_owner() {
            return Delivery::Primary;
        }
        if !runtime.config().fallback_delivery {
            return Delivery::Dropped;
        }
        let Some(owner) = runtime
            .registry()
            .find(&self.owner.id)
            .filter(|owner| owner.accepts_messages())
        else {
            tracing::warn!(
                check_in_id = %check_in.id,
                owner_id = %self.owner.id,
                "owner no longer accepts messages; dropping check-in fallback"
            );
            return Delivery::Dropped;
        };

        let mut content = format!(
            "Check-in {} finished ({state}) without reporting back.",
            check_in.id
        );
        if let Some(summary) = summary {
            content.push('\n');
            content.push_str(summary);
        }
        owner.inbox.push(check_in.id, content);
        runtime
            .events()
            .fallback_delivered(check_in.id, self.owner.id);
        tracing::debug!(
            check_in_id = %check_in.id,
            owner_id = %self.owner.id,
            "delivered check-in fallback to owner inbox"
        );
        Delivery::Fallback
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
