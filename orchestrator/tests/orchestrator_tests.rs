//! Integration tests for the agent runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codex_agent_orchestrator::AgentError;
use codex_agent_orchestrator::AgentId;
use codex_agent_orchestrator::AgentRuntime;
use codex_agent_orchestrator::CheckInRunner;
use codex_agent_orchestrator::CheckInSession;
use codex_agent_orchestrator::RuntimeConfig;
use codex_agent_orchestrator::SpawnOutcome;
use codex_agent_orchestrator::SpawnRequest;
use codex_agent_protocol::protocol::AgentState;
use codex_agent_protocol::protocol::CloseResult;
use codex_agent_protocol::protocol::ContextItem;
use codex_agent_protocol::protocol::Delivery;
use codex_agent_protocol::protocol::EventMsg;
use codex_agent_protocol::protocol::ItemSource;
use codex_agent_protocol::protocol::MessageTarget;
use codex_agent_protocol::protocol::WatchdogPhase;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

fn runtime() -> AgentRuntime {
    AgentRuntime::new(RuntimeConfig::default())
}

fn watchdog(runtime: &AgentRuntime, owner: AgentId, interval_s: u64) -> AgentId {
    let outcome = runtime
        .spawn(
            owner,
            SpawnRequest::watchdog("Check on progress").with_interval(interval_s),
        )
        .unwrap();
    assert!(outcome.is_watchdog());
    outcome.id()
}

fn check_ins(runtime: &AgentRuntime, watchdog_id: AgentId) -> u64 {
    runtime.watchdog_status(&watchdog_id).unwrap().check_ins
}

/// Reports to its owner and leaves a durable note behind.
struct ReportingCheckIn;

#[async_trait]
impl CheckInRunner for ReportingCheckIn {
    async fn run(&self, session: CheckInSession) -> anyhow::Result<Option<String>> {
        session.record_on_owner("last check-in saw no progress")?;
        session.send_to_owner(format!(
            "{} items in view; last: {}",
            session.context().len(),
            session.prompt()
        ))?;
        Ok(Some("reported".to_string()))
    }
}

/// Takes thirty seconds of (paused) time and reports nothing.
struct SlowCheckIn;

#[async_trait]
impl CheckInRunner for SlowCheckIn {
    async fn run(&self, _session: CheckInSession) -> anyhow::Result<Option<String>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Some("took a while".to_string()))
    }
}

struct FailingCheckIn;

#[async_trait]
impl CheckInRunner for FailingCheckIn {
    async fn run(&self, _session: CheckInSession) -> anyhow::Result<Option<String>> {
        anyhow::bail!("model unavailable")
    }
}

#[test]
fn forked_context_is_a_snapshot_of_the_parent() {
    let runtime = runtime();
    let root = runtime.create_root("plan the release").unwrap();
    runtime
        .append_context(root, ContextItem::message("tests are green"))
        .unwrap();

    let child = runtime
        .spawn(root, SpawnRequest::forked("write the changelog"))
        .unwrap()
        .id();
    let at_fork = runtime.context(child).unwrap();
    assert_eq!(at_fork.len(), 3);
    assert_eq!(
        at_fork.items()[..2].to_vec(),
        runtime.context(root).unwrap().items().to_vec()
    );

    runtime
        .append_context(root, ContextItem::message("parent moved on"))
        .unwrap();
    runtime
        .append_context(child, ContextItem::message("child moved on"))
        .unwrap();

    let root_context = runtime.context(root).unwrap();
    let child_context = runtime.context(child).unwrap();
    assert_eq!(root_context.len(), 3);
    assert_eq!(child_context.len(), 4);
    assert_eq!(
        root_context.last(),
        Some(&ContextItem::message("parent moved on"))
    );
    assert_eq!(
        child_context.last(),
        Some(&ContextItem::message("child moved on"))
    );
}

#[test]
fn fresh_context_holds_only_the_initial_message() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let child = runtime
        .spawn(root, SpawnRequest::fresh("triage the flaky test"))
        .unwrap()
        .id();
    assert_eq!(
        runtime.context(child).unwrap().items(),
        &[ContextItem::message("triage the flaky test")]
    );
}

#[test]
fn terminal_states_never_change() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let child = runtime.spawn(root, SpawnRequest::fresh("work")).unwrap().id();

    assert_eq!(
        runtime
            .transition(child, child, AgentState::Completed)
            .unwrap(),
        AgentState::Completed
    );
    for requested in [AgentState::Active, AgentState::Failed, AgentState::Canceled] {
        assert_eq!(
            runtime.transition(child, child, requested).unwrap(),
            AgentState::Completed
        );
    }
    runtime.close(child);
    assert_eq!(runtime.get_state(child).unwrap(), AgentState::Completed);
}

#[test]
fn only_the_agent_may_complete_itself() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let child = runtime.spawn(root, SpawnRequest::fresh("work")).unwrap().id();

    let err = runtime
        .transition(root, child, AgentState::Completed)
        .unwrap_err();
    assert_eq!(
        err,
        AgentError::TransitionDenied {
            caller: root,
            agent_id: child,
            requested: AgentState::Completed,
        }
    );
    assert_eq!(runtime.get_state(child).unwrap(), AgentState::Active);
}

#[test]
fn spawning_from_a_finished_agent_is_rejected() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    runtime
        .transition(root, root, AgentState::Completed)
        .unwrap();
    let err = runtime
        .spawn(root, SpawnRequest::fresh("too late"))
        .unwrap_err();
    assert_eq!(err, AgentError::InvalidParent(root));
    assert_eq!(runtime.list_agents().len(), 1);
}

#[test]
fn spawning_from_an_unknown_agent_is_an_invalid_parent() {
    let runtime = runtime();
    let stranger = AgentId::new();
    let err = runtime
        .spawn(stranger, SpawnRequest::forked("go"))
        .unwrap_err();
    assert_eq!(err, AgentError::InvalidParent(stranger));

    let err = runtime
        .spawn(stranger, SpawnRequest::watchdog("check"))
        .unwrap_err();
    assert_eq!(err, AgentError::InvalidOwner(stranger));
    assert!(runtime.list_agents().is_empty());
    assert!(runtime.list_watchdogs().is_empty());
}

#[test]
fn send_to_a_missing_target_changes_nothing() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let child = runtime.spawn(root, SpawnRequest::fresh("work")).unwrap().id();
    let before = runtime.list_agents();

    let missing = AgentId::new();
    let err = runtime
        .send(child, MessageTarget::Agent(missing), "hello?", false)
        .unwrap_err();
    assert_eq!(err, AgentError::UnknownTarget(missing.to_string()));

    let err = runtime
        .send(root, MessageTarget::Parent, "anyone above me?", true)
        .unwrap_err();
    assert!(matches!(err, AgentError::UnknownTarget(_)));

    assert_eq!(runtime.list_agents(), before);
    assert!(!runtime.take_interrupt(root).unwrap());
}

#[test]
fn unknown_sender_is_an_unknown_task() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let stranger = AgentId::new();
    let err = runtime
        .send(stranger, MessageTarget::Agent(root), "hi", false)
        .unwrap_err();
    assert_eq!(err, AgentError::UnknownTask(stranger));
}

#[test]
fn messages_arrive_in_send_order_and_join_the_context() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let child = runtime.spawn(root, SpawnRequest::fresh("work")).unwrap().id();

    runtime.send(child, MessageTarget::Parent, "first", false).unwrap();
    runtime.send(child, "root".parse().unwrap(), "second", true).unwrap();
    runtime
        .send(child, MessageTarget::Agent(root), "third", false)
        .unwrap();

    assert!(runtime.take_interrupt(root).unwrap());
    assert!(!runtime.take_interrupt(root).unwrap());

    let delivered: Vec<String> = runtime
        .drain_messages(root)
        .unwrap()
        .into_iter()
        .map(|envelope| envelope.message)
        .collect();
    assert_eq!(delivered, vec!["first", "second", "third"]);
    assert!(runtime.drain_messages(root).unwrap().is_empty());

    let context = runtime.context(root).unwrap();
    assert_eq!(context.len(), 4);
    assert_eq!(
        context.last().map(|item| &item.source),
        Some(&ItemSource::Agent { id: child })
    );
}

#[test]
fn closed_and_canceled_agents_do_not_accept_messages() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let child = runtime.spawn(root, SpawnRequest::fresh("work")).unwrap().id();
    runtime.close(child);

    let err = runtime
        .send(root, MessageTarget::Agent(child), "still there?", false)
        .unwrap_err();
    assert_eq!(err, AgentError::UnknownTarget(child.to_string()));
}

#[test]
fn broadcast_reaches_open_children_only() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let first = runtime.spawn(root, SpawnRequest::fresh("a")).unwrap().id();
    let second = runtime.spawn(root, SpawnRequest::fresh("b")).unwrap().id();
    let closed = runtime.spawn(root, SpawnRequest::fresh("c")).unwrap().id();
    runtime.close(closed);

    assert_eq!(runtime.broadcast(root, "stand down").unwrap(), 2);
    assert_eq!(runtime.drain_messages(first).unwrap().len(), 1);
    assert_eq!(runtime.drain_messages(second).unwrap().len(), 1);
    assert!(runtime.drain_messages(closed).unwrap().is_empty());
}

#[test]
fn close_is_idempotent() {
    let runtime = runtime();
    let mut events = runtime.subscribe();
    let root = runtime.create_root("plan").unwrap();
    let child = runtime.spawn(root, SpawnRequest::fresh("work")).unwrap().id();

    assert_eq!(
        runtime.close(child),
        CloseResult::Agent {
            id: child,
            state: AgentState::Canceled,
            newly_closed: true,
        }
    );
    let after_first = runtime.list_agents();
    assert_eq!(
        runtime.close(child),
        CloseResult::Agent {
            id: child,
            state: AgentState::Canceled,
            newly_closed: false,
        }
    );
    assert_eq!(runtime.list_agents(), after_first);
    assert_eq!(runtime.get_state(child).unwrap(), AgentState::Canceled);

    let stranger = AgentId::new();
    assert_eq!(runtime.close(stranger), CloseResult::Unknown { id: stranger });

    let mut closed_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event.msg, EventMsg::AgentClosed(_)) {
            closed_events += 1;
        }
    }
    assert_eq!(closed_events, 1);
}

#[tokio::test(start_paused = true)]
async fn completed_child_is_reported_then_closed_ids_move_aside() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let child = runtime
        .spawn(root, SpawnRequest::forked("start"))
        .unwrap()
        .id();

    let waiter = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.wait(&[child], None).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    runtime
        .transition(child, child, AgentState::Completed)
        .unwrap();

    let result = waiter.await.unwrap().unwrap();
    assert_eq!(result.completed.get(&child), Some(&AgentState::Completed));
    assert!(result.still_active.is_empty());
    assert!(!result.timed_out);

    runtime.close(child);
    let result = runtime.wait(&[child], None).await.unwrap();
    assert!(result.completed.is_empty());
    assert!(result.still_active.is_empty());
    assert!(result.closed.contains(&child));
}

#[tokio::test(start_paused = true)]
async fn wait_times_out_with_everything_still_active() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let child = runtime.spawn(root, SpawnRequest::fresh("work")).unwrap().id();

    let start = Instant::now();
    let result = runtime
        .wait(&[child], Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert!(result.timed_out);
    assert!(result.still_active.contains(&child));
    assert_eq!(runtime.get_state(child).unwrap(), AgentState::Active);
}

#[tokio::test(start_paused = true)]
async fn wait_timeout_is_clamped_to_the_configured_maximum() {
    let runtime = AgentRuntime::new(RuntimeConfig {
        max_wait_timeout_ms: 2_000,
        ..RuntimeConfig::default()
    });
    let root = runtime.create_root("plan").unwrap();
    let child = runtime.spawn(root, SpawnRequest::fresh("work")).unwrap().id();

    let start = Instant::now();
    let result = runtime
        .wait(&[child], Some(Duration::from_secs(3_600)))
        .await
        .unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert!(result.timed_out);
}

#[tokio::test(start_paused = true)]
async fn wait_on_unknown_id_fails() {
    let runtime = runtime();
    let missing = AgentId::new();
    let err = runtime.wait(&[missing], None).await.unwrap_err();
    assert_eq!(err, AgentError::UnknownTask(missing));
}

#[tokio::test(start_paused = true)]
async fn wait_on_watchdogs_alone_returns_immediately() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let watchdog_id = watchdog(&runtime, root, 60);

    let start = Instant::now();
    let result = runtime
        .wait(&[watchdog_id], Some(Duration::from_secs(300)))
        .await
        .unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(!result.timed_out);
    assert!(result.completed.is_empty());
    assert!(result.still_active.is_empty());
    let status = &result.watchdogs[&watchdog_id];
    assert_eq!(status.owner_id, root);
    assert_eq!(status.phase, WatchdogPhase::Armed);
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn one_check_in_for_seventy_idle_seconds() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let watchdog_id = watchdog(&runtime, root, 60);

    tokio::time::sleep(Duration::from_secs(70)).await;
    assert_eq!(check_ins(&runtime, watchdog_id), 1);

    // The clock restarted at the firing, so nothing more until 120s.
    tokio::time::sleep(Duration::from_secs(49)).await;
    assert_eq!(check_ins(&runtime, watchdog_id), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(check_ins(&runtime, watchdog_id), 2);
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn a_running_owner_is_never_checked_on() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    runtime.begin_turn(root).unwrap();
    let watchdog_id = watchdog(&runtime, root, 60);

    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(check_ins(&runtime, watchdog_id), 0);

    runtime.end_turn(root).unwrap();
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(check_ins(&runtime, watchdog_id), 0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(check_ins(&runtime, watchdog_id), 1);
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn a_short_turn_restarts_the_idle_clock() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let watchdog_id = watchdog(&runtime, root, 60);

    tokio::time::sleep(Duration::from_secs(50)).await;
    runtime.begin_turn(root).unwrap();
    runtime.end_turn(root).unwrap();

    // Idle since 50s, so due at 110s rather than 60s.
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(check_ins(&runtime, watchdog_id), 0);
    tokio::time::sleep(Duration::from_secs(24)).await;
    assert_eq!(check_ins(&runtime, watchdog_id), 0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(check_ins(&runtime, watchdog_id), 1);
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn owner_activity_during_a_check_in_moves_the_next_deadline() {
    let runtime = AgentRuntime::with_runner(RuntimeConfig::default(), Arc::new(SlowCheckIn));
    let root = runtime.create_root("plan").unwrap();
    let watchdog_id = watchdog(&runtime, root, 60);

    // Fires at 60s; the check-in runs until 90s.
    tokio::time::sleep(Duration::from_secs(61)).await;
    let status = runtime.watchdog_status(&watchdog_id).unwrap();
    assert_eq!(status.check_ins, 1);
    assert_eq!(status.phase, WatchdogPhase::Firing);

    tokio::time::sleep(Duration::from_secs(9)).await;
    runtime.begin_turn(root).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    runtime.end_turn(root).unwrap();

    // Idle since 80s: the next firing is at 140s, not 150s or 120s.
    tokio::time::sleep(Duration::from_secs(59)).await;
    let status = runtime.watchdog_status(&watchdog_id).unwrap();
    assert_eq!(status.check_ins, 1);
    assert_eq!(status.phase, WatchdogPhase::Armed);
    assert_eq!(
        status.last_check_in.map(|record| record.summary),
        Some(Some("took a while".to_string()))
    );
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(check_ins(&runtime, watchdog_id), 2);
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn finished_check_ins_do_not_keep_the_owner_context() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    for step in 1..52 {
        runtime
            .append_context(root, ContextItem::message(format!("step {step}")))
            .unwrap();
    }
    assert_eq!(runtime.context(root).unwrap().len(), 52);
    let watchdog_id = watchdog(&runtime, root, 1);

    tokio::time::sleep(Duration::from_millis(500_500)).await;
    let fired = check_ins(&runtime, watchdog_id);
    assert!(fired >= 490, "only {fired} check-ins in 500s");

    let agents = runtime.list_agents();
    let finished: Vec<_> = agents
        .iter()
        .filter(|agent| agent.origin.is_check_in())
        .collect();
    assert_eq!(finished.len() as u64, fired);
    assert!(
        finished
            .iter()
            .all(|agent| agent.state.is_terminal() && agent.context_len == 0)
    );
    let retained: usize = agents.iter().map(|agent| agent.context_len).sum();
    assert_eq!(retained, 52);

    // Released check-ins stay answerable but take no more messages.
    let last = finished[finished.len() - 1].id;
    assert_eq!(runtime.get_state(last).unwrap(), AgentState::Completed);
    let err = runtime
        .send(root, MessageTarget::Agent(last), "late reply", false)
        .unwrap_err();
    assert_eq!(err, AgentError::UnknownTarget(last.to_string()));
    let result = runtime.wait(&[last], None).await.unwrap();
    assert_eq!(result.completed.get(&last), Some(&AgentState::Completed));
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn silent_check_in_falls_back_to_the_owner_inbox() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let watchdog_id = watchdog(&runtime, root, 60);

    tokio::time::sleep(Duration::from_secs(61)).await;
    let status = runtime.watchdog_status(&watchdog_id).unwrap();
    let record = status.last_check_in.unwrap();
    assert_eq!(record.state, AgentState::Completed);
    assert_eq!(record.delivery, Delivery::Fallback);

    let inbox = runtime.read_inbox(root).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].from, record.agent_id);
    assert!(runtime.drain_messages(root).unwrap().is_empty());

    let rendered = runtime.consume_inbox_as_tags(root).unwrap().unwrap();
    assert!(rendered.starts_with(&format!("<agent-message from=\"{}\">", record.agent_id)));
    assert_eq!(runtime.consume_inbox_as_tags(root).unwrap(), None);
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn reporting_check_in_uses_the_primary_channel() {
    let runtime = AgentRuntime::with_runner(RuntimeConfig::default(), Arc::new(ReportingCheckIn));
    let root = runtime.create_root("plan").unwrap();
    let watchdog_id = watchdog(&runtime, root, 30);

    tokio::time::sleep(Duration::from_secs(31)).await;
    let record = runtime
        .watchdog_status(&watchdog_id)
        .unwrap()
        .last_check_in
        .unwrap();
    assert_eq!(record.delivery, Delivery::Primary);
    assert_eq!(record.summary.as_deref(), Some("reported"));
    assert!(runtime.read_inbox(root).unwrap().is_empty());

    // The check-in saw the owner's one item plus its prompt.
    let delivered = runtime.drain_messages(root).unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].from, record.agent_id);
    assert_eq!(delivered[0].message, "2 items in view; last: Check on progress");

    let notes = runtime
        .context(root)
        .unwrap()
        .items()
        .iter()
        .filter(|item| item.source == ItemSource::Note { from: record.agent_id })
        .count();
    assert_eq!(notes, 1);
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn failed_check_in_still_reaches_the_owner() {
    let runtime = AgentRuntime::with_runner(RuntimeConfig::default(), Arc::new(FailingCheckIn));
    let root = runtime.create_root("plan").unwrap();
    let watchdog_id = watchdog(&runtime, root, 60);

    tokio::time::sleep(Duration::from_secs(61)).await;
    let record = runtime
        .watchdog_status(&watchdog_id)
        .unwrap()
        .last_check_in
        .unwrap();
    assert_eq!(record.state, AgentState::Failed);
    assert_eq!(record.delivery, Delivery::Fallback);
    assert_eq!(runtime.get_state(record.agent_id).unwrap(), AgentState::Failed);

    let inbox = runtime.consume_inbox(root).unwrap();
    assert_eq!(inbox.len(), 1);
    assert!(inbox[0].content.contains("model unavailable"));
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn disabled_fallback_drops_silent_check_ins() {
    let runtime = AgentRuntime::new(RuntimeConfig {
        fallback_delivery: false,
        ..RuntimeConfig::default()
    });
    let root = runtime.create_root("plan").unwrap();
    let watchdog_id = watchdog(&runtime, root, 60);

    tokio::time::sleep(Duration::from_secs(61)).await;
    let record = runtime
        .watchdog_status(&watchdog_id)
        .unwrap()
        .last_check_in
        .unwrap();
    assert_eq!(record.delivery, Delivery::Dropped);
    assert!(runtime.read_inbox(root).unwrap().is_empty());
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn second_watchdog_on_an_owner_is_independent() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let fast = watchdog(&runtime, root, 60);
    let slow = watchdog(&runtime, root, 90);

    tokio::time::sleep(Duration::from_secs(70)).await;
    assert_eq!(check_ins(&runtime, fast), 1);
    assert_eq!(check_ins(&runtime, slow), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(check_ins(&runtime, fast), 1);
    assert_eq!(check_ins(&runtime, slow), 1);
    assert_eq!(runtime.read_inbox(root).unwrap().len(), 2);
    assert_eq!(runtime.list_watchdogs().len(), 2);
    runtime.shutdown();
}

#[tokio::test(start_paused = true)]
async fn closed_watchdog_stops_firing() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let watchdog_id = watchdog(&runtime, root, 60);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let CloseResult::Watchdog {
        newly_closed,
        status,
    } = runtime.close(watchdog_id)
    else {
        panic!("expected a watchdog close result");
    };
    assert!(newly_closed);
    assert_eq!(status.phase, WatchdogPhase::Closed);
    assert!(matches!(
        runtime.close(watchdog_id),
        CloseResult::Watchdog {
            newly_closed: false,
            ..
        }
    ));

    tokio::time::sleep(Duration::from_secs(120)).await;
    let status = runtime.watchdog_status(&watchdog_id).unwrap();
    assert_eq!(status.phase, WatchdogPhase::Closed);
    assert_eq!(status.check_ins, 0);
    assert_eq!(runtime.get_state(root).unwrap(), AgentState::Active);
}

#[tokio::test(start_paused = true)]
async fn watchdog_goes_dormant_when_its_owner_finishes() {
    let runtime = runtime();
    let mut events = runtime.subscribe();
    let root = runtime.create_root("plan").unwrap();
    let watchdog_id = watchdog(&runtime, root, 60);

    tokio::time::sleep(Duration::from_secs(5)).await;
    runtime
        .transition(root, root, AgentState::Completed)
        .unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    let status = runtime.watchdog_status(&watchdog_id).unwrap();
    assert_eq!(status.phase, WatchdogPhase::OwnerGone);
    assert_eq!(status.check_ins, 0);

    let mut stopped = None;
    while let Ok(event) = events.try_recv() {
        if let EventMsg::WatchdogStopped(event) = event.msg {
            stopped = Some(event);
        }
    }
    let stopped = stopped.unwrap();
    assert_eq!(stopped.watchdog_id, watchdog_id);
    assert_eq!(stopped.phase, WatchdogPhase::OwnerGone);
}

#[tokio::test(start_paused = true)]
async fn watchdog_spawn_validates_owner_and_interval() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let child = runtime.spawn(root, SpawnRequest::fresh("work")).unwrap().id();
    runtime.close(child);

    let err = runtime
        .spawn(root, SpawnRequest::watchdog("check").with_owner(child))
        .unwrap_err();
    assert_eq!(err, AgentError::InvalidOwner(child));

    let err = runtime
        .spawn(root, SpawnRequest::watchdog("check").with_interval(0))
        .unwrap_err();
    assert!(matches!(err, AgentError::InvalidRequest(_)));
    assert!(runtime.list_watchdogs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn watchdog_ids_are_not_message_targets() {
    let runtime = runtime();
    let root = runtime.create_root("plan").unwrap();
    let SpawnOutcome::Watchdog(watchdog_id) = runtime
        .spawn(root, SpawnRequest::watchdog("check"))
        .unwrap()
    else {
        panic!("expected a watchdog handle");
    };
    let err = runtime
        .send(root, MessageTarget::Agent(watchdog_id), "hi", false)
        .unwrap_err();
    assert_eq!(err, AgentError::UnknownTarget(watchdog_id.to_string()));
    runtime.shutdown();
}
