//! Primary message queues and target resolution.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use codex_agent_protocol::protocol::Envelope;
use codex_agent_protocol::protocol::MessageTarget;

use crate::error::AgentError;
use crate::error::Result;
use crate::registry::AgentRecord;
use crate::registry::Registry;

/// One FIFO queue per target agent. A single queue per target is strictly
/// stronger than FIFO per (sender, target) pair.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    interrupts_requested: AtomicU64,
    interrupts_seen: AtomicU64,
}

impl Mailbox {
    pub(crate) fn push(&self, envelope: Envelope) {
        if envelope.interrupt {
            self.interrupts_requested.fetch_add(1, Ordering::AcqRel);
        }
        self.lock().push_back(envelope);
    }

    pub(crate) fn drain(&self) -> Vec<Envelope> {
        self.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// True once per batch of interrupt requests received since the last call.
    pub(crate) fn take_interrupt(&self) -> bool {
        let requested = self.interrupts_requested.load(Ordering::Acquire);
        self.interrupts_seen.swap(requested, Ordering::AcqRel) != requested
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Envelope>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolve `target` as seen from `sender` to a record that may receive
/// messages. `Parent` (an omitted target, `"parent"`, or `"root"`) resolves
/// to the sender's immediate parent, which for a check-in is its owner.
pub(crate) fn resolve_target(
    registry: &Registry,
    sender: &AgentRecord,
    target: MessageTarget,
) -> Result<Arc<AgentRecord>> {
    let target_id = match target {
        MessageTarget::Parent => sender.parent_id.ok_or_else(|| {
            AgentError::UnknownTarget(format!("parent of root agent {}", sender.id))
        })?,
        MessageTarget::Agent(id) => id,
    };
    let record = registry
        .find(&target_id)
        .ok_or_else(|| AgentError::UnknownTarget(target_id.to_string()))?;
    if !record.accepts_messages() {
        return Err(AgentError::UnknownTarget(target_id.to_string()));
    }
    Ok(record)
}

/// Queue `message` from `sender` on `target`. Marks check-ins that message
/// their owner so the runtime can skip fallback delivery.
pub(crate) fn deliver(
    sender: &AgentRecord,
    target: &AgentRecord,
    seq: u64,
    message: String,
    interrupt: bool,
) {
    if sender.origin.is_check_in() && sender.parent_id == Some(target.id) {
        sender.mark_sent_to_owner();
    }
    target.mailbox.push(Envelope {
        seq,
        from: sender.id,
        to: target.id,
        message,
        interrupt,
    });
    tracing::debug!(
        seq,
        from = %sender.id,
        to = %target.id,
        interrupt,
        "queued agent message"
    );
}
