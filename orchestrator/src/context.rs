//! Agent context values and per-mode context propagation.
//!
//! A [`Context`] is an immutable-by-default list of [`ContextItem`]s behind
//! an `Arc`. Taking a snapshot is a pointer copy; the first mutation of a
//! shared context clones the backing vector, so a forked child never sees
//! later writes by its parent and vice versa.

use std::sync::Arc;

use codex_agent_protocol::protocol::ContextItem;
use codex_agent_protocol::protocol::SpawnMode;
use serde::Serialize;
use serde::Serializer;

use crate::error::AgentError;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    items: Arc<Vec<ContextItem>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<ContextItem>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    /// O(1) copy that is isolated from future writes on either side.
    pub fn snapshot(&self) -> Context {
        self.clone()
    }

    pub fn push(&mut self, item: ContextItem) {
        Arc::make_mut(&mut self.items).push(item);
    }

    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<&ContextItem> {
        self.items.last()
    }

    /// Whether both values still point at the same backing storage.
    pub fn shares_storage_with(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.items.as_slice().serialize(serializer)
    }
}

/// Build the starting context of a new agent.
///
/// `parent` must be the parent's context as read at the instant of the
/// creation call.
pub(crate) fn propagate(
    mode: SpawnMode,
    parent: Option<&Context>,
    initial: ContextItem,
) -> Result<Context> {
    match mode {
        SpawnMode::Fresh => Ok(Context::from_items(vec![initial])),
        SpawnMode::Forked => {
            let mut context = parent
                .map(Context::snapshot)
                .ok_or_else(|| AgentError::InvalidRequest("forked agents need a parent".to_string()))?;
            context.push(initial);
            Ok(context)
        }
        SpawnMode::Watchdog => Err(AgentError::InvalidRequest(
            "watchdog spawns create a handle, not an agent".to_string(),
        )),
    }
}
