//! Typed publish/subscribe for registry events.

use serde::Serialize;
use std::collections::HashMap;

use crate::types::{Value, ValueDefinition, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Add,
    Remove,
    Change,
    Error,
}

/// Classifies runtime evaluation failures reported as error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ComputeError,
    AccumulatorError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ValueEvent {
    Add {
        id: ValueId,
        definition: ValueDefinition,
    },
    Remove {
        id: ValueId,
    },
    Change {
        id: ValueId,
        old_value: Value,
        new_value: Value,
    },
    Error {
        id: ValueId,
        code: ErrorCode,
        message: String,
    },
}

impl ValueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ValueEvent::Add { .. } => EventKind::Add,
            ValueEvent::Remove { .. } => EventKind::Remove,
            ValueEvent::Change { .. } => EventKind::Change,
            ValueEvent::Error { .. } => EventKind::Error,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ValueEvent::Add { id, .. }
            | ValueEvent::Remove { id }
            | ValueEvent::Change { id, .. }
            | ValueEvent::Error { id, .. } => id,
        }
    }
}

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Callback = Box<dyn FnMut(&ValueEvent) + Send>;

struct Listener {
    id: SubscriptionId,
    filter: Option<ValueId>,
    once: bool,
    fired: bool,
    callback: Callback,
}

impl Listener {
    fn matches(&self, event: &ValueEvent) -> bool {
        self.filter.as_deref().is_none_or(|id| id == event.id())
    }
}

#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventKind, Vec<Listener>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&mut self, kind: EventKind, filter: Option<ValueId>, once: bool, callback: Callback) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.listeners.entry(kind).or_default().push(Listener {
            id,
            filter,
            once,
            fired: false,
            callback,
        });
        id
    }

    /// Subscribe to every event of `kind`, or only those for `filter` when given.
    pub fn on<F>(&mut self, kind: EventKind, filter: Option<&str>, callback: F) -> SubscriptionId
    where
        F: FnMut(&ValueEvent) + Send + 'static,
    {
        self.subscribe(kind, filter.map(str::to_string), false, Box::new(callback))
    }

    /// Like [`Self::on`], but the listener is dropped after its first call.
    pub fn once<F>(&mut self, kind: EventKind, filter: Option<&str>, callback: F) -> SubscriptionId
    where
        F: FnMut(&ValueEvent) + Send + 'static,
    {
        self.subscribe(kind, filter.map(str::to_string), true, Box::new(callback))
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        for list in self.listeners.values_mut() {
            if let Some(pos) = list.iter().position(|l| l.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn emit(&mut self, event: &ValueEvent) {
        let Some(list) = self.listeners.get_mut(&event.kind()) else {
            return;
        };
        for listener in list.iter_mut() {
            if listener.matches(event) {
                (listener.callback)(event);
                listener.fired = true;
            }
        }
        list.retain(|l| !(l.once && l.fired));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }
}
