//! Listener registry shared by transport backends.
//!
//! Backends implement the subscribe/unsubscribe half of
//! [`HidDevice`](crate::device::HidDevice) by holding a [`ListenerRegistry`] and
//! calling [`ListenerRegistry::emit`] for every [`DeviceEvent`] they produce.

use crate::event::DeviceEvent;
use std::collections::BTreeMap;

/// Receives device events.
pub trait DeviceListener: Send {
    fn on_event(&mut self, event: &DeviceEvent);
}

impl<F> DeviceListener for F
where
    F: FnMut(&DeviceEvent) + Send,
{
    fn on_event(&mut self, event: &DeviceEvent) {
        self(event)
    }
}

/// Opaque handle returned when a listener is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Which events a listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFilter {
    All,
    InputReports,
    Disconnects,
}

impl EventFilter {
    fn accepts(self, event: &DeviceEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::InputReports => event.is_input_report(),
            EventFilter::Disconnects => matches!(event, DeviceEvent::Disconnected),
        }
    }
}

struct ListenerEntry {
    listener: Box<dyn DeviceListener>,
    filter: EventFilter,
}

/// Id-keyed set of listeners. Dispatch follows registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    listeners: BTreeMap<ListenerId, ListenerEntry>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener and returns its id.
    pub fn add(&mut self, listener: Box<dyn DeviceListener>, filter: EventFilter) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners
            .insert(id, ListenerEntry { listener, filter });
        id
    }

    /// Unregisters a listener. Returns `false` if `id` was not registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Drops every listener.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers `event` to every listener whose filter accepts it.
    pub fn emit(&mut self, event: &DeviceEvent) {
        for entry in self.listeners.values_mut() {
            if entry.filter.accepts(event) {
                entry.listener.on_event(event);
            }
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
