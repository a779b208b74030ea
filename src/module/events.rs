//! Container event notification
//!
//! Subscribers get an unbounded tokio channel; publishing never blocks the
//! thread mutating the container. Closed channels are pruned on publish.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::module::report::ResolutionReport;
use crate::module::resource::ResourceId;

/// Event kinds subscribers can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
    Installed,
    Updated,
    Uninstalled,
    Resolved,
    Unresolved,
    ResolutionFailed,
}

/// Structural and resolution changes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ContainerEvent {
    Installed(ResourceId),
    /// `old` stays resolved (removal pending) until refreshed
    Updated { old: ResourceId, new: ResourceId },
    Uninstalled(ResourceId),
    /// Resources newly published as resolved, in id order
    Resolved(Vec<ResourceId>),
    /// Resources whose wirings were discarded by a refresh
    Unresolved(Vec<ResourceId>),
    ResolutionFailed {
        triggers: Vec<ResourceId>,
        report: ResolutionReport,
    },
}

impl ContainerEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            ContainerEvent::Installed(_) => EventType::Installed,
            ContainerEvent::Updated { .. } => EventType::Updated,
            ContainerEvent::Uninstalled(_) => EventType::Uninstalled,
            ContainerEvent::Resolved(_) => EventType::Resolved,
            ContainerEvent::Unresolved(_) => EventType::Unresolved,
            ContainerEvent::ResolutionFailed { .. } => EventType::ResolutionFailed,
        }
    }
}

struct Subscriber {
    /// Empty means every event type
    types: HashSet<EventType>,
    sender: mpsc::UnboundedSender<ContainerEvent>,
}

/// Event subscription manager
#[derive(Default)]
pub struct EventManager {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `types`; an empty slice subscribes to everything
    pub fn subscribe(&self, types: &[EventType]) -> mpsc::UnboundedReceiver<ContainerEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        debug!("New event subscriber for {:?}", types);
        self.subscribers.lock().push(Subscriber {
            types: types.iter().copied().collect(),
            sender,
        });
        receiver
    }

    /// Deliver `event` to every interested subscriber
    pub fn publish(&self, event: ContainerEvent) {
        let event_type = event.event_type();
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|sub| {
            if !sub.types.is_empty() && !sub.types.contains(&event_type) {
                return !sub.sender.is_closed();
            }
            sub.sender.send(event.clone()).is_ok()
        });
        let dropped = before - subscribers.len();
        if dropped > 0 {
            warn!("Dropped {} closed event subscriber(s)", dropped);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filtered_subscription() {
        let events = EventManager::new();
        let mut all = events.subscribe(&[]);
        let mut installs = events.subscribe(&[EventType::Installed]);

        events.publish(ContainerEvent::Uninstalled(ResourceId(1)));
        events.publish(ContainerEvent::Installed(ResourceId(2)));

        assert_eq!(all.recv().await, Some(ContainerEvent::Uninstalled(ResourceId(1))));
        assert_eq!(all.recv().await, Some(ContainerEvent::Installed(ResourceId(2))));
        assert_eq!(installs.recv().await, Some(ContainerEvent::Installed(ResourceId(2))));
        assert!(installs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let events = EventManager::new();
        let rx = events.subscribe(&[]);
        assert_eq!(events.subscriber_count(), 1);
        drop(rx);
        events.publish(ContainerEvent::Resolved(vec![ResourceId(1)]));
        assert_eq!(events.subscriber_count(), 0);
    }
}
