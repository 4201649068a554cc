// Typed, owned event dispatcher plus the notifications the route network emits.
//
// Handlers run synchronously, in subscription order. The first handler that
// fails stops delivery of that event to the remaining handlers and the error
// goes back to the publisher.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use bevy_ecs::entity::Entity;
use glam::Vec3;
use thiserror::Error;

use super::components::TravelDirection;
use super::junction::JunctionCrossing;
use super::network::PathId;
use super::resample::SamplePoint;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event handler failed: {message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ErasedHandler = Box<dyn FnMut(&dyn Any) -> Result<(), HandlerError>>;

struct Subscription {
    id:      SubscriptionId,
    handler: ErasedHandler,
}

// ============================================================================
// DISPATCHER
// ============================================================================

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<TypeId, Vec<Subscription>>,
    next_id:  u64,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("event_types", &self.handlers.len())
            .field("subscriptions", &self.handlers.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of type `E`.
    pub fn subscribe<E: 'static>(
        &mut self,
        mut handler: impl FnMut(&E) -> Result<(), HandlerError> + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let erased: ErasedHandler = Box::new(move |event: &dyn Any| match event.downcast_ref::<E>() {
            Some(event) => handler(event),
            None => Ok(()),
        });

        self.handlers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscription { id, handler: erased });
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for subscriptions in self.handlers.values_mut() {
            if let Some(pos) = subscriptions.iter().position(|s| s.id == id) {
                subscriptions.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every handler of `E`. Returns how many ran.
    pub fn publish<E: 'static>(&mut self, event: &E) -> Result<usize, HandlerError> {
        let Some(subscriptions) = self.handlers.get_mut(&TypeId::of::<E>()) else {
            return Ok(0);
        };

        for subscription in subscriptions.iter_mut() {
            (subscription.handler)(event as &dyn Any)?;
        }
        Ok(subscriptions.len())
    }

    pub fn subscriber_count<E: 'static>(&self) -> usize {
        self.handlers.get(&TypeId::of::<E>()).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// A path finished rebuilding. `samples` is a snapshot copy.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRebuilt {
    pub path:    PathId,
    pub samples: Vec<SamplePoint>,
    pub length:  f32,
}

/// A traveler passed a junction node during its last tick.
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionCrossed {
    pub entity:      Entity,
    pub path:        PathId,
    pub crossing:    JunctionCrossing,
    /// Set when the traveler branched onto another path at this node.
    pub switched_to: Option<PathId>,
}

/// A traveler hit the end of its path in its direction of travel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReachedEnd {
    pub entity:    Entity,
    pub path:      PathId,
    pub direction: TravelDirection,
}

/// Emitted after every advance of a following traveler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelerMoved {
    pub entity:     Entity,
    pub path:       PathId,
    pub percentage: f32,
    pub position:   Vec3,
}
