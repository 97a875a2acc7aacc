//! Event routing by declared type.
//!
//! The "what counts as a known type" decision is made exactly once, here.
//! Downstream code consumes the closed [`Lane`] enum instead of re-comparing
//! strings.

use crate::event::Event;

/// The routing bucket an event falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// `event_type == "order"`
    Order,
    /// `event_type == "inventory"`
    Inventory,
    /// `event_type == "user_activity"`
    UserActivity,
    /// Unknown or absent event type. No sink exists for this lane; such
    /// events are dropped without a counter.
    Unrouted,
}

/// The three lanes that have sinks, in declaration order.
pub const ROUTED_LANES: [Lane; 3] = [Lane::Order, Lane::Inventory, Lane::UserActivity];

impl Lane {
    /// Classify an event by exact match on its `event_type` field.
    ///
    /// Pure: no side effects, same input always yields the same lane.
    pub fn classify(event: &Event) -> Lane {
        match event.event_type() {
            Some("order") => Lane::Order,
            Some("inventory") => Lane::Inventory,
            Some("user_activity") => Lane::UserActivity,
            _ => Lane::Unrouted,
        }
    }

    /// The event-type string this lane matches.
    pub fn event_type(&self) -> Option<&'static str> {
        match self {
            Lane::Order => Some("order"),
            Lane::Inventory => Some("inventory"),
            Lane::UserActivity => Some("user_activity"),
            Lane::Unrouted => None,
        }
    }

    /// The warehouse table this lane appends to.
    pub fn table_name(&self) -> Option<&'static str> {
        match self {
            Lane::Order => Some("order_events"),
            Lane::Inventory => Some("inventory_events"),
            Lane::UserActivity => Some("user_activity_events"),
            Lane::Unrouted => None,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_type().unwrap_or("unrouted"))
    }
}
