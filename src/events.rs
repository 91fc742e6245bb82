//! Change notifications
//!
//! Rendering layers register plain callbacks on the processor and receive an
//! [`EvolutionEvent`] for each visible change.

use crate::types::{DayKey, DecayState, Phase};
use serde::Serialize;

/// Something a rendering layer may want to react to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EvolutionEvent {
    /// A day's record was written
    DayUpdated {
        date: DayKey,
        steps: u32,
        goal: u32,
        goal_met: bool,
    },
    /// The wall-clock date moved on
    DayBoundary { previous: DayKey, today: DayKey },
    /// The permanent baseline phase went up
    PhaseAdvanced { from: Phase, to: Phase },
    /// Displayed phase or miss streak changed
    DecayChanged { state: DecayState },
    /// Cumulative steps passed a milestone
    MilestoneCrossed { milestone: u64, total_steps: u64 },
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&EvolutionEvent) + Send>;

/// Ordered list of listeners, called synchronously in registration order
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&EvolutionEvent) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn publish(&mut self, event: &EvolutionEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
