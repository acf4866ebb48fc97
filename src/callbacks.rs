use std::fmt;

use crate::hysteresis::Transition;

type Handler = Box<dyn Fn() + Send + Sync + 'static>;

/// The two hooks a monitor fires on hot/cold transitions.
///
/// Handlers run on the control task. A panicking handler takes the monitor
/// down with it.
pub struct TransitionCallbacks {
    on_active: Handler,
    on_inactive: Handler,
}

impl TransitionCallbacks {
    pub fn new<A, I>(on_active: A, on_inactive: I) -> Self
    where
        A: Fn() + Send + Sync + 'static,
        I: Fn() + Send + Sync + 'static,
    {
        Self {
            on_active: Box::new(on_active),
            on_inactive: Box::new(on_inactive),
        }
    }

    pub fn fire(&self, transition: Transition) {
        match transition {
            Transition::BecameActive => (self.on_active)(),
            Transition::BecameInactive => (self.on_inactive)(),
        }
    }
}

impl fmt::Debug for TransitionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionCallbacks").finish_non_exhaustive()
    }
}
