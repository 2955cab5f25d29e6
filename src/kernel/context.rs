use super::engine::Engine;
use super::event::Event;
use super::event::Payload;
use super::source::EventSource;
use std::rc::Rc;

/// the view of the engine handed to event handlers: the clock plus the
/// scheduling surface. all engine state is interior-mutable, so a shared
/// reference is enough for everything a handler may legitimately do.
pub struct Context<'a> {
    engine: &'a Engine,
}

impl<'a> Context<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// the simulated time to date
    pub fn time(&self) -> f64 {
        self.engine.simulated_time()
    }

    pub fn engine(&self) -> &Engine {
        self.engine
    }

    pub fn schedule(
        &self,
        source: &Rc<EventSource>,
        time: f64,
        payload: Payload,
    ) -> Option<Rc<Event>> {
        self.engine.schedule_event(source, time, payload)
    }

    pub fn reschedule(&self, event: &Rc<Event>, time: f64) {
        self.engine.reschedule_event(event, time);
    }
}
