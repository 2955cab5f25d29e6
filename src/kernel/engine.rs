use super::context::Context;
use super::event::Event;
use super::event::Payload;
use super::list::EventList;
use super::source::EventSource;
use crate::float;
use crate::stats::Analyzable;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

struct Monitored {
    stat: Rc<dyn Analyzable>,
    steady_seen: Cell<bool>,
}

/// the discrete-event simulation kernel: simulated clock, future-event set,
/// lifecycle event sources, and the registry of analyzable statistics polled
/// for global termination.
///
/// the kernel provides no output-analysis policy of its own; `Replications`
/// and `BatchMeans` wrap it with the two supported experiment designs.
pub struct Engine {
    clock: Rc<Cell<f64>>,
    last_event_time: Cell<f64>,
    end_of_sim: Cell<bool>,
    list: RefCell<EventList>,
    num_events: Cell<usize>,
    num_user_events: Cell<usize>,
    next_event_id: Cell<u64>,
    begin_of_sim: Rc<EventSource>,
    end_of_sim_source: Rc<EventSource>,
    before_fire: Rc<EventSource>,
    after_fire: Rc<EventSource>,
    system_init: Rc<EventSource>,
    system_finit: Rc<EventSource>,
    internal: RefCell<Vec<u64>>,
    monitored: RefCell<Vec<Monitored>>,
}

impl Engine {
    pub fn new() -> Rc<Self> {
        let begin_of_sim = EventSource::new("Begin of Simulation");
        let end_of_sim_source = EventSource::new("End of Simulation");
        let before_fire = EventSource::new("Before Event Firing");
        let after_fire = EventSource::new("After Event Firing");
        let system_init = EventSource::new("System Initialization");
        let system_finit = EventSource::new("System Finalization");
        let internal = vec![
            begin_of_sim.id(),
            end_of_sim_source.id(),
            before_fire.id(),
            after_fire.id(),
            system_init.id(),
            system_finit.id(),
        ];
        Rc::new(Self {
            clock: Rc::new(Cell::new(0.0)),
            last_event_time: Cell::new(0.0),
            end_of_sim: Cell::new(true),
            list: RefCell::new(EventList::new()),
            num_events: Cell::new(0),
            num_user_events: Cell::new(0),
            next_event_id: Cell::new(0),
            begin_of_sim,
            end_of_sim_source,
            before_fire,
            after_fire,
            system_init,
            system_finit,
            internal: RefCell::new(internal),
            monitored: RefCell::new(Vec::new()),
        })
    }

    pub fn simulated_time(&self) -> f64 {
        self.clock.get()
    }

    /// shared handle on the simulated clock, for collaborators that need to
    /// read time outside a dispatch (e.g. duration-based detectors)
    pub fn clock_handle(&self) -> Rc<Cell<f64>> {
        Rc::clone(&self.clock)
    }

    pub fn last_event_time(&self) -> f64 {
        self.last_event_time.get()
    }

    pub fn end_of_simulation(&self) -> bool {
        self.end_of_sim.get()
    }

    pub(crate) fn set_end_of_simulation(&self, value: bool) {
        self.end_of_sim.set(value);
    }

    pub fn num_events(&self) -> usize {
        self.num_events.get()
    }

    pub fn begin_of_sim_source(&self) -> &Rc<EventSource> {
        &self.begin_of_sim
    }

    pub fn end_of_sim_source(&self) -> &Rc<EventSource> {
        &self.end_of_sim_source
    }

    pub fn before_fire_source(&self) -> &Rc<EventSource> {
        &self.before_fire
    }

    pub fn after_fire_source(&self) -> &Rc<EventSource> {
        &self.after_fire
    }

    pub fn system_init_source(&self) -> &Rc<EventSource> {
        &self.system_init
    }

    pub fn system_finit_source(&self) -> &Rc<EventSource> {
        &self.system_finit
    }

    /// enqueue an event at the given time. firing in the past is snapped to
    /// the current time with a warning; a disabled source yields nothing.
    pub fn schedule_event(
        &self,
        source: &Rc<EventSource>,
        time: f64,
        payload: Payload,
    ) -> Option<Rc<Event>> {
        if !source.enabled() {
            log::warn!(
                "tried to schedule an event from the disabled event source {} at time {} (clock {})",
                source,
                time,
                self.clock.get()
            );
            return None;
        }
        let now = self.clock.get();
        let time = if time < now {
            log::warn!(
                "fire time of event <{} @ {}> refers to the past: synched to current time {}",
                source,
                time,
                now
            );
            now
        } else {
            time
        };
        let event = Rc::new(Event::new(
            self.next_id(),
            Rc::clone(source),
            now,
            time,
            payload,
        ));
        self.list.borrow_mut().push(Rc::clone(&event));
        Some(event)
    }

    /// move a pending event to a new fire time. past times are snapped to
    /// now when the event is still in the future and refused otherwise;
    /// approximately-unchanged times are skipped to avoid reschedule
    /// cascades. otherwise the event is erased and reinserted so the FIFO
    /// tie-break stays consistent.
    pub fn reschedule_event(&self, event: &Rc<Event>, time: f64) {
        if !event.source().enabled() {
            log::warn!(
                "tried to reschedule an event from the disabled event source {} at time {} (clock {})",
                event.source(),
                time,
                self.clock.get()
            );
            return;
        }
        let now = self.clock.get();
        let mut time = time;
        if time < now {
            if event.fire_time() > now {
                log::warn!(
                    "new fire time {} of event {} refers to the past and will be adjusted to current time {}",
                    time,
                    event,
                    now
                );
                time = now;
            } else {
                log::warn!(
                    "new fire time {} of event {} refers to the past and will not be rescheduled",
                    time,
                    event
                );
                return;
            }
        }
        if float::essentially_equal(time, event.fire_time()) {
            log::debug!(
                "new fire time {} of event {} is approximately equal to the old one and will not be rescheduled",
                time,
                event
            );
            return;
        }
        let mut list = self.list.borrow_mut();
        list.erase(event);
        event.set_fire_time(time);
        list.push(Rc::clone(event));
    }

    /// end the simulation at the current clock value; takes effect at the
    /// next loop boundary
    pub fn stop_now(&self) {
        self.end_of_sim.set(true);
    }

    /// schedule the end of the simulation at the given future time
    pub fn stop_at_time(&self, time: f64) -> crate::Result<()> {
        if time < self.clock.get() {
            return Err(crate::SimError::Logic(format!(
                "cannot stop the simulation at past time {} (clock {})",
                time,
                self.clock.get()
            )));
        }
        self.schedule_event(&self.end_of_sim_source, time, Payload::None);
        Ok(())
    }

    /// register a statistic for termination monitoring. registration is
    /// idempotent by identity.
    pub fn monitor(&self, stat: &Rc<dyn Analyzable>) {
        let mut monitored = self.monitored.borrow_mut();
        if monitored
            .iter()
            .any(|m| Rc::ptr_eq(&m.stat, stat))
        {
            return;
        }
        monitored.push(Monitored {
            steady_seen: Cell::new(stat.steady_state_entered()),
            stat: Rc::clone(stat),
        });
        drop(monitored);
        if !self.end_of_sim.get() {
            stat.initialize_for_experiment();
        }
    }

    pub fn forget(&self, stat: &Rc<dyn Analyzable>) -> crate::Result<()> {
        let mut monitored = self.monitored.borrow_mut();
        let before = monitored.len();
        monitored.retain(|m| !Rc::ptr_eq(&m.stat, stat));
        match monitored.len() {
            n if n < before => Ok(()),
            _ => Err(crate::SimError::InvalidArgument(
                "statistic not analyzed".to_string(),
            )),
        }
    }

    pub fn forget_all(&self) {
        self.monitored.borrow_mut().clear();
    }

    pub fn has_monitored(&self) -> bool {
        !self.monitored.borrow().is_empty()
    }

    pub fn monitored_stats(&self) -> Vec<Rc<dyn Analyzable>> {
        self.monitored
            .borrow()
            .iter()
            .map(|m| Rc::clone(&m.stat))
            .collect()
    }

    pub(crate) fn event_list_empty(&self) -> bool {
        self.list.borrow().is_empty()
    }

    pub(crate) fn clear_event_list(&self) {
        self.list.borrow_mut().clear();
    }

    /// whether the next pending event is co-timed with the current clock
    pub(crate) fn next_fires_now(&self) -> bool {
        self.list
            .borrow()
            .peek()
            .map(|e| e.fire_time() == self.clock.get())
            .unwrap_or(false)
    }

    fn next_id(&self) -> u64 {
        let id = self.next_event_id.get() + 1;
        self.next_event_id.set(id);
        id
    }

    /// mark further sources as internal lifecycle sources (used by the
    /// engine variants for their replication events)
    pub(crate) fn register_internal(&self, source: &Rc<EventSource>) {
        self.internal.borrow_mut().push(source.id());
    }

    fn is_internal(&self, source: &EventSource) -> bool {
        self.internal.borrow().contains(&source.id())
    }

    /// reset clock and future-event set for a fresh run or replication.
    /// statistics are deliberately untouched; the engine variants decide
    /// when those reset.
    pub(crate) fn reset(&self) {
        self.clock.set(0.0);
        self.last_event_time.set(0.0);
        self.num_events.set(0);
        self.end_of_sim.set(false);
        self.list.borrow_mut().clear();
    }

    pub(crate) fn reset_statistics(&self) {
        for m in self.monitored.borrow().iter() {
            m.stat.reset();
        }
    }

    /// pop and fire the next pending event, bracketing non-internal events
    /// with the before/after-firing notifications. returns the fired event
    /// so callers can react to their own lifecycle sources.
    pub(crate) fn fire_next_event(&self) -> Option<Rc<Event>> {
        let event = self.list.borrow_mut().pop()?;
        if !event.source().enabled() {
            log::warn!(
                "event {} will not be fired since its source is disabled",
                event
            );
            return None;
        }
        debug_assert!(float::definitely_greater_equal(
            event.fire_time(),
            self.clock.get()
        ));
        self.clock.set(event.fire_time());
        self.dispatch(&event);
        Some(event)
    }

    /// build and fire an event right now, bypassing the event list. used for
    /// the lifecycle events that must not interleave with pending events.
    pub(crate) fn fire_immediate(&self, source: &Rc<EventSource>, payload: Payload) {
        let now = self.clock.get();
        let event = Rc::new(Event::new(
            self.next_id(),
            Rc::clone(source),
            now,
            now,
            payload,
        ));
        if !event.source().enabled() {
            log::warn!(
                "immediate event {} will not be fired since its source is disabled",
                event
            );
            return;
        }
        self.dispatch(&event);
    }

    fn dispatch(&self, event: &Rc<Event>) {
        self.num_events.set(self.num_events.get() + 1);
        let ctx = Context::new(self);
        let internal = self.is_internal(event.source());
        if !internal {
            self.num_user_events.set(self.num_user_events.get() + 1);
            if !self.before_fire.is_empty() {
                self.fire_wrapped(&self.before_fire, event, &ctx);
            }
        }
        log::trace!("firing event #{}: {}", self.num_events.get(), event);
        event.fire(&ctx);
        if !internal && !self.after_fire.is_empty() {
            self.fire_wrapped(&self.after_fire, event, &ctx);
        }
        self.last_event_time.set(event.fire_time());
        if event.is_from(&self.end_of_sim_source) {
            self.end_of_sim.set(true);
        }
    }

    fn fire_wrapped(&self, source: &Rc<EventSource>, event: &Rc<Event>, ctx: &Context) {
        let now = self.clock.get();
        let wrapped = Event::new(
            self.next_id(),
            Rc::clone(source),
            now,
            now,
            Payload::Nested(Rc::clone(event)),
        );
        self.num_events.set(self.num_events.get() + 1);
        wrapped.fire(ctx);
    }

    pub(crate) fn prepare_simulation(&self) {
        self.reset();
        self.reset_statistics();
        self.fire_immediate(&self.begin_of_sim, Payload::None);
    }

    pub(crate) fn finalize_simulation(&self) {
        self.end_of_sim.set(true);
        self.list.borrow_mut().clear();
        self.fire_immediate(&self.end_of_sim_source, Payload::None);
    }

    pub(crate) fn initialize_system(&self) {
        self.fire_immediate(&self.system_init, Payload::None);
    }

    pub(crate) fn finalize_system(&self) {
        self.fire_immediate(&self.system_finit, Payload::None);
    }

    /// global termination poll: stamp steady-state entry times, then end the
    /// simulation iff every enabled monitored statistic reached its target
    /// precision.
    pub(crate) fn monitor_statistics(&self) {
        let monitored = self.monitored.borrow();
        if monitored.is_empty() {
            return;
        }
        let mut reached = true;
        for m in monitored.iter() {
            if !m.steady_seen.get() && m.stat.steady_state_entered() {
                m.steady_seen.set(true);
                m.stat.set_steady_state_enter_time(self.clock.get());
            }
            if m.stat.enabled() && !m.stat.target_precision_reached() {
                reached = false;
            }
        }
        if reached {
            self.end_of_sim.set(true);
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<engine @ {} ({} events, done: {})>",
            self.clock.get(),
            self.num_events.get(),
            self.end_of_sim.get()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn schedule_in_the_past_snaps_to_now() {
        let engine = Engine::new();
        engine.clock.set(10.0);
        let src = EventSource::new("src");
        let evt = engine.schedule_event(&src, 5.0, Payload::None).unwrap();
        assert!(evt.fire_time() == 10.0);
    }

    #[test]
    fn disabled_source_schedules_nothing() {
        let engine = Engine::new();
        let src = EventSource::new("src");
        src.enable(false);
        assert!(engine.schedule_event(&src, 1.0, Payload::None).is_none());
    }

    #[test]
    fn reschedule_to_approximately_equal_time_is_a_noop() {
        let engine = Engine::new();
        let src = EventSource::new("src");
        let evt = engine.schedule_event(&src, 5.0, Payload::None).unwrap();
        let seq = evt.seq();
        engine.reschedule_event(&evt, 5.0 + 1e-18);
        assert!(evt.seq() == seq);
        assert!(evt.fire_time() == 5.0);
    }

    #[test]
    fn reschedule_moves_a_single_instance() {
        let engine = Engine::new();
        let src = EventSource::new("src");
        let evt = engine.schedule_event(&src, 5.0, Payload::None).unwrap();
        engine.schedule_event(&src, 6.0, Payload::None).unwrap();
        engine.reschedule_event(&evt, 7.0);
        assert!(engine.list.borrow().len() == 2);
        assert!(evt.fire_time() == 7.0);
    }

    #[test]
    fn reschedule_of_an_already_fired_event_is_refused() {
        let engine = Engine::new();
        engine.clock.set(10.0);
        let src = EventSource::new("src");
        let evt = engine.schedule_event(&src, 10.0, Payload::None).unwrap();
        engine.list.borrow_mut().pop();
        engine.clock.set(12.0);
        engine.reschedule_event(&evt, 5.0);
        assert!(evt.fire_time() == 10.0);
    }

    #[test]
    fn stop_at_a_past_time_is_a_logic_error() {
        let engine = Engine::new();
        engine.clock.set(10.0);
        assert!(engine.stop_at_time(5.0).is_err());
        assert!(engine.stop_at_time(15.0).is_ok());
    }

    #[test]
    fn fired_events_advance_the_clock_monotonically() {
        let engine = Engine::new();
        engine.set_end_of_simulation(false);
        let src = EventSource::new("src");
        let times = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&times);
        src.connect(move |_, ctx| seen.borrow_mut().push(ctx.time()));
        engine.schedule_event(&src, 3.0, Payload::None);
        engine.schedule_event(&src, 1.0, Payload::None);
        engine.schedule_event(&src, 2.0, Payload::None);
        while engine.fire_next_event().is_some() {}
        assert!(*times.borrow() == vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn disabling_a_source_makes_its_events_noops() {
        let engine = Engine::new();
        engine.set_end_of_simulation(false);
        let src = EventSource::new("src");
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        src.connect(move |_, _| seen.set(seen.get() + 1));
        engine.schedule_event(&src, 1.0, Payload::None);
        src.enable(false);
        engine.fire_next_event();
        assert!(count.get() == 0);
    }

    #[test]
    fn before_and_after_fire_bracket_user_events() {
        let engine = Engine::new();
        engine.set_end_of_simulation(false);
        let src = EventSource::new("src");
        let trace = Rc::new(RefCell::new(Vec::new()));
        let t = Rc::clone(&trace);
        engine
            .before_fire_source()
            .connect(move |_, _| t.borrow_mut().push("before"));
        let t = Rc::clone(&trace);
        src.connect(move |_, _| t.borrow_mut().push("event"));
        let t = Rc::clone(&trace);
        engine
            .after_fire_source()
            .connect(move |_, _| t.borrow_mut().push("after"));
        engine.schedule_event(&src, 1.0, Payload::None);
        engine.fire_next_event();
        assert!(*trace.borrow() == vec!["before", "event", "after"]);
    }
}
