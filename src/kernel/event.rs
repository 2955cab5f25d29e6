use super::context::Context;
use super::source::EventSource;
use crate::qnet::Customer;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

/// round-robin quantum-expiry bookkeeping carried by the event.
/// `work` is the amount of service demand the owner will have received when
/// the event fires; `max_fire_time` caps any reschedule of this quantum.
#[derive(Debug, Clone, Copy)]
pub struct Quantum {
    pub server: usize,
    pub work: f64,
    pub early: bool,
    pub update_time: f64,
    pub max_fire_time: f64,
}

/// typed payload re-interpreted by the subscriber
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    None,
    /// replication number and similar small indices
    Index(usize),
    /// plain real values (e.g. the arrival stamp of a queue job)
    Real(f64),
    /// the customer an arrival / departure / service event is about
    Customer(Rc<Customer>),
    /// mutable quantum-expiry state for round-robin service
    Quantum(RefCell<Quantum>),
    /// the event a before/after-firing notification brackets
    Nested(Rc<Event>),
}

/// a timed notification. events are shared between the event list, the
/// engine, and any client holding a handle for rescheduling; identity is the
/// engine-assigned monotonic id, never the fire time.
pub struct Event {
    id: u64,
    source: Rc<EventSource>,
    schedule_time: f64,
    fire_time: Cell<f64>,
    seq: Cell<u64>,
    payload: Payload,
}

impl Event {
    pub(crate) fn new(
        id: u64,
        source: Rc<EventSource>,
        schedule_time: f64,
        fire_time: f64,
        payload: Payload,
    ) -> Self {
        Self {
            id,
            source,
            schedule_time,
            fire_time: Cell::new(fire_time),
            seq: Cell::new(0),
            payload,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &Rc<EventSource> {
        &self.source
    }

    pub fn is_from(&self, source: &EventSource) -> bool {
        self.source.id() == source.id()
    }

    pub fn schedule_time(&self) -> f64 {
        self.schedule_time
    }

    pub fn fire_time(&self) -> f64 {
        self.fire_time.get()
    }

    pub(crate) fn set_fire_time(&self, time: f64) {
        self.fire_time.set(time);
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq.get()
    }

    pub(crate) fn set_seq(&self, seq: u64) {
        self.seq.set(seq);
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// the customer this event is about, if any
    pub fn customer(&self) -> Option<&Rc<Customer>> {
        match &self.payload {
            Payload::Customer(c) => Some(c),
            _ => None,
        }
    }

    /// the index payload (e.g. a replication number), if any
    pub fn index(&self) -> Option<usize> {
        match &self.payload {
            Payload::Index(i) => Some(*i),
            _ => None,
        }
    }

    /// deliver this event to every subscriber of its source
    pub fn fire(&self, ctx: &Context) {
        self.source.emit(self, ctx);
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<{},{} @ {} -> {}>",
            self.id,
            self.source,
            self.schedule_time,
            self.fire_time.get()
        )
    }
}
