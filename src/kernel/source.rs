use super::context::Context;
use super::event::Event;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    static COUNTER: Cell<u64> = const { Cell::new(0) };
}

fn next_id() -> u64 {
    COUNTER.with(|c| {
        let id = c.get() + 1;
        c.set(id);
        id
    })
}

/// a subscriber callback receiving the fired event and the engine view
pub type Slot = Rc<dyn Fn(&Event, &Context)>;

/// a named origin of events with multi-subscriber dispatch.
/// identity (and equality) is the id; cloning keeps the name but takes a
/// fresh id and an empty slot list.
pub struct EventSource {
    id: u64,
    name: String,
    slots: RefCell<Vec<Slot>>,
    enabled: Cell<bool>,
}

impl EventSource {
    pub fn new(name: &str) -> Rc<Self> {
        Rc::new(Self {
            id: next_id(),
            name: name.to_string(),
            slots: RefCell::new(Vec::new()),
            enabled: Cell::new(true),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connect(&self, slot: impl Fn(&Event, &Context) + 'static) {
        self.slots.borrow_mut().push(Rc::new(slot));
    }

    pub fn disconnect_all(&self) {
        self.slots.borrow_mut().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    pub fn num_sinks(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn enable(&self, value: bool) {
        self.enabled.set(value);
    }

    /// deliver to every connected slot. the slot list is snapshotted first so
    /// a handler may connect further slots without invalidating the walk.
    pub fn emit(&self, event: &Event, ctx: &Context) {
        if !self.enabled.get() {
            return;
        }
        let slots = self.slots.borrow().clone();
        for slot in slots {
            slot(event, ctx);
        }
    }
}

impl Clone for EventSource {
    fn clone(&self) -> Self {
        Self {
            id: next_id(),
            name: self.name.clone(),
            slots: RefCell::new(Vec::new()),
            enabled: Cell::new(self.enabled.get()),
        }
    }
}

impl PartialEq for EventSource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventSource {}

impl std::hash::Hash for EventSource {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} ({})>", self.id, self.name)
    }
}
