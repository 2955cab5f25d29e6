use super::event::Event;
use std::collections::BTreeMap;
use std::rc::Rc;

/// total order for fire times
#[derive(Clone, Copy, PartialEq)]
struct Time(f64);

impl Eq for Time {}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// the future-event set: events keyed by (fire time ascending, insertion
/// order ascending). co-timed events pop in push order, and erase works by
/// event identity in O(log n) because every event remembers the sequence
/// number it was keyed under.
#[derive(Default)]
pub struct EventList {
    seq: u64,
    map: BTreeMap<(Time, u64), Rc<Event>>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Rc<Event>) {
        self.seq += 1;
        event.set_seq(self.seq);
        self.map.insert((Time(event.fire_time()), self.seq), event);
    }

    pub fn pop(&mut self) -> Option<Rc<Event>> {
        self.map.pop_first().map(|(_, event)| event)
    }

    pub fn peek(&self) -> Option<&Rc<Event>> {
        self.map.first_key_value().map(|(_, event)| event)
    }

    /// remove a specific event by identity. the key is rebuilt from the
    /// event's current fire time, so callers must erase before mutating it.
    pub fn erase(&mut self, event: &Rc<Event>) {
        let key = (Time(event.fire_time()), event.seq());
        match self.map.remove(&key) {
            Some(_) => {}
            None => log::warn!("event {} not removed because it has not been found", event),
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::event::Payload;
    use crate::kernel::source::EventSource;

    fn event(id: u64, time: f64) -> Rc<Event> {
        let source = EventSource::new("test");
        Rc::new(Event::new(id, source, 0.0, time, Payload::None))
    }

    #[test]
    fn pops_in_time_order() {
        let mut list = EventList::new();
        list.push(event(1, 3.0));
        list.push(event(2, 1.0));
        list.push(event(3, 2.0));
        let order = std::iter::from_fn(|| list.pop())
            .map(|e| e.id())
            .collect::<Vec<_>>();
        assert!(order == vec![2, 3, 1]);
    }

    #[test]
    fn co_timed_events_pop_in_insertion_order() {
        let mut list = EventList::new();
        list.push(event(1, 5.0));
        list.push(event(2, 5.0));
        list.push(event(3, 5.0));
        let order = std::iter::from_fn(|| list.pop())
            .map(|e| e.id())
            .collect::<Vec<_>>();
        assert!(order == vec![1, 2, 3]);
    }

    #[test]
    fn erase_removes_by_identity_not_time() {
        let mut list = EventList::new();
        let a = event(1, 5.0);
        let b = event(2, 5.0);
        list.push(Rc::clone(&a));
        list.push(Rc::clone(&b));
        list.erase(&a);
        assert!(list.len() == 1);
        assert!(list.pop().map(|e| e.id()) == Some(2));
    }

    #[test]
    fn reinsert_after_erase_moves_the_event() {
        let mut list = EventList::new();
        let a = event(1, 5.0);
        let b = event(2, 3.0);
        list.push(Rc::clone(&a));
        list.push(Rc::clone(&b));
        list.erase(&a);
        a.set_fire_time(1.0);
        list.push(Rc::clone(&a));
        assert!(list.pop().map(|e| e.id()) == Some(1));
        assert!(list.pop().map(|e| e.id()) == Some(2));
    }

    #[test]
    fn clear_empties_the_set() {
        let mut list = EventList::new();
        list.push(event(1, 1.0));
        list.push(event(2, 2.0));
        list.clear();
        assert!(list.is_empty());
    }
}
