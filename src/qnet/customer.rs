use super::ClassId;
use super::CustomerId;
use super::NodeId;
use super::profile::UtilizationProfile;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;

/// where a customer stands in its life across the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerStatus {
    Born,
    NodeArrived,
    NodeEntered,
    NodeServed,
    NodeKilled,
    NodeExited,
    NodeLeft,
    Died,
}

/// a unit of traffic flowing through the network. customers are shared
/// between the event list, the nodes holding them, and the network arena;
/// all links to nodes and classes are ids, never references.
pub struct Customer {
    id: CustomerId,
    class: Cell<ClassId>,
    previous_class: Cell<ClassId>,
    node: Cell<NodeId>,
    previous_node: Cell<NodeId>,
    priority: Cell<i64>,
    status: Cell<CustomerStatus>,
    arrival_time: Cell<f64>,
    runtime: Cell<f64>,
    departure_time: Cell<f64>,
    node_arrivals: RefCell<HashMap<NodeId, Vec<f64>>>,
    node_departures: RefCell<HashMap<NodeId, Vec<f64>>>,
    profiles: RefCell<HashMap<NodeId, Vec<UtilizationProfile>>>,
}

impl Customer {
    pub fn new(id: CustomerId, class: ClassId, node: NodeId) -> Self {
        Self {
            id,
            class: Cell::new(class),
            previous_class: Cell::new(class),
            node: Cell::new(node),
            previous_node: Cell::new(node),
            priority: Cell::new(0),
            status: Cell::new(CustomerStatus::Born),
            arrival_time: Cell::new(0.0),
            runtime: Cell::new(0.0),
            departure_time: Cell::new(0.0),
            node_arrivals: RefCell::new(HashMap::new()),
            node_departures: RefCell::new(HashMap::new()),
            profiles: RefCell::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> CustomerId {
        self.id
    }

    pub fn current_class(&self) -> ClassId {
        self.class.get()
    }

    pub fn previous_class(&self) -> ClassId {
        self.previous_class.get()
    }

    pub fn change_class(&self, class: ClassId) {
        self.previous_class.set(self.class.get());
        self.class.set(class);
    }

    pub fn current_node(&self) -> NodeId {
        self.node.get()
    }

    pub fn previous_node(&self) -> NodeId {
        self.previous_node.get()
    }

    pub fn change_node(&self, node: NodeId) {
        self.previous_node.set(self.node.get());
        self.node.set(node);
    }

    pub fn priority(&self) -> i64 {
        self.priority.get()
    }

    pub fn set_priority(&self, priority: i64) {
        self.priority.set(priority);
    }

    pub fn status(&self) -> CustomerStatus {
        self.status.get()
    }

    pub fn set_status(&self, status: CustomerStatus) {
        self.status.set(status);
    }

    /// time the customer entered the network
    pub fn arrival_time(&self) -> f64 {
        self.arrival_time.get()
    }

    pub fn set_arrival_time(&self, time: f64) {
        self.arrival_time.set(time);
    }

    pub fn runtime(&self) -> f64 {
        self.runtime.get()
    }

    pub fn set_runtime(&self, time: f64) {
        self.runtime.set(time);
    }

    /// time the customer left the network
    pub fn departure_time(&self) -> f64 {
        self.departure_time.get()
    }

    pub fn set_departure_time(&self, time: f64) {
        self.departure_time.set(time);
    }

    pub fn record_node_arrival(&self, node: NodeId, time: f64) {
        self.node_arrivals
            .borrow_mut()
            .entry(node)
            .or_default()
            .push(time);
    }

    pub fn node_arrival_times(&self, node: NodeId) -> Vec<f64> {
        self.node_arrivals
            .borrow()
            .get(&node)
            .cloned()
            .unwrap_or_default()
    }

    pub fn last_node_arrival(&self, node: NodeId) -> Option<f64> {
        self.node_arrivals
            .borrow()
            .get(&node)
            .and_then(|times| times.last().copied())
    }

    pub fn record_node_departure(&self, node: NodeId, time: f64) {
        self.node_departures
            .borrow_mut()
            .entry(node)
            .or_default()
            .push(time);
    }

    pub fn node_departure_times(&self, node: NodeId) -> Vec<f64> {
        self.node_departures
            .borrow()
            .get(&node)
            .cloned()
            .unwrap_or_default()
    }

    pub fn record_profile(&self, node: NodeId, profile: UtilizationProfile) {
        self.profiles
            .borrow_mut()
            .entry(node)
            .or_default()
            .push(profile);
    }

    pub fn node_profiles(&self, node: NodeId) -> Vec<UtilizationProfile> {
        self.profiles
            .borrow()
            .get(&node)
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Customer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<customer {} class {} @ node {}>",
            self.id,
            self.class.get(),
            self.node.get()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_and_node_changes_remember_the_previous() {
        let c = Customer::new(1, 0, 0);
        c.change_node(3);
        c.change_class(2);
        assert!(c.current_node() == 3 && c.previous_node() == 0);
        assert!(c.current_class() == 2 && c.previous_class() == 0);
    }

    #[test]
    fn per_node_visit_times_accumulate() {
        let c = Customer::new(1, 0, 0);
        c.record_node_arrival(2, 1.0);
        c.record_node_arrival(2, 5.0);
        c.record_node_departure(2, 3.0);
        assert!(c.node_arrival_times(2) == vec![1.0, 5.0]);
        assert!(c.last_node_arrival(2) == Some(5.0));
        assert!(c.node_departure_times(2) == vec![3.0]);
        assert!(c.node_arrival_times(9).is_empty());
    }
}
