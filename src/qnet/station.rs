use super::CustomerId;
use super::buffer::Buffer;
use super::customer::Customer;
use super::customer::CustomerStatus;
use super::network::Network;
use super::node::Node;
use super::node::NodeCategory;
use super::node::NodeCore;
use super::node::NodeMetric;
use super::node::SourceRole;
use super::routing::Routing;
use super::service::InfiniteServer;
use super::service::ServiceCx;
use super::service::ServiceStrategy;
use crate::kernel::Context;
use crate::kernel::Event;
use crate::kernel::EventSource;
use crate::kernel::Payload;
use crate::kernel::Quantum;
use crate::qnet::Fifo;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// a service station: buffer, service strategy, routing. arrivals that the
/// buffer refuses are discarded; admitted customers are pulled into service
/// as servers free up, and completions depart through the routing strategy.
///
/// a delay (infinite-server) station is the same machinery with an
/// unbounded buffer and the `InfiniteServer` strategy.
pub struct Station {
    core: NodeCore,
    category: NodeCategory,
    buffer: RefCell<Box<dyn Buffer>>,
    service: RefCell<Box<dyn ServiceStrategy>>,
    routing: Box<dyn Routing>,
    service_source: Rc<EventSource>,
    discard_source: Rc<EventSource>,
    quantum_source: Rc<EventSource>,
    service_events: RefCell<HashMap<CustomerId, Rc<Event>>>,
    discards: Cell<usize>,
}

impl Station {
    pub fn new(
        name: &str,
        buffer: impl Buffer + 'static,
        service: impl ServiceStrategy + 'static,
        routing: impl Routing + 'static,
    ) -> Self {
        Self {
            core: NodeCore::new(name),
            category: NodeCategory::Station,
            buffer: RefCell::new(Box::new(buffer)),
            service: RefCell::new(Box::new(service)),
            routing: Box::new(routing),
            service_source: EventSource::new(&format!("{} Service", name)),
            discard_source: EventSource::new(&format!("{} Discard", name)),
            quantum_source: EventSource::new(&format!("{} Quantum Expiry", name)),
            service_events: RefCell::new(HashMap::new()),
            discards: Cell::new(0),
        }
    }

    /// infinite-server (pure delay) station
    pub fn delay(
        name: &str,
        distrs: Vec<(super::ClassId, crate::dist::Dist)>,
        routing: impl Routing + 'static,
    ) -> Self {
        let mut station = Self::new(name, Fifo::unbounded(), InfiniteServer::new(distrs), routing);
        station.category = NodeCategory::Delay;
        station
    }

    pub fn service_source(&self) -> &Rc<EventSource> {
        &self.service_source
    }

    pub fn discard_source(&self) -> &Rc<EventSource> {
        &self.discard_source
    }

    pub fn queue_length(&self) -> usize {
        self.buffer.borrow().len()
    }

    pub fn num_busy_servers(&self) -> usize {
        self.service.borrow().num_busy()
    }

    pub fn capacity_multiplier(&self) -> f64 {
        self.service.borrow().capacity_multiplier()
    }

    /// change the effective speed of the station's servers, re-planning
    /// every in-progress customer
    pub fn set_capacity_multiplier(&self, net: &Rc<Network>, multiplier: f64) {
        let cx = ServiceCx { net, station: self };
        self.service
            .borrow_mut()
            .set_capacity_multiplier(&cx, multiplier);
    }

    pub(crate) fn schedule_service(&self, net: &Rc<Network>, customer: &Rc<Customer>, delay: f64) {
        let now = net.engine().simulated_time();
        if let Some(event) = net.engine().schedule_event(
            &self.service_source,
            now + delay,
            Payload::Customer(Rc::clone(customer)),
        ) {
            self.service_events.borrow_mut().insert(customer.id(), event);
        }
    }

    pub(crate) fn reschedule_service(
        &self,
        net: &Rc<Network>,
        customer: &Rc<Customer>,
        delay: f64,
    ) {
        let now = net.engine().simulated_time();
        let existing = self.service_events.borrow().get(&customer.id()).cloned();
        match existing {
            Some(event) => net.engine().reschedule_event(&event, now + delay),
            None => self.schedule_service(net, customer, delay),
        }
    }

    pub(crate) fn schedule_quantum(
        &self,
        net: &Rc<Network>,
        state: Quantum,
        delay: f64,
    ) -> Option<Rc<Event>> {
        let now = net.engine().simulated_time();
        net.engine().schedule_event(
            &self.quantum_source,
            now + delay,
            Payload::Quantum(RefCell::new(state)),
        )
    }

    /// time-weighted queue length sample since the previous event
    fn track_queue(&self, net: &Rc<Network>) {
        let now = net.engine().simulated_time();
        let elapsed = now - self.core.last_event_time();
        if elapsed > 0.0 {
            self.core.accumulate(
                NodeMetric::QueueLength,
                self.buffer.borrow().len() as f64,
                elapsed,
            );
        }
    }

    /// pull waiting customers into service while servers are available
    fn try_serve(&self, net: &Rc<Network>) {
        let now = net.engine().simulated_time();
        loop {
            if !self.service.borrow().can_serve() {
                break;
            }
            let next = self.buffer.borrow_mut().pop();
            let Some(customer) = next else {
                break;
            };
            if let Some(arrived) = customer.last_node_arrival(self.core.id()) {
                self.core
                    .accumulate(NodeMetric::WaitingTime, now - arrived, 1.0);
            }
            customer.set_status(CustomerStatus::NodeEntered);
            let cx = ServiceCx { net, station: self };
            self.service.borrow_mut().serve(&cx, &customer);
        }
    }
}

impl Node for Station {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn category(&self) -> NodeCategory {
        self.category
    }

    fn process_arrival(&self, net: &Rc<Network>, customer: &Rc<Customer>, _ctx: &Context) {
        self.track_queue(net);
        let admitted = self.buffer.borrow().can_push(customer);
        if admitted {
            self.buffer.borrow_mut().push(Rc::clone(customer));
            self.try_serve(net);
        } else {
            let now = net.engine().simulated_time();
            net.engine().schedule_event(
                &self.discard_source,
                now,
                Payload::Customer(Rc::clone(customer)),
            );
        }
    }

    fn process_service(&self, net: &Rc<Network>, customer: &Rc<Customer>, _ctx: &Context) {
        self.track_queue(net);
        customer.set_status(CustomerStatus::NodeServed);
        {
            let cx = ServiceCx { net, station: self };
            self.service.borrow_mut().remove(&cx, customer);
        }
        self.service_events.borrow_mut().remove(&customer.id());
        let now = net.engine().simulated_time();
        net.engine().schedule_event(
            self.core.departure_source(),
            now,
            Payload::Customer(Rc::clone(customer)),
        );
        self.try_serve(net);
    }

    fn process_departure(&self, net: &Rc<Network>, customer: &Rc<Customer>, _ctx: &Context) {
        match net.route(self.routing.as_ref(), customer) {
            Ok((node, class)) => {
                customer.change_class(class);
                net.send(customer, node, 0.0);
            }
            Err(e) => log::error!("departure from '{}' not routed: {}", self.core.name(), e),
        }
    }

    fn process_discard(&self, net: &Rc<Network>, customer: &Rc<Customer>, _ctx: &Context) {
        self.track_queue(net);
        self.discards.set(self.discards.get() + 1);
        customer.set_status(CustomerStatus::NodeKilled);
        net.note_discard(customer);
    }

    fn process_quantum(&self, net: &Rc<Network>, event: &Event, _ctx: &Context) {
        let cx = ServiceCx { net, station: self };
        self.service.borrow_mut().quantum_expired(&cx, event);
    }

    fn busy_time(&self, now: f64) -> f64 {
        self.service.borrow().busy_time(now)
    }

    fn num_discards(&self) -> usize {
        self.discards.get()
    }

    fn extra_sources(&self) -> Vec<(SourceRole, Rc<EventSource>)> {
        vec![
            (SourceRole::Service, Rc::clone(&self.service_source)),
            (SourceRole::Discard, Rc::clone(&self.discard_source)),
            (SourceRole::Quantum, Rc::clone(&self.quantum_source)),
        ]
    }

    fn initialize_experiment(&self, _net: &Rc<Network>) {
        self.core.reset_counters();
        self.discards.set(0);
        self.buffer.borrow_mut().reset();
        self.service.borrow_mut().reset();
        self.service_events.borrow_mut().clear();
    }

    fn finalize_experiment(&self, net: &Rc<Network>) {
        self.track_queue(net);
        let now = net.engine().simulated_time();
        let core = &self.core;
        core.accumulate(NodeMetric::BusyTime, self.busy_time(now), 1.0);
        core.accumulate(NodeMetric::Utilization, self.utilization(now), 1.0);
        if now > 0.0 {
            core.accumulate(
                NodeMetric::Throughput,
                core.num_departures() as f64 / now,
                1.0,
            );
        }
        core.accumulate(NodeMetric::Arrivals, core.num_arrivals() as f64, 1.0);
        core.accumulate(NodeMetric::Departures, core.num_departures() as f64, 1.0);
        core.accumulate(NodeMetric::Discards, self.discards.get() as f64, 1.0);
    }
}
