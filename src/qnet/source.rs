use super::ClassId;
use super::customer::Customer;
use super::network::Network;
use super::node::Node;
use super::node::NodeCategory;
use super::node::NodeCore;
use super::node::NodeMetric;
use super::routing::Routing;
use crate::kernel::Context;
use std::cell::RefCell;
use std::rc::Rc;

/// the boundary node where open-class customers enter the network. at
/// experiment initialization it seeds one arrival per open class; each
/// departure routes the customer inward and draws the class's next
/// exogenous arrival.
pub struct SourceNode {
    core: NodeCore,
    classes: RefCell<Vec<ClassId>>,
    routing: Box<dyn Routing>,
}

impl SourceNode {
    pub fn new(name: &str, routing: impl Routing + 'static) -> Self {
        Self {
            core: NodeCore::new(name),
            classes: RefCell::new(Vec::new()),
            routing: Box::new(routing),
        }
    }

    /// register an open class entering the network through this source
    pub fn add_class(&self, class: ClassId) {
        self.classes.borrow_mut().push(class);
    }

    /// make a fresh customer of the class and schedule its arrival here
    fn generate(&self, net: &Rc<Network>, class: ClassId, delay: f64) {
        let customer = net.make_customer(class, self.core.id());
        net.send(&customer, self.core.id(), delay);
    }
}

impl Node for SourceNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Source
    }

    fn process_arrival(&self, net: &Rc<Network>, customer: &Rc<Customer>, _ctx: &Context) {
        let now = net.engine().simulated_time();
        net.engine().schedule_event(
            self.core.departure_source(),
            now,
            crate::kernel::Payload::Customer(Rc::clone(customer)),
        );
    }

    fn process_departure(&self, net: &Rc<Network>, customer: &Rc<Customer>, _ctx: &Context) {
        let class = customer.current_class();
        match net.route(self.routing.as_ref(), customer) {
            Ok((node, to_class)) => {
                customer.change_class(to_class);
                net.send(customer, node, 0.0);
            }
            Err(e) => log::error!("departure from '{}' not routed: {}", self.core.name(), e),
        }
        // the class keeps feeding the network from outside
        if let Some(gap) = net.sample_interarrival(class) {
            self.generate(net, class, gap);
        }
    }

    fn busy_time(&self, _now: f64) -> f64 {
        0.0
    }

    fn initialize_experiment(&self, net: &Rc<Network>) {
        self.core.reset_counters();
        for &class in self.classes.borrow().iter() {
            if net.class_is_open(class) {
                self.generate(net, class, 0.0);
            }
        }
    }

    fn finalize_experiment(&self, net: &Rc<Network>) {
        let now = net.engine().simulated_time();
        if now > 0.0 {
            self.core.accumulate(
                NodeMetric::Throughput,
                self.core.num_departures() as f64 / now,
                1.0,
            );
        }
        self.core
            .accumulate(NodeMetric::Arrivals, self.core.num_arrivals() as f64, 1.0);
        self.core
            .accumulate(NodeMetric::Departures, self.core.num_departures() as f64, 1.0);
    }
}
